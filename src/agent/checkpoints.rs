//! Per-thread conversation checkpoints (SQLite).
//!
//! One row per thread id holding the serialized message history. Session
//! reconciliation reads the same table, so every thread the agent has
//! ever seen is visible to the counter sync on startup.

use crate::error::Result;
use crate::llm::ChatMessage;
use anyhow::Context as _;
use sqlx::SqlitePool;

/// Checkpoint store for conversation histories.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the checkpoints table when absent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create checkpoints table")?;
        Ok(())
    }

    /// Load the message history for a thread. A corrupt row fails soft and
    /// returns an empty history.
    pub async fn load(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT messages FROM checkpoints WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to load checkpoint")?;

        let Some((raw,)) = row else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(error) => {
                tracing::warn!(thread_id, %error, "corrupt checkpoint, starting thread fresh");
                Ok(Vec::new())
            }
        }
    }

    /// Replace the message history for a thread.
    pub async fn save(&self, thread_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let body = serde_json::to_string(messages).context("failed to serialize checkpoint")?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, messages, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(thread_id) DO UPDATE SET
                messages = excluded.messages,
                updated_at = datetime('now')
            "#,
        )
        .bind(thread_id)
        .bind(&body)
        .execute(&self.pool)
        .await
        .context("failed to save checkpoint")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> CheckpointStore {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = CheckpointStore::new(pool);
        store.migrate().await.expect("migrate");
        store
    }

    #[tokio::test]
    async fn round_trips_message_history() {
        let store = setup_store().await;
        let messages = vec![
            ChatMessage::system("You are Ciana."),
            ChatMessage::user("hello"),
        ];

        store.save("telegram_42", &messages).await.expect("save");
        let loaded = store.load("telegram_42").await.expect("load");
        assert_eq!(loaded, messages);
    }

    #[tokio::test]
    async fn unknown_thread_loads_empty() {
        let store = setup_store().await;
        assert!(store.load("nope").await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn save_replaces_previous_history() {
        let store = setup_store().await;
        store
            .save("t", &[ChatMessage::user("one")])
            .await
            .expect("save");
        store
            .save("t", &[ChatMessage::user("one"), ChatMessage::user("two")])
            .await
            .expect("save");

        let loaded = store.load("t").await.expect("load");
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_row_loads_as_empty() {
        let store = setup_store().await;
        sqlx::query("INSERT INTO checkpoints (thread_id, messages) VALUES ('bad', '{nope')")
            .execute(store.pool())
            .await
            .expect("insert corrupt row");

        assert!(store.load("bad").await.expect("load").is_empty());
    }
}
