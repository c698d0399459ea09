//! Session-thread map: durable conversation identifiers with reset
//! semantics, reconciled against the agent's checkpoint store on startup.

use crate::store::DocStore;
use crate::Result;
use regex::Regex;
use serde_json::{Value, json};
use sqlx::Row as _;
use sqlx::SqlitePool;
use std::sync::OnceLock;

/// Per-(channel, chat) monotonic reset counters, persisted in the
/// document store.
#[derive(Debug)]
pub struct SessionMap {
    store: DocStore,
}

impl SessionMap {
    pub fn new(store: DocStore) -> Self {
        Self { store }
    }

    /// Stable thread id for a conversation: `"{channel}_{chat}"` while the
    /// counter is zero, `"{channel}_{chat}_sN"` afterwards.
    pub async fn thread_id(&self, channel: &str, chat_id: &str) -> String {
        let key = base_key(channel, chat_id);
        let counter = self.counter(&key).await;
        if counter > 0 {
            format!("{key}_s{counter}")
        } else {
            key
        }
    }

    /// Bump the reset counter for a conversation and persist it.
    pub async fn reset(&self, channel: &str, chat_id: &str) -> Result<u64> {
        let key = base_key(channel, chat_id);
        let next = self.counter(&key).await + 1;
        self.store.set(&key, json!(next)).await?;
        tracing::info!(session = %key, counter = next, "session reset");
        Ok(next)
    }

    async fn counter(&self, key: &str) -> u64 {
        self.store
            .get(key, Value::Null)
            .await
            .as_u64()
            .unwrap_or(0)
    }

    /// Reconcile counters against the agent's checkpoint store so a
    /// restart never reuses a thread id the agent already knows.
    ///
    /// For every known checkpoint thread of the form `base_sN`, the
    /// counter for `base` is raised to `N + 1` when it lags. Failures are
    /// soft: a missing or differently-shaped checkpoint store logs a
    /// warning and leaves the counters untouched.
    pub async fn reconcile(&self, pool: &SqlitePool) {
        let thread_ids = match known_thread_ids(pool).await {
            Ok(ids) => ids,
            Err(error) => {
                tracing::warn!(%error, "checkpoint reconciliation skipped");
                return;
            }
        };

        let mut raised: Vec<(String, Value)> = Vec::new();
        for thread_id in &thread_ids {
            let Some((base, suffix)) = split_reset_suffix(thread_id) else {
                continue;
            };
            let current = self.counter(base).await;
            let already_raised = raised
                .iter()
                .find(|(key, _)| key == base)
                .and_then(|(_, value)| value.as_u64())
                .unwrap_or(0);
            if suffix >= current.max(already_raised) {
                raised.retain(|(key, _)| key != base);
                raised.push((base.to_string(), json!(suffix + 1)));
            }
        }

        if raised.is_empty() {
            return;
        }

        let count = raised.len();
        if let Err(error) = self.store.update(raised).await {
            tracing::warn!(%error, "failed to persist reconciled session counters");
        } else {
            tracing::info!(count, "session counters reconciled against checkpoints");
        }
    }
}

/// All thread ids the agent's checkpointer knows about.
async fn known_thread_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT DISTINCT thread_id FROM checkpoints")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<String, _>("thread_id").ok())
        .collect())
}

fn base_key(channel: &str, chat_id: &str) -> String {
    format!("{channel}_{chat_id}")
}

/// Split `"base_sN"` into `(base, N)`; returns None for ids without a
/// reset suffix.
fn split_reset_suffix(thread_id: &str) -> Option<(&str, u64)> {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let pattern = SUFFIX.get_or_init(|| Regex::new(r"^(.+)_s(\d+)$").expect("static regex"));
    let caps = pattern.captures(thread_id)?;
    let base = caps.get(1)?.as_str();
    let counter = caps.get(2)?.as_str().parse().ok()?;
    Some((base, counter))
}
