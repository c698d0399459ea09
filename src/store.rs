//! Persistent JSON document store.
//!
//! One file per logical namespace, mapping string keys to JSON values.
//! Every mutation rewrites the whole file atomically (temp file + rename),
//! so a crash mid-write leaves either the old or the new content, never a
//! torn file. A corrupt file fails soft: the store starts empty and the
//! next write repairs it.

use crate::error::{Result, StoreError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Key→JSON document store backed by a single file.
#[derive(Debug)]
pub struct DocStore {
    path: PathBuf,
    state: Mutex<Map<String, Value>>,
}

impl DocStore {
    /// Open a store at `path`, loading existing content when present.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(map) => map,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "store file unreadable, starting empty");
                    Map::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "could not load store, starting empty");
                Map::new()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Fetch a value, or `default` when the key is absent.
    pub async fn get(&self, key: &str, default: Value) -> Value {
        let state = self.state.lock().await;
        state.get(key).cloned().unwrap_or(default)
    }

    /// Set one key and persist.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(key.to_string(), value);
        self.save(&state).await
    }

    /// Remove one key. Persists only when the key existed.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.remove(key).is_some() {
            self.save(&state).await?;
        }
        Ok(())
    }

    /// Merge a batch of keys and persist once.
    pub async fn update(&self, batch: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        let mut state = self.state.lock().await;
        for (key, value) in batch {
            state.insert(key, value);
        }
        self.save(&state).await
    }

    /// Snapshot copy of the whole store. Mutating the returned map does not
    /// affect the store.
    pub async fn all(&self) -> Map<String, Value> {
        self.state.lock().await.clone()
    }

    /// Drop every key. Persists only when the store was non-empty.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.is_empty() {
            state.clear();
            self.save(&state).await?;
        }
        Ok(())
    }

    /// Write the full state to disk: serialize, write a sibling temp file,
    /// rename over the target.
    async fn save(&self, state: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| write_error(&self.path, &error))?;
        }

        let body = serde_json::to_vec_pretty(state)
            .map_err(|error| write_error(&self.path, &error))?;

        let tmp_path = temp_path(&self.path);
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|error| write_error(&tmp_path, &error))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|error| write_error(&self.path, &error))?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_error(path: &Path, error: &dyn std::fmt::Display) -> StoreError {
    StoreError::Write {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocStore::open(dir.path().join("state.json"));

        store.set("user_1", json!({"mode": "active"})).await.expect("set");
        assert_eq!(
            store.get("user_1", Value::Null).await,
            json!({"mode": "active"})
        );
        assert_eq!(store.get("missing", json!(0)).await, json!(0));
    }

    #[tokio::test]
    async fn second_set_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocStore::open(dir.path().join("state.json"));

        store.set("k", json!(1)).await.expect("set");
        store.set("k", json!(2)).await.expect("set");
        assert_eq!(store.get("k", Value::Null).await, json!(2));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        {
            let store = DocStore::open(&path);
            store.set("counter", json!(3)).await.expect("set");
        }

        let reopened = DocStore::open(&path);
        assert_eq!(reopened.get("counter", Value::Null).await, json!(3));
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_empty_and_recovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write fixture");

        let store = DocStore::open(&path);
        assert!(store.all().await.is_empty());

        store.set("k", json!("v")).await.expect("writes still work");
        let reopened = DocStore::open(&path);
        assert_eq!(reopened.get("k", Value::Null).await, json!("v"));
    }

    #[tokio::test]
    async fn all_returns_a_detached_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocStore::open(dir.path().join("state.json"));
        store.set("k", json!("v")).await.expect("set");

        let mut snapshot = store.all().await;
        snapshot.insert("other".to_string(), json!(true));

        assert_eq!(store.get("other", Value::Null).await, Value::Null);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocStore::open(dir.path().join("state.json"));
        store.set("k", json!("v")).await.expect("set");
        store.delete("k").await.expect("delete");
        assert_eq!(store.get("k", Value::Null).await, Value::Null);
    }

    #[tokio::test]
    async fn update_merges_batch_in_one_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocStore::open(dir.path().join("state.json"));
        store
            .update([
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(2)),
            ])
            .await
            .expect("update");
        assert_eq!(store.get("a", Value::Null).await, json!(1));
        assert_eq!(store.get("b", Value::Null).await, json!(2));
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = DocStore::open(&path);
        store.set("k", json!("v")).await.expect("set");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn creates_parent_directories_lazily() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/state.json");
        let store = DocStore::open(&path);
        store.set("k", json!("v")).await.expect("set");
        assert!(path.exists());
    }
}
