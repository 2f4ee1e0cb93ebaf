//! Key-value persistence boundary.
//!
//! The memory system speaks to storage through [`KeyValueStore`] and never
//! assumes a persistence engine. The in-memory store backs tests and the
//! default configuration; the JSON-file store gives single-process
//! durability across restarts.

use crate::error::AgentError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentError>;
    async fn put(&self, key: &str, value: Value) -> Result<(), AgentError>;
    async fn remove(&self, key: &str) -> Result<(), AgentError>;
}

/// Process-local store. Contents vanish on drop.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentError> {
        Ok(self
            .entries
            .read()
            .expect("store lock poisoned")
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), AgentError> {
        self.entries
            .write()
            .expect("store lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AgentError> {
        self.entries
            .write()
            .expect("store lock poisoned")
            .remove(key);
        Ok(())
    }
}

/// One JSON file per key under a root directory.
///
/// Keys map to `<root>/<key>.json`; keys are sanitized to a filename-safe
/// character set so a malicious key cannot escape the root.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| AgentError::Storage(format!("creating {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AgentError::Storage(format!(
                    "reading {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // A corrupt file is reported as an error so the caller can
                // degrade that one component instead of the whole load.
                warn!(key, error = %e, "Stored value is not valid JSON");
                Err(AgentError::Storage(format!("corrupt entry '{key}': {e}")))
            }
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), AgentError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| AgentError::Storage(format!("serializing '{key}': {e}")))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AgentError::Storage(format!("writing {}: {}", path.display(), e)))?;
        debug!(key, "Persisted storage entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AgentError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::Storage(format!(
                "removing {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("sage-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.put("k", json!({"n": 1})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"n": 1})));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let root = temp_root();
        let store = JsonFileStore::new(&root).unwrap();

        store.put("messages", json!(["a", "b"])).await.unwrap();
        assert_eq!(
            store.get("messages").await.unwrap(),
            Some(json!(["a", "b"]))
        );

        store.remove("messages").await.unwrap();
        assert_eq!(store.get("messages").await.unwrap(), None);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_json_file_corrupt_entry_errors_without_panicking() {
        let root = temp_root();
        let store = JsonFileStore::new(&root).unwrap();
        std::fs::write(root.join("bad.json"), b"{not json").unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(err.to_string().contains("corrupt"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_key_sanitization_stays_inside_root() {
        let root = temp_root();
        let store = JsonFileStore::new(&root).unwrap();
        store.put("../escape/attempt", json!(1)).await.unwrap();

        assert!(root.join("___escape_attempt.json").exists());
        assert_eq!(store.get("../escape/attempt").await.unwrap(), Some(json!(1)));
        let _ = std::fs::remove_dir_all(&root);
    }
}
