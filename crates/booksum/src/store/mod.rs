//! Durable keyed object storage with conditional writes.
//!
//! Every backend hands out a monotonically changing `generation` per key so
//! callers can coordinate through compare-and-set instead of locks.

pub mod filesystem;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreBackendConfig};
use crate::error::StoreError;
use crate::secrets::expand_home;

pub use filesystem::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Upper bound on compare-and-set rounds before giving up with `Contention`.
pub const CAS_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub generation: u64,
}

/// Precondition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional overwrite.
    None,
    /// Succeeds only when the key is absent.
    DoesNotExist,
    /// Succeeds only when the stored generation equals the given one.
    GenerationMatch(u64),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Writes `data` under `key`, returning the new generation.
    /// A failed precondition yields `StoreError::PreconditionFailed`.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: PutCondition,
    ) -> Result<u64, StoreError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Addressable location of `key`, used for `output_uri`.
    fn uri(&self, key: &str) -> String;
}

/// Builds the backend described by `config`.
pub fn open_backend(config: &StoreBackendConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    let path = || {
        config
            .path
            .as_deref()
            .map(|p| PathBuf::from(expand_home(p)))
            .ok_or_else(|| StoreError::Unavailable {
                message: format!("{:?} store needs a path", config.backend),
            })
    };

    Ok(match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Filesystem => Arc::new(FileStore::new(path()?)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&path()?)?),
    })
}

/// Rejects keys that could escape a backend's namespace.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("key must be a relative forward-slash path"));
    }
    if key.contains('\0') {
        return Err(invalid("key contains a NUL byte"));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("key contains an empty or relative segment"));
        }
    }
    Ok(())
}

// ─── JSON helpers ───

/// Reads and decodes a JSON document with its generation.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<(T, u64)>, StoreError> {
    match store.get(key).await? {
        Some(object) => {
            let value = serde_json::from_slice(&object.data).map_err(|e| StoreError::Serde {
                key: key.to_string(),
                source: e,
            })?;
            Ok(Some((value, object.generation)))
        }
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
    condition: PutCondition,
) -> Result<u64, StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serde {
        key: key.to_string(),
        source: e,
    })?;
    store.put(key, data, condition).await
}

/// Read-modify-write guarded by generation match.
///
/// `apply` receives the current value (or `None`) and returns the value to
/// write, or `None` to leave the document untouched. Conflicting writers
/// re-read and re-apply, up to `CAS_ATTEMPTS` rounds. Returns the document as
/// it stands after the call.
pub async fn update_json<T, F>(
    store: &dyn ObjectStore,
    key: &str,
    mut apply: F,
) -> Result<Option<T>, StoreError>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<&T>) -> Option<T> + Send,
{
    for _ in 0..CAS_ATTEMPTS {
        let current: Option<(T, u64)> = get_json(store, key).await?;
        let (next, condition) = match &current {
            Some((value, generation)) => (
                apply(Some(value)),
                PutCondition::GenerationMatch(*generation),
            ),
            None => (apply(None), PutCondition::DoesNotExist),
        };

        let Some(next) = next else {
            return Ok(current.map(|(value, _)| value));
        };

        match put_json(store, key, &next, condition).await {
            Ok(_) => return Ok(Some(next)),
            Err(StoreError::PreconditionFailed { .. }) => {
                log::debug!("Concurrent update on {}, retrying", key);
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Contention {
        key: key.to_string(),
        attempts: CAS_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_nested_paths() {
        assert!(validate_key("jobs/abc/chapters/0.json").is_ok());
        assert!(validate_key("01_Reading/Some Book.md").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("jobs/../secrets").is_err());
        assert!(validate_key("jobs//x").is_err());
        assert!(validate_key("jobs\\x").is_err());
        assert!(validate_key("jobs/").is_err());
    }

    #[test]
    fn test_open_backend_requires_path_for_disk_stores() {
        let config = StoreBackendConfig {
            backend: StoreBackend::Filesystem,
            path: None,
        };
        assert!(matches!(open_backend(&config), Err(StoreError::Unavailable { .. })));

        let memory = StoreBackendConfig {
            backend: StoreBackend::Memory,
            path: None,
        };
        assert!(open_backend(&memory).is_ok());
    }

    #[tokio::test]
    async fn test_open_backend_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreBackendConfig {
            backend: StoreBackend::Sqlite,
            path: Some(dir.path().join("objects.db").display().to_string()),
        };
        let store = open_backend(&config).unwrap();

        store.put("a/b.json", b"{}".to_vec(), PutCondition::None).await.unwrap();
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/b.json".to_string()]);
    }

    #[tokio::test]
    async fn test_update_json_creates_then_updates() {
        let store = MemoryStore::new();

        let created = update_json(&store, "counter.json", |current: Option<&Vec<u32>>| {
            let mut next = current.cloned().unwrap_or_default();
            next.push(1);
            Some(next)
        })
        .await
        .unwrap();
        assert_eq!(created, Some(vec![1]));

        let updated = update_json(&store, "counter.json", |current: Option<&Vec<u32>>| {
            let mut next = current.cloned().unwrap_or_default();
            next.push(2);
            Some(next)
        })
        .await
        .unwrap();
        assert_eq!(updated, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_update_json_no_change_skips_write() {
        let store = MemoryStore::new();
        put_json(&store, "doc.json", &vec![7u32], PutCondition::None)
            .await
            .unwrap();
        let before = store.get("doc.json").await.unwrap().unwrap().generation;

        let value = update_json(&store, "doc.json", |_: Option<&Vec<u32>>| None)
            .await
            .unwrap();

        assert_eq!(value, Some(vec![7]));
        let after = store.get("doc.json").await.unwrap().unwrap().generation;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_concurrent_updates_lose_nothing() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                update_json(store.as_ref(), "set.json", |current: Option<&Vec<u32>>| {
                    let mut next = current.cloned().unwrap_or_default();
                    next.push(i);
                    Some(next)
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (mut values, _): (Vec<u32>, u64) = get_json(store.as_ref(), "set.json")
            .await
            .unwrap()
            .unwrap();
        values.sort();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }
}
