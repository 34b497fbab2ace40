use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{validate_key, ObjectStore, PutCondition, StoredObject};
use crate::error::StoreError;

/// Object store over a directory tree. Keys map to relative file paths, so
/// the Markdown vault written here can be opened directly by a notes app.
///
/// Create-if-absent is atomic across processes (hard link onto the final
/// name). Generation-matched writes are serialized within this process only.
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Writes `data` next to `path` under a unique temporary name.
    async fn write_temp(path: &Path, data: &[u8]) -> Result<PathBuf, StoreError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let temp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| StoreError::Io {
                path: temp.clone(),
                source: e,
            })?;
        Ok(temp)
    }

    async fn replace(temp: &Path, path: &Path) -> Result<(), StoreError> {
        if let Err(e) = tokio::fs::rename(temp, path).await {
            let _ = tokio::fs::remove_file(temp).await;
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
        Ok(())
    }
}

/// Content-derived generation. Never zero.
fn generation_of(data: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish().max(1)
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(".tmp"))
        .unwrap_or(false)
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let path = self.path_for(key)?;
        Ok(Self::read_if_exists(&path).await?.map(|data| StoredObject {
            generation: generation_of(&data),
            data,
        }))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: PutCondition,
    ) -> Result<u64, StoreError> {
        let path = self.path_for(key)?;
        let generation = generation_of(&data);
        let _guard = self.write_lock.lock().await;

        match condition {
            PutCondition::DoesNotExist => {
                let temp = Self::write_temp(&path, &data).await?;
                let linked = tokio::fs::hard_link(&temp, &path).await;
                let _ = tokio::fs::remove_file(&temp).await;
                match linked {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        return Err(StoreError::PreconditionFailed {
                            key: key.to_string(),
                        });
                    }
                    Err(e) => return Err(StoreError::Io { path, source: e }),
                }
            }
            PutCondition::GenerationMatch(expected) => {
                let current = Self::read_if_exists(&path).await?;
                if current.as_deref().map(generation_of) != Some(expected) {
                    return Err(StoreError::PreconditionFailed {
                        key: key.to_string(),
                    });
                }
                let temp = Self::write_temp(&path, &data).await?;
                Self::replace(&temp, &path).await?;
            }
            PutCondition::None => {
                let temp = Self::write_temp(&path, &data).await?;
                Self::replace(&temp, &path).await?;
            }
        }

        Ok(generation)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if !root.exists() {
                return keys;
            }
            for entry in walkdir::WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() || is_temp_file(entry.path()) {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            keys
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            message: format!("listing task failed: {}", e),
        })?;

        Ok(keys)
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_creates_nested_directories() {
        let (dir, store) = setup();
        store
            .put("01_Reading/Book.md", b"# Book".to_vec(), PutCondition::None)
            .await
            .unwrap();

        let on_disk = std::fs::read_to_string(dir.path().join("01_Reading/Book.md")).unwrap();
        assert_eq!(on_disk, "# Book");
    }

    #[tokio::test]
    async fn test_create_if_absent_is_exclusive() {
        let (_dir, store) = setup();
        store
            .put("jobs/a/completed/0", Vec::new(), PutCondition::DoesNotExist)
            .await
            .unwrap();

        let again = store
            .put("jobs/a/completed/0", Vec::new(), PutCondition::DoesNotExist)
            .await;
        assert!(matches!(again, Err(StoreError::PreconditionFailed { .. })));
    }

    #[tokio::test]
    async fn test_generation_match_rejects_stale_writer() {
        let (_dir, store) = setup();
        let first = store
            .put("doc.json", b"one".to_vec(), PutCondition::None)
            .await
            .unwrap();
        store
            .put("doc.json", b"two".to_vec(), PutCondition::GenerationMatch(first))
            .await
            .unwrap();

        let stale = store
            .put("doc.json", b"three".to_vec(), PutCondition::GenerationMatch(first))
            .await;
        assert!(matches!(stale, Err(StoreError::PreconditionFailed { .. })));

        let object = store.get("doc.json").await.unwrap().unwrap();
        assert_eq!(object.data, b"two");
    }

    #[tokio::test]
    async fn test_list_skips_temp_files() {
        let (dir, store) = setup();
        store
            .put("jobs/a/completed/0", Vec::new(), PutCondition::None)
            .await
            .unwrap();
        store
            .put("jobs/a/completed/1", Vec::new(), PutCondition::None)
            .await
            .unwrap();
        std::fs::write(dir.path().join("jobs/a/completed/.2.abc.tmp"), b"").unwrap();

        let keys = store.list("jobs/a/completed/").await.unwrap();
        assert_eq!(keys, vec!["jobs/a/completed/0", "jobs/a/completed/1"]);
    }

    #[tokio::test]
    async fn test_list_on_missing_root_is_empty() {
        let store = FileStore::new("/nonexistent/booksum/root");
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (_dir, store) = setup();
        let result = store
            .put("../escape.txt", Vec::new(), PutCondition::None)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
    }
}
