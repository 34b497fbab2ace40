//! Where document bytes come from.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::sanitize::redact_path;
use crate::store::ObjectStore;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn get_bytes(&self, file_ref: &str) -> Result<Vec<u8>, ProcessError>;
}

/// Reads documents from a local directory. References are relative paths
/// inside that directory.
pub struct LocalDocumentSource {
    root: PathBuf,
}

impl LocalDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, file_ref: &str) -> Result<PathBuf, ProcessError> {
        let relative = Path::new(file_ref);
        let invalid = |reason: &str| ProcessError::InvalidReference {
            reference: file_ref.to_string(),
            reason: reason.to_string(),
        };

        if file_ref.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if relative.is_absolute() {
            return Err(invalid("absolute paths are not allowed"));
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(invalid("path traversal is not allowed"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentSource for LocalDocumentSource {
    async fn get_bytes(&self, file_ref: &str) -> Result<Vec<u8>, ProcessError> {
        let path = self.resolve(file_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                log::debug!("Read {} ({} bytes)", redact_path(&path), bytes.len());
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProcessError::NotFound(file_ref.to_string()))
            }
            Err(e) => Err(ProcessError::ReadDocument { path, source: e }),
        }
    }
}

/// Reads documents uploaded to `inbox/{file_ref}` in an object store.
pub struct ObjectStoreDocumentSource {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreDocumentSource {
    pub const DEFAULT_PREFIX: &'static str = "inbox";

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: Self::DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn key_for(&self, file_ref: &str) -> String {
        format!("{}/{}", self.prefix, file_ref)
    }
}

#[async_trait]
impl DocumentSource for ObjectStoreDocumentSource {
    async fn get_bytes(&self, file_ref: &str) -> Result<Vec<u8>, ProcessError> {
        let key = self.key_for(file_ref);
        crate::store::validate_key(&key).map_err(|e| ProcessError::InvalidReference {
            reference: file_ref.to_string(),
            reason: e.to_string(),
        })?;

        match self.store.get(&key).await? {
            Some(object) => Ok(object.data),
            None => Err(ProcessError::NotFound(file_ref.to_string())),
        }
    }
}
