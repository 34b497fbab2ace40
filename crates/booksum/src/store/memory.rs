use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{validate_key, ObjectStore, PutCondition, StoredObject};
use crate::error::StoreError;

/// Process-local object store. Used by tests and single-process runs.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    next_generation: AtomicU64,
    injected_failures: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            next_generation: AtomicU64::new(1),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` operations fail with `StoreError::Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read_objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::Unavailable {
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn read_objects(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        match self.objects.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_objects(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        match self.objects.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.check_injected_failure()?;
        validate_key(key)?;
        Ok(self.read_objects().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: PutCondition,
    ) -> Result<u64, StoreError> {
        self.check_injected_failure()?;
        validate_key(key)?;

        let mut objects = self.write_objects();
        let current = objects.get(key).map(|o| o.generation);
        let allowed = match condition {
            PutCondition::None => true,
            PutCondition::DoesNotExist => current.is_none(),
            PutCondition::GenerationMatch(expected) => current == Some(expected),
        };
        if !allowed {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        objects.insert(key.to_string(), StoredObject { data, generation });
        Ok(generation)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_injected_failure()?;
        Ok(self
            .read_objects()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
