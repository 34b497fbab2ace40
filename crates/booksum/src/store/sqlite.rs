use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::{validate_key, ObjectStore, PutCondition, StoredObject};
use crate::db::{Database, DatabaseError};
use crate::error::StoreError;

/// Object store backed by a single SQLite table.
///
/// Conditional writes are single statements, so preconditions hold across
/// processes sharing the database file.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
    label: String,
}

impl SqliteStore {
    pub fn new(db: Database, label: impl Into<String>) -> Self {
        Self {
            db,
            label: label.into(),
        }
    }

    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = Database::open(path)?;
        Ok(Self::new(db, path.display().to_string()))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?, ":memory:"))
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        validate_key(key)?;
        let key = key.to_string();
        let row = self
            .db
            .run(move |conn| {
                conn.query_row(
                    "SELECT data, generation FROM objects WHERE key = ?1",
                    params![key],
                    |r| {
                        Ok(StoredObject {
                            data: r.get(0)?,
                            generation: r.get::<_, i64>(1)? as u64,
                        })
                    },
                )
                .optional()
                .map_err(DatabaseError::from)
            })
            .await?;
        Ok(row)
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: PutCondition,
    ) -> Result<u64, StoreError> {
        validate_key(key)?;
        let owned_key = key.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let generation = self
            .db
            .run(move |conn| {
                let key = owned_key;
                let generation: Option<i64> = match condition {
                    PutCondition::None => Some(conn.query_row(
                        "INSERT INTO objects (key, data, generation, updated_at)
                         VALUES (?1, ?2, 1, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                             data = excluded.data,
                             generation = objects.generation + 1,
                             updated_at = excluded.updated_at
                         RETURNING generation",
                        params![key, data, now],
                        |r| r.get(0),
                    )?),
                    PutCondition::DoesNotExist => {
                        let inserted = conn.execute(
                            "INSERT INTO objects (key, data, generation, updated_at)
                             VALUES (?1, ?2, 1, ?3)
                             ON CONFLICT(key) DO NOTHING",
                            params![key, data, now],
                        )?;
                        (inserted == 1).then_some(1)
                    }
                    PutCondition::GenerationMatch(expected) => {
                        let updated = conn.execute(
                            "UPDATE objects
                             SET data = ?2, generation = generation + 1, updated_at = ?3
                             WHERE key = ?1 AND generation = ?4",
                            params![key, data, now, expected as i64],
                        )?;
                        (updated == 1).then_some(expected as i64 + 1)
                    }
                };
                Ok(generation)
            })
            .await?;

        generation
            .map(|g| g as u64)
            .ok_or_else(|| StoreError::PreconditionFailed {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        let keys = self
            .db
            .run(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT key FROM objects WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
                let rows = stmt.query_map(params![prefix, prefix.chars().count() as i64], |r| {
                    r.get::<_, String>(0)
                })?;
                let mut keys = Vec::new();
                for row in rows {
                    keys.push(row?);
                }
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    fn uri(&self, key: &str) -> String {
        format!("sqlite://{}#{}", self.label, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generations_increment() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .put("doc", b"a".to_vec(), PutCondition::None)
            .await
            .unwrap();
        let second = store
            .put("doc", b"b".to_vec(), PutCondition::None)
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_does_not_exist_precondition() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put("flag", b"x".to_vec(), PutCondition::DoesNotExist)
            .await
            .unwrap();
        let again = store
            .put("flag", b"y".to_vec(), PutCondition::DoesNotExist)
            .await;
        assert!(matches!(again, Err(StoreError::PreconditionFailed { .. })));
        assert_eq!(store.get("flag").await.unwrap().unwrap().data, b"x");
    }

    #[tokio::test]
    async fn test_generation_match() {
        let store = SqliteStore::open_in_memory().unwrap();
        let generation = store
            .put("doc", b"1".to_vec(), PutCondition::None)
            .await
            .unwrap();
        let next = store
            .put("doc", b"2".to_vec(), PutCondition::GenerationMatch(generation))
            .await
            .unwrap();
        assert_eq!(next, generation + 1);

        let stale = store
            .put("doc", b"3".to_vec(), PutCondition::GenerationMatch(generation))
            .await;
        assert!(matches!(stale, Err(StoreError::PreconditionFailed { .. })));
    }

    #[tokio::test]
    async fn test_list_prefix_with_wildcard_characters() {
        let store = SqliteStore::open_in_memory().unwrap();
        for key in ["jobs/a_1/x", "jobs/ab1/x", "jobs/a_1/y"] {
            store.put(key, Vec::new(), PutCondition::None).await.unwrap();
        }
        let keys = store.list("jobs/a_1/").await.unwrap();
        assert_eq!(keys, vec!["jobs/a_1/x", "jobs/a_1/y"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put("jobs/j/metadata.json", b"{}".to_vec(), PutCondition::None)
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get("jobs/j/metadata.json").await.unwrap().is_some());
    }
}
