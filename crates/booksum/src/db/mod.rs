//! SQLite connection handle behind the durable object store.
//!
//! One connection per process, serialized through a mutex. Calls from async
//! code go through [`Database::run`], which hops onto the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod migrations;

pub use error::DatabaseError;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the file and upgrades its schema. WAL mode lets a
    /// `booksum status` reader run next to a busy worker.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        migrations::upgrade(&mut conn)?;

        log::info!(
            "Object database ready at {} (schema v{})",
            path.display(),
            migrations::latest_version()
        );
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::upgrade(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    pub async fn run<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("objects.db");

        let db = Database::open(&path).unwrap();

        assert!(path.exists());
        let version = db.with_conn(migrations::schema_version).unwrap();
        assert_eq!(version, migrations::latest_version());
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.db");
        Database::open(&path)
            .unwrap()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO objects (key, data, generation, updated_at) VALUES ('a', x'01', 3, 'now')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let generation: i64 = Database::open(&path)
            .unwrap()
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT generation FROM objects WHERE key = 'a'", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(generation, 3);
    }

    #[tokio::test]
    async fn test_run_on_blocking_pool() {
        let db = Database::open_in_memory().unwrap();
        let count = db
            .run(|conn| {
                let n: u32 = conn.query_row("SELECT COUNT(*) FROM objects", [], |r| r.get(0))?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
