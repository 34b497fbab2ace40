//! Schema upgrades for the object table.
//!
//! The applied version lives in SQLite's `user_version` header field. Each
//! step runs in its own transaction together with the version bump.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Step {
    name: &'static str,
    sql: &'static str,
}

/// Step `i` upgrades the schema from version `i` to `i + 1`.
const STEPS: &[Step] = &[
    Step {
        name: "create_objects",
        sql: include_str!("sql/001_create_objects.sql"),
    },
    Step {
        name: "index_objects_updated_at",
        sql: include_str!("sql/002_index_objects_updated_at.sql"),
    },
];

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

pub fn latest_version() -> u32 {
    STEPS.len() as u32
}

/// Brings the schema up to [`latest_version`].
pub fn upgrade(conn: &mut Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(DatabaseError::UnknownSchema {
            found: current,
            supported: latest,
        });
    }

    for (index, step) in STEPS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        log::info!("Upgrading object database to v{} ({})", version, step.name);

        let failed = |source| DatabaseError::Migration {
            version,
            name: step.name,
            source,
        };
        let tx = conn.transaction().map_err(failed)?;
        tx.execute_batch(step.sql).map_err(failed)?;
        tx.pragma_update(None, "user_version", version).map_err(failed)?;
        tx.commit().map_err(failed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        upgrade(&mut conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), latest_version());
        conn.execute(
            "INSERT INTO objects (key, data, generation, updated_at) VALUES ('k', x'00', 1, 'now')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_upgrade_twice_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade(&mut conn).unwrap();
        upgrade(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        assert!(matches!(
            upgrade(&mut conn),
            Err(DatabaseError::UnknownSchema { found: 99, .. })
        ));
    }
}
