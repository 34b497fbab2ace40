use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Schema version `version` could not be applied; the transaction was
    /// rolled back.
    #[error("Schema upgrade to v{version} ({name}) failed: {source}")]
    Migration {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The file was written by a newer build.
    #[error("Database schema v{found} is newer than supported v{supported}")]
    UnknownSchema { found: u32, supported: u32 },

    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A blocking database call panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Task(String),
}
