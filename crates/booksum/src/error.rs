use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BooksumError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("AI service error: {0}")]
    Ai(#[from] crate::ai::AiError),

    #[error("TOC extraction error: {0}")]
    Toc(#[from] crate::toc::TocError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid document reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),

    #[error("Document has no pages")]
    EmptyDocument,

    #[error("Page range {start}-{end} is outside the document (1-{page_count})")]
    InvalidRange {
        start: usize,
        end: usize,
        page_count: usize,
    },

    #[error("Document source failed: {0}")]
    Source(#[from] StoreError),
}

impl ProcessError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Source(e) => e.is_retryable(),
            ProcessError::ReadDocument { source, .. } => is_transient_io(source),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Precondition failed for '{key}'")]
    PreconditionFailed { key: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize '{key}': {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Gave up updating '{key}' after {attempts} conflicting writes")]
    Contention { key: String, attempts: u32 },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl StoreError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable { .. } | StoreError::Contention { .. } => true,
            StoreError::Io { source, .. } => is_transient_io(source),
            StoreError::Database(crate::db::DatabaseError::Sqlite(e)) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("Invalid state for job {job_id}: {reason}")]
    InvalidState { job_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Store(e) if e.is_retryable())
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Task queue is closed")]
    Closed,
}

fn is_transient_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

pub type Result<T> = std::result::Result<T, BooksumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_is_retryable() {
        let err = StoreError::Unavailable {
            message: "connection reset".to_string(),
        };
        assert!(err.is_retryable());
        assert!(JobError::from(err).is_retryable());
    }

    #[test]
    fn test_precondition_failed_is_not_retryable() {
        let err = StoreError::PreconditionFailed {
            key: "jobs/a/finalization_started".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_state_is_not_retryable() {
        let err = JobError::InvalidState {
            job_id: "j".to_string(),
            reason: "total_chapters already set to 3".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("already set"));
    }

    #[test]
    fn test_timed_out_io_is_retryable() {
        let err = StoreError::Io {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"),
        };
        assert!(err.is_retryable());

        let err = StoreError::Io {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        };
        assert!(!err.is_retryable());
    }
}
