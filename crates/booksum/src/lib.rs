pub mod ai;
pub mod concepts;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod telemetry;
pub mod toc;
pub mod worker;

pub use ai::{GeminiService, GenerativeService};
pub use config::{load_config, BooksumConfig, ChapterFailurePolicy};
pub use error::{BooksumError, ConfigError, JobError, ProcessError, QueueError, Result, StoreError};
pub use jobs::{JobStatus, JobStore};
pub use pipeline::{Orchestrator, Pipeline, PipelineConfig, PipelineContext, PipelineError};
pub use queue::{LocalQueue, Task, TaskQueue};
pub use secrets::{resolve_secret, SecretError};
pub use store::{open_backend, ObjectStore};
pub use worker::{DispatchStats, Dispatcher};
