//! Stage handlers: prepare, per-chapter summarization and finalization.

pub mod chapter;
pub mod config;
pub mod context;
pub mod error;
pub mod finalizer;
pub mod markdown;
pub mod orchestrator;
pub mod preparer;
pub mod progress;
pub mod ranges;
pub mod runner;

pub use chapter::{ChapterOutcome, ChapterWorker};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use finalizer::{FinalizeOutcome, Finalizer};
pub use orchestrator::{JobHandle, Orchestrator};
pub use preparer::{PrepareOutcome, Preparer};
pub use progress::{LogProgress, NoopProgress, ProgressEvent, ProgressReporter, RecordingProgress};
pub use ranges::{compute_chapter_ranges, ChapterRange};
pub use runner::{Pipeline, TaskOutcome};
