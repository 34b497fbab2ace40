use thiserror::Error;

use crate::ai::AiError;
use crate::error::{JobError, ProcessError, QueueError, StoreError};
use crate::toc::TocError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job state error: {0}")]
    Job(#[from] JobError),

    #[error("Document processing failed: {0}")]
    Processing(#[from] ProcessError),

    #[error("AI service failed: {0}")]
    Ai(#[from] AiError),

    #[error("TOC extraction failed: {0}")]
    Toc(#[from] TocError),

    #[error("Could not enqueue follow-up task: {0}")]
    Queue(#[from] QueueError),

    #[error("Output storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("Stage worker stopped unexpectedly: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Whether redelivering the task could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Job(e) => e.is_retryable(),
            PipelineError::Processing(e) => e.is_retryable(),
            PipelineError::Ai(e) => crate::retry::Retryable::is_retryable(e),
            PipelineError::Storage(e) => e.is_retryable(),
            PipelineError::Queue(_) | PipelineError::Worker(_) => true,
            PipelineError::Toc(_) => false,
        }
    }
}
