//! Stage tasks and the queue that carries them.
//!
//! Delivery is at-least-once: every handler must tolerate seeing the same
//! task again.

pub mod local;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub use local::LocalQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterTask {
    pub job_id: String,
    pub chapter_index: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub title: String,
    /// Operator-requested re-run of a failed chapter.
    #[serde(default)]
    pub retry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Prepare { job_id: String },
    Chapter(ChapterTask),
    Finalize { job_id: String },
}

impl Task {
    pub fn job_id(&self) -> &str {
        match self {
            Task::Prepare { job_id } | Task::Finalize { job_id } => job_id,
            Task::Chapter(task) => &task.job_id,
        }
    }

    /// Stage tag used in `errors.json`.
    pub fn stage(&self) -> &'static str {
        match self {
            Task::Prepare { .. } => "prepare",
            Task::Chapter(_) => "chapter_summary",
            Task::Finalize { .. } => "finalization",
        }
    }
}

/// A task plus its delivery count (1 on first delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub task: Task,
    pub attempt: u32,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedules `task` to become deliverable after `delay`.
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<(), QueueError>;
}
