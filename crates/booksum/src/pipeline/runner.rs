use tracing::{info_span, Instrument};

use crate::queue::Task;

use super::chapter::{ChapterOutcome, ChapterWorker};
use super::context::PipelineContext;
use super::error::PipelineError;
use super::finalizer::{FinalizeOutcome, Finalizer};
use super::orchestrator::Orchestrator;
use super::preparer::{PrepareOutcome, Preparer};

/// Result of handling one delivered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Prepared(PrepareOutcome),
    Chapter(ChapterOutcome),
    Finalized(FinalizeOutcome),
}

/// Routes tasks to the stage handlers.
pub struct Pipeline {
    ctx: PipelineContext,
    preparer: Preparer,
    chapters: ChapterWorker,
    finalizer: Finalizer,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            preparer: Preparer::new(ctx.clone()),
            chapters: ChapterWorker::new(ctx.clone()),
            finalizer: Finalizer::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.ctx.clone())
    }

    /// Runs the handler for `task`. Every handler is safe to run again for
    /// the same task.
    pub async fn handle(&self, task: &Task) -> Result<TaskOutcome, PipelineError> {
        match task {
            Task::Prepare { job_id } => {
                let span = info_span!("prepare", job_id = %job_id);
                self.preparer
                    .run(job_id)
                    .instrument(span)
                    .await
                    .map(TaskOutcome::Prepared)
            }
            Task::Chapter(chapter) => {
                let span = info_span!(
                    "chapter",
                    job_id = %chapter.job_id,
                    chapter_index = chapter.chapter_index,
                    retry = chapter.retry,
                );
                self.chapters
                    .run(chapter)
                    .instrument(span)
                    .await
                    .map(TaskOutcome::Chapter)
            }
            Task::Finalize { job_id } => {
                let span = info_span!("finalize", job_id = %job_id);
                self.finalizer
                    .run(job_id)
                    .instrument(span)
                    .await
                    .map(TaskOutcome::Finalized)
            }
        }
    }
}
