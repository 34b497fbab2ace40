use chrono::Utc;

use crate::ai::ChapterRequest;
use crate::error::JobError;
use crate::jobs::{ChapterRecord, ChapterStatus, ErrorEntry, StatusDetails};
use crate::processor::PagedDocument;
use crate::queue::{ChapterTask, Task};
use crate::retry::retry_counted;
use crate::sanitize::truncate_chars;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::ProgressEvent;

pub const TRUNCATION_MARKER: &str = "\n...(truncated)...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterOutcome {
    /// The job was already terminal; nothing was touched.
    pub skipped: bool,
    /// Whether the AI service was called on this delivery.
    pub summarized: bool,
    pub status: Option<ChapterStatus>,
    pub completed: usize,
    pub total: usize,
    /// This delivery won the finalization flag and enqueued the finalizer.
    pub triggered_finalization: bool,
}

impl ChapterOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            summarized: false,
            status: None,
            completed: 0,
            total: 0,
            triggered_finalization: false,
        }
    }
}

/// Summarizes one chapter and runs the fan-in check.
pub struct ChapterWorker {
    ctx: PipelineContext,
}

impl ChapterWorker {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, task: &ChapterTask) -> Result<ChapterOutcome, PipelineError> {
        let jobs = &self.ctx.jobs;
        let job_id = task.job_id.as_str();

        let metadata = jobs.read_metadata(job_id).await?;
        if metadata.status.is_terminal() {
            log::info!(
                "Job {} is {}, skipping chapter {}",
                job_id,
                metadata.status,
                task.chapter_index
            );
            return Ok(ChapterOutcome::skipped());
        }

        let total = metadata
            .total_chapters
            .ok_or_else(|| JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: "chapter task arrived before total_chapters was set".to_string(),
            })?;

        let mut record = jobs
            .read_chapter(job_id, task.chapter_index)
            .await?
            .unwrap_or_else(|| {
                ChapterRecord::pending(task.chapter_index, &task.title, task.start_page, task.end_page)
            });

        let summarize = match record.status {
            ChapterStatus::Done => false,
            ChapterStatus::Failed => task.retry,
            ChapterStatus::Pending | ChapterStatus::Processing => true,
        };

        if summarize {
            record = self
                .summarize(task, &metadata.book_title, record)
                .await?;
        } else {
            log::debug!(
                "Job {}: chapter {} already {:?}, only checking fan-in",
                job_id,
                task.chapter_index,
                record.status
            );
        }

        let completed = jobs.record_chapter_complete(job_id, task.chapter_index).await?;
        jobs.update_details(
            job_id,
            StatusDetails::stage("chapter_summary").with_progress(completed, total),
        )
        .await?;
        self.ctx.progress.report(ProgressEvent::ChapterFinished {
            job_id: job_id.to_string(),
            chapter_index: task.chapter_index,
            completed,
            total,
        });

        let mut triggered_finalization = false;
        if completed == total && jobs.try_start_finalization(job_id).await? {
            let finalize = Task::Finalize {
                job_id: job_id.to_string(),
            };
            if let Err(e) = self.ctx.queue.enqueue(finalize, std::time::Duration::ZERO).await {
                jobs.release_finalization(job_id).await?;
                return Err(e.into());
            }
            log::info!("Job {}: all {} chapters finished, finalizing", job_id, total);
            triggered_finalization = true;
        }

        Ok(ChapterOutcome {
            skipped: false,
            summarized: summarize,
            status: Some(record.status),
            completed,
            total,
            triggered_finalization,
        })
    }

    async fn summarize(
        &self,
        task: &ChapterTask,
        book_title: &str,
        mut record: ChapterRecord,
    ) -> Result<ChapterRecord, PipelineError> {
        let jobs = &self.ctx.jobs;
        let job_id = task.job_id.as_str();

        record.status = ChapterStatus::Processing;
        record.error = None;
        record.updated_at = Utc::now();
        jobs.write_chapter(job_id, &record).await?;

        let text = self.chapter_text(task).await?;
        let text = truncate_chars(&text, self.ctx.config.max_chapter_chars, TRUNCATION_MARKER);

        let concept_hints = match self.ctx.concepts().hints(self.ctx.config.concept_hint_limit).await {
            Ok(hints) => hints,
            Err(e) => {
                log::warn!("Concept hints unavailable: {}", e);
                Vec::new()
            }
        };

        let request = ChapterRequest {
            book_title: book_title.to_string(),
            chapter_title: record.title.clone(),
            text,
            concept_hints,
        };
        let ai = &self.ctx.ai;
        let request = &request;
        let (result, attempts) = retry_counted(&self.ctx.config.retry, "summarize_chapter", move || async move {
            ai.summarize_chapter(request).await
        })
        .await;
        record.retry_count += attempts;
        record.updated_at = Utc::now();

        match result {
            Ok(summary) => {
                record.status = ChapterStatus::Done;
                record.summary_text = summary.summary;
                record.concepts = summary.concepts;
                record.error = None;
            }
            Err(e) => {
                let message = e.to_string();
                record.status = ChapterStatus::Failed;
                record.error = Some(message.clone());
                jobs.append_error(
                    job_id,
                    ErrorEntry::error("chapter_summary", message)
                        .with_context("chapter_index", task.chapter_index)
                        .with_context("title", record.title.clone())
                        .with_context("attempts", attempts),
                )
                .await?;
            }
        }
        jobs.write_chapter(job_id, &record).await?;
        Ok(record)
    }

    /// Text of the task's page range, from the page cache when present.
    async fn chapter_text(&self, task: &ChapterTask) -> Result<String, PipelineError> {
        let document = match self.ctx.jobs.read_pages(&task.job_id).await? {
            Some(pages) => PagedDocument::new(pages),
            None => {
                log::info!("Job {}: page cache missing, re-extracting", task.job_id);
                let metadata = self.ctx.jobs.read_metadata(&task.job_id).await?;
                let bytes = self.ctx.fetch_document(&metadata.file_id).await?;
                self.ctx.extract_pages(bytes).await?.1
            }
        };

        let end = task.end_page.min(document.page_count());
        let start = task.start_page.clamp(1, end.max(1));
        Ok(document.text_range(start, end)?)
    }
}
