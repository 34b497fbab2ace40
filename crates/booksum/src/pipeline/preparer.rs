use crate::error::ProcessError;
use crate::jobs::{ChapterRecord, ErrorEntry, JobStatus, StatusDetails, TocSource};
use crate::queue::{ChapterTask, Task};
use crate::toc::{TocError, TocExtractor};

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::ProgressEvent;
use super::ranges::{compute_chapter_ranges, ChapterRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The job had already fanned out; nothing was enqueued.
    Skipped(JobStatus),
    /// The job was failed with this message.
    Failed(String),
    FannedOut {
        source: TocSource,
        chapters: Vec<ChapterRange>,
    },
}

/// Fetches and extracts the document, detects its chapters and enqueues
/// one chapter task per chapter.
pub struct Preparer {
    ctx: PipelineContext,
}

impl Preparer {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, job_id: &str) -> Result<PrepareOutcome, PipelineError> {
        let jobs = &self.ctx.jobs;

        let metadata = jobs.read_metadata(job_id).await?;
        if metadata.status.has_fanned_out() {
            log::info!(
                "Job {} is already {}, not preparing again",
                job_id,
                metadata.status
            );
            jobs.repair_status(job_id).await?;
            return Ok(PrepareOutcome::Skipped(metadata.status));
        }

        jobs.update_status(job_id, JobStatus::Preparing, StatusDetails::stage("preparing"))
            .await?;
        self.stage(job_id, "preparing", "fetching document");

        let bytes = self.ctx.fetch_document(&metadata.file_id).await?;
        let (bytes, document) = match self.ctx.extract_pages(bytes).await {
            Ok(extracted) => extracted,
            Err(PipelineError::Processing(e)) if !e.is_retryable() => {
                let message = match e {
                    ProcessError::EmptyDocument => "Document has no pages".to_string(),
                    other => other.to_string(),
                };
                return self.fail(job_id, ErrorEntry::error("document_extraction", message)).await;
            }
            Err(e) => return Err(e),
        };
        log::info!("Job {}: extracted {} pages", job_id, document.page_count());
        jobs.write_pages(job_id, &document.pages).await?;

        self.stage(job_id, "toc_extraction", "detecting chapters");
        let extractor = TocExtractor::new(
            self.ctx.ai.clone(),
            self.ctx.processors.clone(),
            self.ctx.config.toc.clone(),
            self.ctx.config.retry.clone(),
        );
        let outcome = match extractor.extract(&metadata.book_title, &bytes, &document).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                let TocError::Runaway { count } = e;
                let entry = ErrorEntry::error("toc_extraction", message)
                    .with_context("regex_matches", count);
                return self.fail(job_id, entry).await;
            }
        };
        for warning in &outcome.warnings {
            jobs.append_error(job_id, ErrorEntry::warning("toc_extraction", warning.clone()))
                .await?;
        }

        let ranges = compute_chapter_ranges(&outcome.chapters, document.page_count());
        let total = ranges.len();
        jobs.set_toc_source(job_id, outcome.source).await?;
        jobs.set_total_chapters(job_id, total).await?;

        for range in &ranges {
            if jobs.read_chapter(job_id, range.index).await?.is_none() {
                let record =
                    ChapterRecord::pending(range.index, &range.title, range.start_page, range.end_page);
                jobs.write_chapter(job_id, &record).await?;
            }
        }

        for range in &ranges {
            let task = Task::Chapter(ChapterTask {
                job_id: job_id.to_string(),
                chapter_index: range.index,
                start_page: range.start_page,
                end_page: range.end_page,
                title: range.title.clone(),
                retry: false,
            });
            let delay = self.ctx.config.inter_task_delay * range.index as u32;
            self.ctx.queue.enqueue(task, delay).await?;
        }

        jobs.update_status(
            job_id,
            JobStatus::Processing,
            StatusDetails::stage("processing").with_progress(0, total),
        )
        .await?;
        self.stage(
            job_id,
            "processing",
            &format!("{} chapters via {}", total, outcome.source),
        );

        Ok(PrepareOutcome::FannedOut {
            source: outcome.source,
            chapters: ranges,
        })
    }

    async fn fail(&self, job_id: &str, entry: ErrorEntry) -> Result<PrepareOutcome, PipelineError> {
        let message = entry.message().to_string();
        self.ctx.jobs.fail_job(job_id, entry).await?;
        self.ctx.progress.report(ProgressEvent::Failed {
            job_id: job_id.to_string(),
            error: message.clone(),
        });
        Ok(PrepareOutcome::Failed(message))
    }

    fn stage(&self, job_id: &str, stage: &str, message: &str) {
        self.ctx.progress.report(ProgressEvent::Stage {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            message: message.to_string(),
        });
    }
}
