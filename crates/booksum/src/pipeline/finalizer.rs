use std::collections::HashSet;

use chrono::Utc;

use crate::ai::{BookRequest, BookSummary};
use crate::concepts::{concept_key, BookEntry};
use crate::config::ChapterFailurePolicy;
use crate::error::JobError;
use crate::jobs::{
    ChapterRecord, ChapterStatus, ErrorEntry, FinalizationState, JobStatus, StatusDetails,
};
use crate::retry::{retry, retry_counted};
use crate::sanitize::safe_filename;
use crate::store::PutCondition;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::markdown::{render_book_note, BookNote, ChapterSection, MISSING_CHAPTER};
use super::progress::ProgressEvent;

const FALLBACK_AUTHOR: &str = "Unknown";
const FALLBACK_SUBFOLDER: &str = "Other";
const FALLBACK_SUMMARY: &str = "Book summary generation failed.";
const FALLBACK_CONCEPT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Terminal job or spurious delivery; nothing was written.
    Skipped,
    /// Failed chapters hold the artifact back. The flag was released.
    Blocked { failed: Vec<usize> },
    Completed { output_uri: String },
}

/// Assembles chapter summaries into the book note and completes the job.
pub struct Finalizer {
    ctx: PipelineContext,
}

impl Finalizer {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, job_id: &str) -> Result<FinalizeOutcome, PipelineError> {
        let jobs = &self.ctx.jobs;

        let metadata = jobs.read_metadata(job_id).await?;
        if metadata.status.is_terminal() {
            log::info!("Job {} is already {}, nothing to finalize", job_id, metadata.status);
            jobs.repair_status(job_id).await?;
            return Ok(FinalizeOutcome::Skipped);
        }
        let claimed = jobs
            .finalization_flag(job_id)
            .await?
            .is_some_and(|flag| flag.state == FinalizationState::Started);
        if !claimed {
            log::warn!("Job {}: finalize delivered without a claimed finalization, ignoring", job_id);
            return Ok(FinalizeOutcome::Skipped);
        }

        let total = metadata
            .total_chapters
            .ok_or_else(|| JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: "finalize task arrived before total_chapters was set".to_string(),
            })?;
        let completed = jobs.completed_indices(job_id, total).await?;
        if completed.len() < total {
            log::warn!(
                "Job {}: finalize delivered with {}/{} chapters complete, ignoring",
                job_id,
                completed.len(),
                total
            );
            return Ok(FinalizeOutcome::Skipped);
        }
        if !metadata.status.has_fanned_out() {
            // Chapters finished before the prepare step recorded `processing`.
            jobs.update_status(
                job_id,
                JobStatus::Processing,
                StatusDetails::stage("processing").with_progress(total, total),
            )
            .await?;
        }

        self.ctx.progress.report(ProgressEvent::Stage {
            job_id: job_id.to_string(),
            stage: "finalization".to_string(),
            message: format!("assembling {} chapters", total),
        });

        let mut chapters = Vec::with_capacity(total);
        for index in 0..total {
            chapters.push(jobs.read_chapter(job_id, index).await?);
        }

        let failed: Vec<usize> = chapters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_ref().is_some_and(|c| c.status == ChapterStatus::Failed))
            .map(|(i, _)| i)
            .collect();
        if !failed.is_empty() {
            match self.ctx.config.chapter_failure_policy {
                ChapterFailurePolicy::Block => return self.block(job_id, failed, total).await,
                ChapterFailurePolicy::BestEffort => {
                    jobs.append_error(
                        job_id,
                        ErrorEntry::warning(
                            "finalization",
                            format!("Finalizing with failed chapters {:?}", failed),
                        ),
                    )
                    .await?;
                }
            }
        }

        let sections = chapter_sections(&chapters);
        let chapter_concepts = collect_concepts(sections.iter().flat_map(|s| s.concepts.iter()));

        let book = self
            .summarize_book(job_id, &metadata.book_title, &metadata.category, &sections, &chapter_concepts)
            .await?;

        let title = book
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(metadata.book_title.as_str())
            .to_string();
        let author = book
            .author
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(FALLBACK_AUTHOR)
            .to_string();
        let subfolder = book
            .suggested_subfolder
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_SUBFOLDER)
            .to_string();

        let all_concepts = collect_concepts(book.all_key_concepts.iter().chain(chapter_concepts.iter()));
        let classification = self.ctx.concepts().record(&all_concepts, job_id).await?;
        let concepts = classification.all();

        let note = BookNote {
            title: title.clone(),
            author: author.clone(),
            categories: vec![subfolder, metadata.category.clone()],
            processed_date: Utc::now().format("%Y-%m-%d").to_string(),
            concepts: concepts.clone(),
            source: metadata.file_id.clone(),
            summary: book.summary,
            chapters: sections,
        };
        let key = format!("{}/{}.md", self.ctx.config.vault.reading_dir, safe_filename(&title));
        let output = self.ctx.output.as_ref();
        let body = render_book_note(&note).into_bytes();
        let (key_ref, body_ref) = (&key, &body);
        retry(&self.ctx.config.retry, "write book note", move || async move {
            output.put(key_ref, body_ref.clone(), PutCondition::None).await
        })
        .await?;
        let output_uri = self.ctx.output.uri(&key);

        let index = self.ctx.vault_index();
        index
            .add_book(&BookEntry {
                title: title.clone(),
                author: author.clone(),
                category: metadata.category.clone(),
            })
            .await?;
        index.add_concepts(&title, &concepts).await?;

        let new_concepts = classification.new.clone();
        let uri = output_uri.clone();
        jobs.update_metadata(job_id, |m| {
            m.book_title = title.clone();
            m.author = Some(author.clone());
            m.concepts = concepts.clone();
            m.new_concepts = new_concepts.clone();
            m.output_uri = Some(uri.clone());
        })
        .await?;
        jobs.update_status(
            job_id,
            JobStatus::Completed,
            StatusDetails::stage("completed").with_progress(total, total),
        )
        .await?;

        self.ctx.progress.report(ProgressEvent::Completed {
            job_id: job_id.to_string(),
            output_uri: output_uri.clone(),
        });
        Ok(FinalizeOutcome::Completed { output_uri })
    }

    async fn block(
        &self,
        job_id: &str,
        failed: Vec<usize>,
        total: usize,
    ) -> Result<FinalizeOutcome, PipelineError> {
        let jobs = &self.ctx.jobs;
        let message = format!(
            "{} of {} chapters failed ({:?}); run retry to finish the book",
            failed.len(),
            total,
            failed
        );
        log::warn!("Job {}: {}", job_id, message);

        jobs.append_error(
            job_id,
            ErrorEntry::error("finalization", message.clone())
                .with_context("failed_chapters", failed.clone()),
        )
        .await?;
        jobs.update_details(
            job_id,
            StatusDetails::stage("finalization")
                .with_progress(total, total)
                .with_error(message),
        )
        .await?;
        jobs.release_finalization(job_id).await?;
        Ok(FinalizeOutcome::Blocked { failed })
    }

    /// Book-level summary, or a fallback built from the chapters when the
    /// service gives up.
    async fn summarize_book(
        &self,
        job_id: &str,
        book_title: &str,
        category: &str,
        sections: &[ChapterSection],
        chapter_concepts: &[String],
    ) -> Result<BookSummary, PipelineError> {
        let request = BookRequest {
            book_title: book_title.to_string(),
            category: category.to_string(),
            chapters: sections
                .iter()
                .map(|s| (s.title.clone(), s.summary.clone()))
                .collect(),
            concepts: chapter_concepts.to_vec(),
        };
        let ai = &self.ctx.ai;
        let request = &request;
        let (result, attempts) = retry_counted(&self.ctx.config.retry, "summarize_book", move || async move {
            ai.summarize_book(request).await
        })
        .await;

        match result {
            Ok(summary) => Ok(summary),
            Err(e) => {
                log::warn!("Job {}: book summary failed, using fallback: {}", job_id, e);
                self.ctx
                    .jobs
                    .append_error(
                        job_id,
                        ErrorEntry::warning("book_summary", e.to_string()).with_context("attempts", attempts),
                    )
                    .await?;
                Ok(BookSummary {
                    title: Some(book_title.to_string()),
                    author: Some(FALLBACK_AUTHOR.to_string()),
                    suggested_subfolder: Some(FALLBACK_SUBFOLDER.to_string()),
                    all_key_concepts: chapter_concepts
                        .iter()
                        .take(FALLBACK_CONCEPT_LIMIT)
                        .cloned()
                        .collect(),
                    summary: FALLBACK_SUMMARY.to_string(),
                })
            }
        }
    }
}

fn chapter_sections(chapters: &[Option<ChapterRecord>]) -> Vec<ChapterSection> {
    chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| match chapter {
            Some(c) => ChapterSection {
                title: c.title.clone(),
                summary: c.summary_text.clone(),
                concepts: c.concepts.clone(),
            },
            None => ChapterSection {
                title: format!("Chapter {}", index + 1),
                summary: MISSING_CHAPTER.to_string(),
                concepts: Vec::new(),
            },
        })
        .collect()
}

/// First spelling wins; later names with the same normalized key are dropped.
fn collect_concepts<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(concept_key(n)))
        .map(str::to_string)
        .collect()
}
