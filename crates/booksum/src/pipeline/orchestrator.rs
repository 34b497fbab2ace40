use std::time::Duration;

use chrono::Utc;

use crate::error::JobError;
use crate::jobs::{ChapterStatus, FinalizationState, JobStatus, StatusDocument};
use crate::queue::{ChapterTask, Task};

use super::context::PipelineContext;
use super::error::PipelineError;

/// Returned by [`Orchestrator::create_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub status: JobStatus,
}

/// Public entry points for submitting and steering jobs.
pub struct Orchestrator {
    ctx: PipelineContext,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Registers a job for `file_id` and enqueues its prepare task.
    pub async fn create_job(
        &self,
        file_id: &str,
        category: Option<&str>,
    ) -> Result<JobHandle, PipelineError> {
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.ctx.config.default_category.as_str());
        let metadata = self.ctx.jobs.create_job(file_id, category, None).await?;

        self.ctx
            .queue
            .enqueue(
                Task::Prepare {
                    job_id: metadata.job_id.clone(),
                },
                Duration::ZERO,
            )
            .await?;
        log::info!("Created job {} ({})", metadata.job_id, category);

        Ok(JobHandle {
            job_id: metadata.job_id,
            status: metadata.status,
        })
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<StatusDocument, PipelineError> {
        Ok(self.ctx.jobs.read_status(job_id).await?)
    }

    /// Re-enqueues every `failed` chapter of a non-terminal job as a retry.
    /// Returns how many tasks were enqueued.
    pub async fn retry_failed_chapters(&self, job_id: &str) -> Result<usize, PipelineError> {
        let jobs = &self.ctx.jobs;
        let metadata = jobs.read_metadata(job_id).await?;
        if metadata.status.is_terminal() {
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: format!("job is already {}", metadata.status),
            }
            .into());
        }
        let total = metadata.total_chapters.unwrap_or(0);

        let mut enqueued = 0;
        for index in 0..total {
            let Some(chapter) = jobs.read_chapter(job_id, index).await? else {
                continue;
            };
            if chapter.status != ChapterStatus::Failed {
                continue;
            }
            let task = Task::Chapter(ChapterTask {
                job_id: job_id.to_string(),
                chapter_index: index,
                start_page: chapter.start_page,
                end_page: chapter.end_page,
                title: chapter.title.clone(),
                retry: true,
            });
            let delay = self.ctx.config.inter_task_delay * enqueued as u32;
            self.ctx.queue.enqueue(task, delay).await?;
            enqueued += 1;
        }

        log::info!("Job {}: re-enqueued {} failed chapters", job_id, enqueued);
        Ok(enqueued)
    }

    /// Re-enqueues the next step of every unfinished job. Used when a
    /// worker process starts with an empty in-process queue.
    pub async fn recover_jobs(&self) -> Result<usize, PipelineError> {
        let jobs = &self.ctx.jobs;
        let mut enqueued = 0;

        for job_id in jobs.list_jobs().await? {
            let status = match jobs.read_metadata(&job_id).await {
                Ok(metadata) => metadata.status,
                Err(JobError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            match status {
                JobStatus::Completed | JobStatus::Failed => {}
                JobStatus::Queued | JobStatus::Preparing => {
                    self.ctx
                        .queue
                        .enqueue(Task::Prepare { job_id: job_id.clone() }, Duration::ZERO)
                        .await?;
                    enqueued += 1;
                }
                JobStatus::Processing => {
                    enqueued += self.recover_chapters(&job_id).await?;
                }
            }
        }

        if enqueued > 0 {
            log::info!("Recovered {} tasks from unfinished jobs", enqueued);
        }
        Ok(enqueued)
    }

    async fn recover_chapters(&self, job_id: &str) -> Result<usize, PipelineError> {
        let jobs = &self.ctx.jobs;
        let total = jobs.read_metadata(job_id).await?.total_chapters.unwrap_or(0);

        let mut enqueued = 0;
        for index in 0..total {
            if jobs.is_chapter_recorded(job_id, index).await? {
                continue;
            }
            let Some(chapter) = jobs.read_chapter(job_id, index).await? else {
                continue;
            };
            let task = Task::Chapter(ChapterTask {
                job_id: job_id.to_string(),
                chapter_index: index,
                start_page: chapter.start_page,
                end_page: chapter.end_page,
                title: chapter.title,
                retry: false,
            });
            let delay = self.ctx.config.inter_task_delay * enqueued as u32;
            self.ctx.queue.enqueue(task, delay).await?;
            enqueued += 1;
        }

        if enqueued == 0 && total > 0 {
            enqueued = self.recover_finalization(job_id).await?;
        }
        Ok(enqueued)
    }

    /// Re-enqueues the finalize step of a job whose chapters are all
    /// recorded. Goes through the finalization flag like the last chapter
    /// does; a claim younger than the lease is left to its owner and a job
    /// blocked on failed chapters waits for `retry_failed_chapters`.
    async fn recover_finalization(&self, job_id: &str) -> Result<usize, PipelineError> {
        let jobs = &self.ctx.jobs;
        let claimed = match jobs.finalization_flag(job_id).await? {
            Some(flag) if flag.state == FinalizationState::Started => {
                let lease = chrono::Duration::from_std(self.ctx.config.finalization_lease)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
                if Utc::now() - flag.updated_at < lease {
                    log::debug!("Job {}: finalization claimed at {}, leaving it", job_id, flag.updated_at);
                    return Ok(0);
                }
                log::warn!(
                    "Job {}: finalization claimed at {} never finished, re-enqueueing",
                    job_id,
                    flag.updated_at
                );
                false
            }
            released => {
                if released.is_some() && self.is_blocked(job_id).await? {
                    log::info!("Job {} is blocked on failed chapters, waiting for retry", job_id);
                    return Ok(0);
                }
                if !jobs.try_start_finalization(job_id).await? {
                    return Ok(0);
                }
                true
            }
        };

        let finalize = Task::Finalize {
            job_id: job_id.to_string(),
        };
        if let Err(e) = self.ctx.queue.enqueue(finalize, Duration::ZERO).await {
            if claimed {
                jobs.release_finalization(job_id).await?;
            }
            return Err(e.into());
        }
        Ok(1)
    }

    /// A released flag plus a finalization error on the status means the
    /// finalizer held the book back.
    async fn is_blocked(&self, job_id: &str) -> Result<bool, PipelineError> {
        let status = self.ctx.jobs.read_status(job_id).await?;
        Ok(status.details.error.is_some()
            && status.details.stage.as_deref() == Some("finalization"))
    }

    /// Non-terminal jobs idle for longer than `max_age`.
    pub async fn stale_jobs(&self, max_age: Duration) -> Result<Vec<StatusDocument>, PipelineError> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(365));
        Ok(self.ctx.jobs.stale_jobs(max_age).await?)
    }
}
