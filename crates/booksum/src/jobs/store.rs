use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::keys;
use super::model::{
    ChapterRecord, ErrorEntry, FinalizationFlag, FinalizationState, JobMetadata, JobStatus,
    StatusDetails, StatusDocument, TocSource,
};
use crate::error::{JobError, StoreError};
use crate::retry::{retry, RetryPolicy};
use crate::sanitize;
use crate::store::{get_json, put_json, update_json, ObjectStore, PutCondition};

/// Job state on top of an object store.
///
/// Coordination between concurrent stage handlers goes exclusively through
/// conditional writes: per-chapter completion markers, generation-matched
/// document updates, and the finalization flag.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl JobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::new(4, Duration::from_millis(200), Duration::from_secs(5)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // ─── Jobs ───

    /// Creates a job in `queued` state and returns its metadata.
    pub async fn create_job(
        &self,
        file_id: &str,
        category: &str,
        book_title: Option<&str>,
    ) -> Result<JobMetadata, JobError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let metadata = JobMetadata {
            job_id: job_id.clone(),
            file_id: file_id.to_string(),
            status: JobStatus::Queued,
            book_title: book_title
                .map(str::to_string)
                .unwrap_or_else(|| sanitize::title_from_reference(file_id)),
            author: None,
            category: category.to_string(),
            total_chapters: None,
            completed_chapters: Vec::new(),
            toc_source: None,
            concepts: Vec::new(),
            new_concepts: Vec::new(),
            output_uri: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.put_doc(&keys::metadata(&job_id), &metadata, PutCondition::DoesNotExist)
            .await?;

        let status = StatusDocument {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            updated_at: now,
            details: StatusDetails::stage("queued"),
        };
        self.put_doc(&keys::status(&job_id), &status, PutCondition::None)
            .await?;

        log::info!("Created job {} (category: {})", job_id, category);
        Ok(metadata)
    }

    pub async fn read_metadata(&self, job_id: &str) -> Result<JobMetadata, JobError> {
        self.get_doc::<JobMetadata>(&keys::metadata(job_id))
            .await?
            .map(|(metadata, _)| metadata)
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Applies `change` to the metadata document under compare-and-set.
    /// Status must go through [`JobStore::update_status`].
    pub async fn update_metadata<F>(&self, job_id: &str, mut change: F) -> Result<JobMetadata, JobError>
    where
        F: FnMut(&mut JobMetadata) + Send,
    {
        let now = Utc::now();
        let updated = self
            .update_doc(&keys::metadata(job_id), |current: Option<&JobMetadata>| {
                let mut next = current?.clone();
                let status = next.status;
                change(&mut next);
                next.status = status;
                next.updated_at = now;
                Some(next)
            })
            .await?;
        updated.ok_or_else(|| JobError::NotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Sets `total_chapters` once. Repeating the same value is a no-op; a
    /// different value is rejected.
    pub async fn set_total_chapters(&self, job_id: &str, total: usize) -> Result<(), JobError> {
        if total == 0 {
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: "total_chapters must be positive".to_string(),
            });
        }

        let now = Utc::now();
        let mut conflict = None;
        let updated = self
            .update_doc(&keys::metadata(job_id), |current: Option<&JobMetadata>| {
                let current = current?;
                conflict = None;
                match current.total_chapters {
                    Some(existing) if existing == total => None,
                    Some(existing) => {
                        conflict = Some(existing);
                        None
                    }
                    None => {
                        let mut next = current.clone();
                        next.total_chapters = Some(total);
                        next.updated_at = now;
                        Some(next)
                    }
                }
            })
            .await?;

        if updated.is_none() {
            return Err(JobError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if let Some(existing) = conflict {
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: format!(
                    "total_chapters already set to {}, refusing {}",
                    existing, total
                ),
            });
        }
        Ok(())
    }

    pub async fn set_toc_source(&self, job_id: &str, source: TocSource) -> Result<(), JobError> {
        self.update_metadata(job_id, |metadata| metadata.toc_source = Some(source))
            .await
            .map(|_| ())
    }

    /// Moves the job forward to `status` and mirrors it into `status.json`.
    ///
    /// `metadata.json` is authoritative. Re-applying the current terminal
    /// status is a no-op returning the stored document; any backward move is
    /// `InvalidState`. Both paths first bring a lagging `status.json` up to
    /// the metadata status.
    pub async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: StatusDetails,
    ) -> Result<StatusDocument, JobError> {
        let now = Utc::now();
        let mut rejected_from = None;
        let mut already_there = false;

        let metadata = self
            .update_doc(&keys::metadata(job_id), |current: Option<&JobMetadata>| {
                let current = current?;
                rejected_from = None;
                already_there = false;
                if current.status == status && status.is_terminal() {
                    already_there = true;
                    return None;
                }
                if !current.status.can_transition_to(status) {
                    rejected_from = Some(current.status);
                    return None;
                }
                let mut next = current.clone();
                next.status = status;
                next.updated_at = now;
                if status == JobStatus::Completed {
                    next.completed_at = Some(now);
                }
                Some(next)
            })
            .await?;

        if metadata.is_none() {
            return Err(JobError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if let Some(from) = rejected_from {
            self.sync_status(job_id, from, None).await?;
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: format!("cannot move from {} to {}", from, status),
            });
        }
        if already_there {
            return self.sync_status(job_id, status, Some(&details)).await;
        }

        let document = self
            .update_doc(&keys::status(job_id), |current: Option<&StatusDocument>| {
                if current.is_some_and(|c| c.status.is_terminal()) {
                    return None;
                }
                Some(StatusDocument {
                    job_id: job_id.to_string(),
                    status,
                    updated_at: now,
                    details: details.clone(),
                })
            })
            .await?;

        log::info!("Job {} is now {}", job_id, status);
        document.ok_or_else(|| JobError::NotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Brings `status.json` up to the status recorded in `metadata.json`.
    /// Returns the status document after the repair, if any was needed.
    pub async fn repair_status(&self, job_id: &str) -> Result<StatusDocument, JobError> {
        let metadata = self.read_metadata(job_id).await?;
        self.sync_status(job_id, metadata.status, None).await
    }

    /// Rewrites `status.json` to `status` unless it already says so or is
    /// terminal. `details` replaces the stored details when given.
    async fn sync_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: Option<&StatusDetails>,
    ) -> Result<StatusDocument, JobError> {
        let now = Utc::now();
        let mut repaired_from = None;
        let document = self
            .update_doc(&keys::status(job_id), |current: Option<&StatusDocument>| {
                repaired_from = None;
                let mut next = match current {
                    Some(c) if c.status == status || c.status.is_terminal() => return None,
                    Some(c) => {
                        repaired_from = Some(c.status);
                        let mut next = c.clone();
                        next.status = status;
                        next
                    }
                    None => StatusDocument {
                        job_id: job_id.to_string(),
                        status,
                        updated_at: now,
                        details: StatusDetails::default(),
                    },
                };
                if let Some(details) = details {
                    next.details = details.clone();
                }
                next.updated_at = now;
                Some(next)
            })
            .await?;

        if let Some(from) = repaired_from {
            log::warn!("Job {}: status.json lagged at {}, repaired to {}", job_id, from, status);
        }
        document.ok_or_else(|| JobError::NotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Replaces the details of a non-terminal `status.json`, keeping its status.
    pub async fn update_details(&self, job_id: &str, details: StatusDetails) -> Result<(), JobError> {
        let now = Utc::now();
        self.update_doc(&keys::status(job_id), |current: Option<&StatusDocument>| {
            let current = current?;
            if current.status.is_terminal() {
                return None;
            }
            let mut next = current.clone();
            next.details = details.clone();
            next.updated_at = now;
            Some(next)
        })
        .await?;
        Ok(())
    }

    pub async fn read_status(&self, job_id: &str) -> Result<StatusDocument, JobError> {
        self.get_doc::<StatusDocument>(&keys::status(job_id))
            .await?
            .map(|(status, _)| status)
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Records an error entry and moves the job to `failed`. A job that is
    /// already terminal keeps its status; the entry is still appended.
    pub async fn fail_job(&self, job_id: &str, entry: ErrorEntry) -> Result<(), JobError> {
        let message = entry.message().to_string();
        let stage = entry.stage.clone();
        self.append_error(job_id, entry).await?;

        match self
            .update_status(
                job_id,
                JobStatus::Failed,
                StatusDetails::stage(stage).with_error(message),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(JobError::InvalidState { reason, .. }) => {
                log::warn!("Job {} not marked failed: {}", job_id, reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ─── Errors ───

    pub async fn append_error(&self, job_id: &str, entry: ErrorEntry) -> Result<(), JobError> {
        if entry.is_error() {
            log::error!("Job {} [{}]: {}", job_id, entry.stage, entry.message());
        } else {
            log::warn!("Job {} [{}]: {}", job_id, entry.stage, entry.message());
        }

        self.update_doc(&keys::errors(job_id), |current: Option<&Vec<ErrorEntry>>| {
            let mut entries = current.cloned().unwrap_or_default();
            entries.push(entry.clone());
            Some(entries)
        })
        .await?;
        Ok(())
    }

    pub async fn read_errors(&self, job_id: &str) -> Result<Vec<ErrorEntry>, JobError> {
        Ok(self
            .get_doc::<Vec<ErrorEntry>>(&keys::errors(job_id))
            .await?
            .map(|(entries, _)| entries)
            .unwrap_or_default())
    }

    // ─── Fan-in ───

    /// Records that chapter `index` finished (successfully or not) and
    /// returns how many distinct chapters have finished.
    ///
    /// Each chapter owns one marker object created with a does-not-exist
    /// precondition, so repeated calls leave the set unchanged and concurrent
    /// calls for different chapters cannot overwrite each other.
    pub async fn record_chapter_complete(&self, job_id: &str, index: usize) -> Result<usize, JobError> {
        let metadata = self.read_metadata(job_id).await?;
        let total = metadata.total_chapters.ok_or_else(|| JobError::InvalidState {
            job_id: job_id.to_string(),
            reason: "total_chapters is not set".to_string(),
        })?;
        if index >= total {
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                reason: format!("chapter index {} outside 0..{}", index, total),
            });
        }

        let marker = keys::completed_marker(job_id, index);
        let stamp = Utc::now().to_rfc3339().into_bytes();
        match self.put_raw(&marker, stamp, PutCondition::DoesNotExist).await {
            Ok(_) => log::debug!("Job {}: chapter {} marked complete", job_id, index),
            Err(StoreError::PreconditionFailed { .. }) => {
                log::debug!("Job {}: chapter {} was already complete", job_id, index)
            }
            Err(e) => return Err(e.into()),
        }

        let completed = self.completed_indices(job_id, total).await?;

        let now = Utc::now();
        self.update_doc(&keys::metadata(job_id), |current: Option<&JobMetadata>| {
            let current = current?;
            if current.completed_chapters == completed {
                return None;
            }
            let mut next = current.clone();
            let mut merged = current.completed_chapters.clone();
            merged.extend(completed.iter().copied());
            merged.sort_unstable();
            merged.dedup();
            next.completed_chapters = merged;
            next.updated_at = now;
            Some(next)
        })
        .await?;

        Ok(completed.len())
    }

    /// Chapter indices with a completion marker, sorted.
    pub async fn completed_indices(&self, job_id: &str, total: usize) -> Result<Vec<usize>, JobError> {
        let prefix = keys::completed_prefix(job_id);
        let keys = self.list_keys(&prefix).await?;
        let mut indices: Vec<usize> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.parse().ok())
            .filter(|index| *index < total)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    pub async fn is_chapter_recorded(&self, job_id: &str, index: usize) -> Result<bool, JobError> {
        let marker = keys::completed_marker(job_id, index);
        Ok(self.get_raw(&marker).await?.is_some())
    }

    /// Compare-and-set on the finalization flag. Returns `true` to exactly one
    /// caller per started/released cycle.
    pub async fn try_start_finalization(&self, job_id: &str) -> Result<bool, JobError> {
        let key = keys::finalization_flag(job_id);
        let token = uuid::Uuid::new_v4().to_string();
        let started = FinalizationFlag {
            state: FinalizationState::Started,
            owner: token.clone(),
            updated_at: Utc::now(),
        };

        let condition = match self.get_doc::<FinalizationFlag>(&key).await? {
            None => PutCondition::DoesNotExist,
            Some((flag, _)) if flag.state == FinalizationState::Started => return Ok(false),
            Some((_, generation)) => PutCondition::GenerationMatch(generation),
        };

        match self.put_doc(&key, &started, condition).await {
            Ok(_) => {
                log::info!("Job {}: finalization claimed", job_id);
                Ok(true)
            }
            Err(StoreError::PreconditionFailed { .. }) => {
                // A retried write may have landed before reporting failure.
                let current = self.get_doc::<FinalizationFlag>(&key).await?;
                Ok(current.is_some_and(|(flag, _)| {
                    flag.state == FinalizationState::Started && flag.owner == token
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-arms the finalization flag so a later completion can claim it.
    pub async fn release_finalization(&self, job_id: &str) -> Result<(), JobError> {
        let now = Utc::now();
        self.update_doc(&keys::finalization_flag(job_id), |current: Option<&FinalizationFlag>| {
            let current = current?;
            if current.state == FinalizationState::Released {
                return None;
            }
            Some(FinalizationFlag {
                state: FinalizationState::Released,
                owner: current.owner.clone(),
                updated_at: now,
            })
        })
        .await?;
        log::info!("Job {}: finalization released", job_id);
        Ok(())
    }

    pub async fn finalization_flag(&self, job_id: &str) -> Result<Option<FinalizationFlag>, JobError> {
        Ok(self
            .get_doc::<FinalizationFlag>(&keys::finalization_flag(job_id))
            .await?
            .map(|(flag, _)| flag))
    }

    // ─── Chapters and pages ───

    pub async fn write_chapter(&self, job_id: &str, record: &ChapterRecord) -> Result<(), JobError> {
        self.put_doc(&keys::chapter(job_id, record.index), record, PutCondition::None)
            .await?;
        Ok(())
    }

    pub async fn read_chapter(&self, job_id: &str, index: usize) -> Result<Option<ChapterRecord>, JobError> {
        Ok(self
            .get_doc::<ChapterRecord>(&keys::chapter(job_id, index))
            .await?
            .map(|(record, _)| record))
    }

    pub async fn write_pages(&self, job_id: &str, pages: &[String]) -> Result<(), JobError> {
        self.put_doc(&keys::pages(job_id), pages, PutCondition::None)
            .await?;
        Ok(())
    }

    pub async fn read_pages(&self, job_id: &str) -> Result<Option<Vec<String>>, JobError> {
        Ok(self
            .get_doc::<Vec<String>>(&keys::pages(job_id))
            .await?
            .map(|(pages, _)| pages))
    }

    // ─── Listing ───

    pub async fn list_jobs(&self) -> Result<Vec<String>, JobError> {
        let keys = self.list_keys(keys::JOBS_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| keys::job_id_from_metadata_key(key))
            .map(str::to_string)
            .collect())
    }

    /// Non-terminal jobs whose `status.json` has not been touched for longer
    /// than `max_age`.
    pub async fn stale_jobs(&self, max_age: chrono::Duration) -> Result<Vec<StatusDocument>, JobError> {
        let cutoff = Utc::now() - max_age;
        let mut stale = Vec::new();
        for job_id in self.list_jobs().await? {
            match self.read_status(&job_id).await {
                Ok(status) if !status.status.is_terminal() && status.updated_at < cutoff => {
                    stale.push(status)
                }
                Ok(_) => {}
                Err(JobError::NotFound { .. }) => {
                    log::warn!("Job {} has metadata but no status document", job_id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stale)
    }

    // ─── Helpers ───

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let store = self.store.as_ref();
        let object = retry(&self.retry, "object get", move || async move {
            store.get(key).await
        })
        .await?;
        Ok(object.map(|o| o.data))
    }

    async fn put_raw(&self, key: &str, data: Vec<u8>, condition: PutCondition) -> Result<u64, StoreError> {
        let store = self.store.as_ref();
        let data = &data;
        retry(&self.retry, "object put", move || async move {
            store.put(key, data.clone(), condition).await
        })
        .await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let store = self.store.as_ref();
        retry(&self.retry, "object list", move || async move {
            store.list(prefix).await
        })
        .await
    }

    async fn get_doc<T>(&self, key: &str) -> Result<Option<(T, u64)>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        let store = self.store.as_ref();
        retry(&self.retry, "document get", move || async move {
            get_json::<T>(store, key).await
        })
        .await
    }

    async fn put_doc<T>(&self, key: &str, value: &T, condition: PutCondition) -> Result<u64, StoreError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let store = self.store.as_ref();
        retry(&self.retry, "document put", move || async move {
            put_json(store, key, value, condition).await
        })
        .await
    }

    /// `update_json` with the store retry budget applied to transient
    /// failures and contention.
    async fn update_doc<T, F>(&self, key: &str, mut apply: F) -> Result<Option<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(Option<&T>) -> Option<T> + Send,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match update_json(self.store.as_ref(), key, &mut apply).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "Update of {} failed (attempt {}/{}): {}; retrying in {:?}",
                        key,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
