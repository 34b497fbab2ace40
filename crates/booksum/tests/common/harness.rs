//! Test harness for running the pipeline in-process.
//!
//! Every collaborator is in memory: job state, the vault, the document inbox
//! and the queue. Tasks are driven by hand with [`TestHarness::run_all`] or
//! through a [`Dispatcher`].

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use booksum::ai::{
    AiError, BookRequest, BookSummary, ChapterRequest, ChapterSummary, GenerativeService,
    TocRequest, TocResponse,
};
use booksum::config::{ChapterFailurePolicy, PipelineSettings};
use booksum::jobs::{JobMetadata, JobStore, StatusDocument};
use booksum::pipeline::{
    Pipeline, PipelineConfig, PipelineContext, RecordingProgress, TaskOutcome,
};
use booksum::processor::ObjectStoreDocumentSource;
use booksum::queue::{LocalQueue, Task};
use booksum::retry::RetryPolicy;
use booksum::store::{MemoryStore, ObjectStore, PutCondition, StoredObject};
use booksum::{Dispatcher, StoreError};

/// Scripted generative service.
///
/// TOC answers are served in order and default to an empty TOC. Chapter
/// summaries succeed unless the chapter title was marked as failing.
#[derive(Default)]
pub struct FakeAi {
    toc_answers: Mutex<VecDeque<Result<TocResponse, AiError>>>,
    toc_windows: Mutex<Vec<(usize, usize)>>,
    failing_chapters: Mutex<HashSet<String>>,
    chapter_hints: Mutex<Vec<Vec<String>>>,
    book_answer: Mutex<Option<BookSummary>>,
    fail_book: Mutex<bool>,
    pub chapter_calls: AtomicUsize,
    pub book_calls: AtomicUsize,
}

impl FakeAi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_toc(&self, answer: TocResponse) {
        self.toc_answers.lock().unwrap().push_back(Ok(answer));
    }

    pub fn push_toc_error(&self, error: AiError) {
        self.toc_answers.lock().unwrap().push_back(Err(error));
    }

    /// Page windows the TOC requests covered, in call order.
    pub fn toc_windows(&self) -> Vec<(usize, usize)> {
        self.toc_windows.lock().unwrap().clone()
    }

    pub fn fail_chapter(&self, title: &str) {
        self.failing_chapters.lock().unwrap().insert(title.to_string());
    }

    pub fn heal_chapters(&self) {
        self.failing_chapters.lock().unwrap().clear();
    }

    pub fn chapter_hints(&self) -> Vec<Vec<String>> {
        self.chapter_hints.lock().unwrap().clone()
    }

    pub fn set_book(&self, summary: BookSummary) {
        *self.book_answer.lock().unwrap() = Some(summary);
    }

    pub fn fail_book(&self) {
        *self.fail_book.lock().unwrap() = true;
    }

    pub fn chapter_calls(&self) -> usize {
        self.chapter_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeService for FakeAi {
    async fn detect_toc(&self, request: &TocRequest) -> Result<TocResponse, AiError> {
        self.toc_windows
            .lock()
            .unwrap()
            .push((request.window_start, request.window_end));
        self.toc_answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TocResponse::default()))
    }

    async fn summarize_chapter(&self, request: &ChapterRequest) -> Result<ChapterSummary, AiError> {
        self.chapter_calls.fetch_add(1, Ordering::SeqCst);
        self.chapter_hints
            .lock()
            .unwrap()
            .push(request.concept_hints.clone());
        if self.failing_chapters.lock().unwrap().contains(&request.chapter_title) {
            return Err(AiError::Fatal(format!("refused {}", request.chapter_title)));
        }
        Ok(ChapterSummary {
            summary: format!(
                "- Key points of {} ({} chars)",
                request.chapter_title,
                request.text.chars().count()
            ),
            concepts: vec!["Deep Work".to_string(), format!("{} idea", request.chapter_title)],
        })
    }

    async fn summarize_book(&self, request: &BookRequest) -> Result<BookSummary, AiError> {
        self.book_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_book.lock().unwrap() {
            return Err(AiError::Fatal("book summary refused".to_string()));
        }
        Ok(self.book_answer.lock().unwrap().clone().unwrap_or_else(|| BookSummary {
            title: Some(request.book_title.clone()),
            author: Some("A. Writer".to_string()),
            suggested_subfolder: Some("Productivity".to_string()),
            all_key_concepts: vec!["Deep Work".to_string(), "Focus".to_string()],
            summary: format!("A book in {} chapters.", request.chapters.len()),
        }))
    }
}

/// Job store that can lose `status.json` writes carrying a given status,
/// leaving the status file behind `metadata.json`.
pub struct StatusWriteFaults {
    inner: Arc<MemoryStore>,
    failing: Mutex<Option<(String, usize)>>,
}

impl StatusWriteFaults {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: Mutex::new(None),
        })
    }

    /// Fails the next `count` writes of `status.json` whose status is `status`.
    pub fn fail_status_writes(&self, status: &str, count: usize) {
        *self.failing.lock().unwrap() = Some((status.to_string(), count));
    }

    fn should_fail(&self, key: &str, data: &[u8]) -> bool {
        if !key.ends_with("/status.json") {
            return false;
        }
        let mut failing = self.failing.lock().unwrap();
        let Some((status, remaining)) = failing.as_mut() else {
            return false;
        };
        let written: serde_json::Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if *remaining == 0 || written["status"] != status.as_str() {
            return false;
        }
        *remaining -= 1;
        true
    }
}

#[async_trait]
impl ObjectStore for StatusWriteFaults {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Vec<u8>, condition: PutCondition) -> Result<u64, StoreError> {
        if self.should_fail(key, &data) {
            return Err(StoreError::Unavailable {
                message: format!("lost write of {}", key),
            });
        }
        self.inner.put(key, data, condition).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    fn uri(&self, key: &str) -> String {
        self.inner.uri(key)
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5))
}

/// Isolated pipeline over in-memory collaborators.
pub struct TestHarness {
    pub job_objects: Arc<MemoryStore>,
    /// Fault injection in front of `job_objects`.
    pub status_faults: Arc<StatusWriteFaults>,
    pub vault: Arc<MemoryStore>,
    pub documents: Arc<MemoryStore>,
    pub queue: Arc<LocalQueue>,
    pub ai: Arc<FakeAi>,
    pub jobs: JobStore,
    pub progress: Arc<RecordingProgress>,
    pub config: Arc<PipelineConfig>,
    pub pipeline: Arc<Pipeline>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_policy(ChapterFailurePolicy::Block)
    }

    pub fn with_policy(policy: ChapterFailurePolicy) -> Self {
        let config = PipelineConfig {
            inter_task_delay: Duration::ZERO,
            chapter_failure_policy: policy,
            retry: fast_retry(),
            ..PipelineConfig::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let job_objects = Arc::new(MemoryStore::new());
        let vault = Arc::new(MemoryStore::new());
        let documents = Arc::new(MemoryStore::new());
        let queue = Arc::new(LocalQueue::new());
        let ai = FakeAi::new();
        let progress = Arc::new(RecordingProgress::new());
        let config = Arc::new(config);

        let status_faults = StatusWriteFaults::new(job_objects.clone());
        let jobs = JobStore::new(status_faults.clone()).with_retry_policy(fast_retry());
        let ctx = PipelineContext::new(
            config.clone(),
            jobs.clone(),
            queue.clone(),
            Arc::new(ObjectStoreDocumentSource::new(documents.clone())),
            ai.clone(),
            vault.clone(),
        )
        .with_progress(progress.clone());

        Self {
            job_objects,
            status_faults,
            vault,
            documents,
            queue,
            ai,
            jobs,
            progress,
            config,
            pipeline: Arc::new(Pipeline::new(ctx)),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        self.pipeline.context()
    }

    /// Uploads `bytes` as `inbox/{name}`.
    pub async fn add_document(&self, name: &str, bytes: Vec<u8>) {
        self.documents
            .put(&format!("inbox/{}", name), bytes, PutCondition::None)
            .await
            .expect("Failed to upload document");
    }

    /// Uploads the document and creates a job for it. The prepare task is
    /// left on the queue.
    pub async fn submit(&self, name: &str, bytes: Vec<u8>) -> String {
        self.add_document(name, bytes).await;
        self.pipeline
            .orchestrator()
            .create_job(name, Some("Business"))
            .await
            .expect("Failed to create job")
            .job_id
    }

    /// Delivers queued tasks one by one, ignoring their delays, until the
    /// queue is empty. Handler errors fail the test.
    pub async fn run_all(&self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let batch = self.queue.take_all();
            if batch.is_empty() {
                return outcomes;
            }
            for envelope in batch {
                let outcome = self
                    .pipeline
                    .handle(&envelope.task)
                    .await
                    .unwrap_or_else(|e| panic!("{:?} failed: {}", envelope.task, e));
                outcomes.push(outcome);
            }
        }
    }

    /// Delivers only the tasks queued right now.
    pub async fn run_batch(&self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        for envelope in self.queue.take_all() {
            outcomes.push(self.pipeline.handle(&envelope.task).await.unwrap());
        }
        outcomes
    }

    pub fn dispatcher(&self, worker_count: usize) -> Dispatcher {
        let settings = PipelineSettings {
            worker_count,
            max_deliveries: 3,
            retry: fast_retry(),
            ..PipelineSettings::default()
        };
        Dispatcher::new(self.pipeline.clone(), self.queue.clone(), &settings)
    }

    pub fn queued_chapter_tasks(&self) -> usize {
        self.queue
            .pending_tasks()
            .iter()
            .filter(|t| matches!(t, Task::Chapter(_)))
            .count()
    }

    pub fn queued_finalize_tasks(&self) -> usize {
        self.queue
            .pending_tasks()
            .iter()
            .filter(|t| matches!(t, Task::Finalize { .. }))
            .count()
    }

    pub async fn metadata(&self, job_id: &str) -> JobMetadata {
        self.jobs.read_metadata(job_id).await.unwrap()
    }

    pub async fn status(&self, job_id: &str) -> StatusDocument {
        self.jobs.read_status(job_id).await.unwrap()
    }

    /// Text of a vault object.
    pub async fn vault_text(&self, key: &str) -> Option<String> {
        self.vault
            .get(key)
            .await
            .unwrap()
            .map(|o| String::from_utf8(o.data).unwrap())
    }
}
