use std::sync::Arc;

use crate::ai::GenerativeService;
use crate::concepts::{ConceptNormalizer, VaultIndex};
use crate::jobs::JobStore;
use crate::processor::{DocumentSource, PagedDocument, ProcessorRegistry};
use crate::queue::TaskQueue;
use crate::retry::retry;
use crate::store::ObjectStore;

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::progress::{NoopProgress, ProgressReporter};

/// Collaborators shared by the stage handlers.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    pub jobs: JobStore,
    pub queue: Arc<dyn TaskQueue>,
    pub source: Arc<dyn DocumentSource>,
    pub ai: Arc<dyn GenerativeService>,
    /// Vault the book notes, indexes and concept lists are written to.
    pub output: Arc<dyn ObjectStore>,
    pub processors: Arc<ProcessorRegistry>,
    pub progress: Arc<dyn ProgressReporter>,
}

impl PipelineContext {
    pub fn new(
        config: Arc<PipelineConfig>,
        jobs: JobStore,
        queue: Arc<dyn TaskQueue>,
        source: Arc<dyn DocumentSource>,
        ai: Arc<dyn GenerativeService>,
        output: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            jobs,
            queue,
            source,
            ai,
            output,
            processors: Arc::new(ProcessorRegistry::new()),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn concepts(&self) -> ConceptNormalizer {
        ConceptNormalizer::new(self.output.clone(), &self.config.vault.config_prefix)
    }

    pub fn vault_index(&self) -> VaultIndex {
        VaultIndex::new(self.output.clone(), &self.config.vault)
    }

    pub async fn fetch_document(&self, file_id: &str) -> Result<Vec<u8>, PipelineError> {
        let source = &self.source;
        let bytes = retry(&self.config.retry, "fetch document", move || async move {
            source.get_bytes(file_id).await
        })
        .await?;
        Ok(bytes)
    }

    /// Page extraction runs on the blocking pool; PDF parsing is CPU-bound.
    pub async fn extract_pages(
        &self,
        bytes: Vec<u8>,
    ) -> Result<(Vec<u8>, PagedDocument), PipelineError> {
        let processors = self.processors.clone();
        let (bytes, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = processors.extract_pages(&bytes);
            (bytes, extracted)
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?;
        Ok((bytes, extracted?))
    }
}
