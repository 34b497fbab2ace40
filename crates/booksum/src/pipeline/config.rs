use std::time::Duration;

use crate::config::{BooksumConfig, ChapterFailurePolicy, TocConfig, VaultConfig};
use crate::retry::RetryPolicy;

/// Settings shared by every stage, derived once from [`BooksumConfig`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub toc: TocConfig,
    pub vault: VaultConfig,
    /// Spacing between consecutive chapter tasks.
    pub inter_task_delay: Duration,
    pub max_chapter_chars: usize,
    pub concept_hint_limit: usize,
    pub chapter_failure_policy: ChapterFailurePolicy,
    pub default_category: String,
    /// Budget for AI calls within one delivery.
    pub retry: RetryPolicy,
    /// How long a claimed finalization may sit before recovery re-enqueues it.
    pub finalization_lease: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &BooksumConfig) -> Self {
        Self {
            toc: config.toc.clone(),
            vault: config.vault.clone(),
            inter_task_delay: Duration::from_secs(config.pipeline.inter_task_delay_secs),
            max_chapter_chars: config.pipeline.max_chapter_chars,
            concept_hint_limit: config.pipeline.concept_hint_limit,
            chapter_failure_policy: config.pipeline.chapter_failure_policy,
            default_category: config.pipeline.default_category.clone(),
            retry: config.pipeline.retry.clone(),
            finalization_lease: Duration::from_secs(config.pipeline.finalization_lease_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&BooksumConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_copies_pipeline_settings() {
        let mut config = BooksumConfig::default();
        config.pipeline.inter_task_delay_secs = 5;
        config.pipeline.chapter_failure_policy = ChapterFailurePolicy::BestEffort;
        config.toc.narrow_end_page = 20;

        let pipeline = PipelineConfig::from_config(&config);
        assert_eq!(pipeline.inter_task_delay, Duration::from_secs(5));
        assert_eq!(pipeline.chapter_failure_policy, ChapterFailurePolicy::BestEffort);
        assert_eq!(pipeline.toc.narrow_end_page, 20);
        assert_eq!(pipeline.max_chapter_chars, 50_000);
    }
}
