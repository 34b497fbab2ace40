use std::sync::Arc;

use thiserror::Error;

use super::heading;
use crate::ai::{GenerativeService, TocRequest, TocResponse};
use crate::config::TocConfig;
use crate::jobs::TocSource;
use crate::processor::{PagedDocument, ProcessorRegistry};
use crate::retry::{retry_counted, RetryPolicy};

#[derive(Error, Debug)]
pub enum TocError {
    /// Too many distinct headings to be a real chapter structure.
    #[error("Runaway detection: {count} chapters found")]
    Runaway { count: usize },
}

/// A detected chapter start. End pages are derived later from the next
/// chapter's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocChapter {
    pub title: String,
    pub start_page: usize,
}

/// What one strategy produced before the decision was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocAttempt {
    pub source: TocSource,
    pub chapters: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TocOutcome {
    pub source: TocSource,
    pub chapters: Vec<TocChapter>,
    pub attempts: Vec<TocAttempt>,
    /// Non-fatal problems to record on the job (AI failures, rejected answers).
    pub warnings: Vec<String>,
    /// Distinct headings found by the text scan, when it ran.
    pub regex_matches: Option<usize>,
}

/// Layered chapter detection: vision over a narrow window, vision over a
/// wide window, a heading scan of the full text, then the whole book as
/// one chapter. The first strategy reaching `min_chapters` wins.
pub struct TocExtractor {
    ai: Arc<dyn GenerativeService>,
    processors: Arc<ProcessorRegistry>,
    settings: TocConfig,
    retry: RetryPolicy,
}

impl TocExtractor {
    pub fn new(
        ai: Arc<dyn GenerativeService>,
        processors: Arc<ProcessorRegistry>,
        settings: TocConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ai,
            processors,
            settings,
            retry,
        }
    }

    pub async fn extract(
        &self,
        book_title: &str,
        bytes: &[u8],
        document: &PagedDocument,
    ) -> Result<TocOutcome, TocError> {
        let mut attempts = Vec::new();
        let mut warnings = Vec::new();

        for (source, end_page) in [
            (TocSource::VisionNarrow, self.settings.narrow_end_page),
            (TocSource::VisionWide, self.settings.wide_end_page),
        ] {
            let attempt = self
                .attempt_vision(source, end_page, book_title, bytes, document)
                .await;
            match attempt {
                Ok(chapters) if chapters.len() >= self.settings.min_chapters => {
                    log::info!("{} accepted with {} chapters", source, chapters.len());
                    attempts.push(TocAttempt {
                        source,
                        chapters: chapters.len(),
                        error: None,
                    });
                    return Ok(TocOutcome {
                        source,
                        chapters,
                        attempts,
                        warnings,
                        regex_matches: None,
                    });
                }
                Ok(chapters) => {
                    log::info!("{} found only {} chapters", source, chapters.len());
                    attempts.push(TocAttempt {
                        source,
                        chapters: chapters.len(),
                        error: None,
                    });
                }
                Err(message) => {
                    log::warn!("{} failed: {}", source, message);
                    warnings.push(format!("{}: {}", source, message));
                    attempts.push(TocAttempt {
                        source,
                        chapters: 0,
                        error: Some(message),
                    });
                }
            }
        }

        let matches = heading::scan_headings(&document.pages);
        let count = heading::distinct_count(&matches);
        log::info!("Heading scan found {} distinct headings", count);
        if count > self.settings.runaway_limit {
            return Err(TocError::Runaway { count });
        }
        if count >= self.settings.min_chapters {
            let chapters: Vec<TocChapter> =
                heading::resolve_chapters(&matches, self.settings.contents_page_threshold)
                    .into_iter()
                    .map(|m| TocChapter {
                        title: m.title,
                        start_page: m.page,
                    })
                    .collect();
            attempts.push(TocAttempt {
                source: TocSource::Regex,
                chapters: chapters.len(),
                error: None,
            });
            return Ok(TocOutcome {
                source: TocSource::Regex,
                chapters,
                attempts,
                warnings,
                regex_matches: Some(count),
            });
        }
        attempts.push(TocAttempt {
            source: TocSource::Regex,
            chapters: count,
            error: None,
        });

        log::info!("Falling back to a single chapter for '{}'", book_title);
        attempts.push(TocAttempt {
            source: TocSource::SingleChapter,
            chapters: 1,
            error: None,
        });
        Ok(TocOutcome {
            source: TocSource::SingleChapter,
            chapters: vec![TocChapter {
                title: book_title.to_string(),
                start_page: 1,
            }],
            attempts,
            warnings,
            regex_matches: Some(count),
        })
    }

    /// Runs one vision pass. `Err` carries a message for the job's warnings.
    async fn attempt_vision(
        &self,
        source: TocSource,
        end_page: usize,
        book_title: &str,
        bytes: &[u8],
        document: &PagedDocument,
    ) -> Result<Vec<TocChapter>, String> {
        let page_count = document.page_count();
        let start = self.settings.scan_start_page.min(page_count).max(1);
        let end = end_page.min(page_count).max(start);

        let payload = self
            .processors
            .window(bytes, start, end)
            .map_err(|e| format!("could not cut pages {}-{}: {}", start, end, e))?;

        let request = TocRequest {
            book_title: book_title.to_string(),
            page_count,
            window_start: start,
            window_end: end,
            payload,
        };

        let ai = &self.ai;
        let request = &request;
        let (result, attempts) = retry_counted(&self.retry, "detect_toc", move || async move {
            ai.detect_toc(request).await
        })
        .await;
        let response = result.map_err(|e| format!("{} after {} attempt(s)", e, attempts))?;

        log::debug!(
            "{} returned {} raw entries for pages {}-{}",
            source,
            response.chapters.len(),
            start,
            end
        );
        Ok(validate_vision(&response, page_count))
    }
}

/// Drops entries without a usable start page, names untitled entries,
/// orders by start page and keeps the first entry per page.
pub fn validate_vision(response: &TocResponse, page_count: usize) -> Vec<TocChapter> {
    let mut chapters: Vec<TocChapter> = response
        .chapters
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let start_page = entry
                .content_start_page
                .filter(|&p| p >= 1 && p <= page_count)?;
            let title = entry.display_title();
            let title = if title.is_empty() {
                format!("Chapter {}", i + 1)
            } else {
                title
            };
            Some(TocChapter { title, start_page })
        })
        .collect();

    chapters.sort_by_key(|c| c.start_page);
    chapters.dedup_by_key(|c| c.start_page);
    chapters
}
