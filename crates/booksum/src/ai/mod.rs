//! Generative AI service used for TOC detection and summarization.
//!
//! The pipeline talks to the [`GenerativeService`] trait only; [`GeminiService`]
//! is the HTTP implementation.

pub mod gemini;
pub mod prompts;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::processor::WindowPayload;
use crate::retry::Retryable;

pub use gemini::GeminiService;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("Rate limited by the AI service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transient AI service failure: {0}")]
    Transient(String),

    #[error("Malformed AI response: {0}")]
    InvalidResponse(String),

    #[error("AI request rejected: {0}")]
    Fatal(String),

    #[error("AI service misconfigured: {0}")]
    Configuration(String),

    #[error("AI request cancelled")]
    Cancelled,
}

impl Retryable for AiError {
    fn is_retryable(&self) -> bool {
        matches!(self, AiError::RateLimited { .. } | AiError::Transient(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ─── Requests ───

/// Vision TOC request over a page window of the document.
#[derive(Debug, Clone)]
pub struct TocRequest {
    pub book_title: String,
    pub page_count: usize,
    /// First page of the window, 1-based.
    pub window_start: usize,
    /// Last page of the window, inclusive.
    pub window_end: usize,
    pub payload: WindowPayload,
}

#[derive(Debug, Clone)]
pub struct ChapterRequest {
    pub book_title: String,
    pub chapter_title: String,
    pub text: String,
    /// Existing concept names the model should prefer.
    pub concept_hints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BookRequest {
    pub book_title: String,
    pub category: String,
    /// `(title, summary)` per chapter in index order.
    pub chapters: Vec<(String, String)>,
    pub concepts: Vec<String>,
}

// ─── Responses ───

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TocResponse {
    #[serde(default, alias = "chapters_in_this_volume")]
    pub chapters: Vec<TocEntry>,
    #[serde(default)]
    pub volume_info: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub number: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Printed or physical start page. Strings are reduced to their digits;
    /// anything without digits becomes `None`.
    #[serde(default, deserialize_with = "lenient_page")]
    pub content_start_page: Option<usize>,
}

impl TocEntry {
    /// `"{number} {title}"`, trimmed.
    pub fn display_title(&self) -> String {
        match self.number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() && !self.title.contains(number) => {
                format!("{} {}", number, self.title.trim()).trim().to_string()
            }
            _ => self.title.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    #[serde(default, deserialize_with = "text_or_lines")]
    pub summary: String,
    #[serde(default, alias = "keyConcepts")]
    pub concepts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "suggestedSubfolder")]
    pub suggested_subfolder: Option<String>,
    #[serde(default, alias = "allKeyConcepts")]
    pub all_key_concepts: Vec<String>,
    #[serde(default, deserialize_with = "text_or_lines")]
    pub summary: String,
}

#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn detect_toc(&self, request: &TocRequest) -> Result<TocResponse, AiError>;

    async fn summarize_chapter(&self, request: &ChapterRequest) -> Result<ChapterSummary, AiError>;

    async fn summarize_book(&self, request: &BookRequest) -> Result<BookSummary, AiError>;
}

/// Removes a surrounding Markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Decodes a model's JSON answer, tolerating code fences.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, AiError> {
    serde_json::from_str(strip_code_fences(text))
        .map_err(|e| AiError::InvalidResponse(format!("{} in {:.200}", e, text)))
}

fn lenient_page<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(serde_json::Value::String(s)) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn text_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toc_response_accepts_both_list_fields() {
        let a: TocResponse =
            serde_json::from_str(r#"{"chapters":[{"number":"第1章","title":"序","content_start_page":5}]}"#)
                .unwrap();
        let b: TocResponse = serde_json::from_str(
            r#"{"volume_info":"上巻","chapters_in_this_volume":[{"title":"序","content_start_page":"p.5"}]}"#,
        )
        .unwrap();

        assert_eq!(a.chapters[0].content_start_page, Some(5));
        assert_eq!(b.chapters[0].content_start_page, Some(5));
        assert_eq!(b.volume_info.as_deref(), Some("上巻"));
    }

    #[test]
    fn test_non_numeric_page_becomes_none() {
        let response: TocResponse = serde_json::from_str(
            r#"{"chapters":[{"title":"x","content_start_page":"unknown"},{"title":"y","content_start_page":null},{"title":"z"}]}"#,
        )
        .unwrap();
        assert!(response.chapters.iter().all(|c| c.content_start_page.is_none()));
    }

    #[test]
    fn test_display_title_joins_number_and_title() {
        let entry = TocEntry {
            number: Some("第1章".to_string()),
            title: "戦略とは何か".to_string(),
            content_start_page: Some(5),
        };
        assert_eq!(entry.display_title(), "第1章 戦略とは何か");

        let already = TocEntry {
            number: Some("Chapter 2".to_string()),
            title: "Chapter 2: Scale".to_string(),
            content_start_page: Some(9),
        };
        assert_eq!(already.display_title(), "Chapter 2: Scale");
    }

    #[test]
    fn test_chapter_summary_accepts_key_concepts_and_lists() {
        let summary: ChapterSummary = serde_json::from_str(
            r#"{"summary":["- one","- two"],"keyConcepts":["Flow","Focus"]}"#,
        )
        .unwrap();
        assert_eq!(summary.summary, "- one\n- two");
        assert_eq!(summary.concepts, vec!["Flow", "Focus"]);
    }

    #[test]
    fn test_book_summary_camel_case_fields() {
        let book: BookSummary = serde_json::from_str(
            r#"{"title":"Deep Work","author":"Cal Newport","suggestedSubfolder":"Productivity","allKeyConcepts":["Focus"],"summary":"..."}"#,
        )
        .unwrap();
        assert_eq!(book.suggested_subfolder.as_deref(), Some("Productivity"));
        assert_eq!(book.all_key_concepts, vec!["Focus"]);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn test_parse_json_response_reports_invalid() {
        let result: Result<TocResponse, _> = parse_json_response("not json");
        assert!(matches!(result, Err(AiError::InvalidResponse(_))));
    }

    #[test]
    fn test_retry_classification() {
        let limited = AiError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert!(AiError::Transient("timeout".into()).is_retryable());
        assert!(!AiError::InvalidResponse("x".into()).is_retryable());
        assert!(!AiError::Fatal("401".into()).is_retryable());
    }
}
