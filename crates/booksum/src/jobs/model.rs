use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle. Transitions only move forward; `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Preparing,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Preparing => 1,
            JobStatus::Processing => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` goes forward. Staying in the same
    /// non-terminal status is allowed so details can be refreshed. `Completed`
    /// is only reachable from `Processing`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Completed => self == JobStatus::Processing,
            _ => next.rank() >= self.rank(),
        }
    }

    /// At or past the fan-out point.
    pub fn has_fanned_out(self) -> bool {
        self.rank() >= JobStatus::Processing.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Preparing => "preparing",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Which TOC strategy produced the chapter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TocSource {
    VisionNarrow,
    VisionWide,
    Regex,
    SingleChapter,
}

impl TocSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TocSource::VisionNarrow => "vision_narrow",
            TocSource::VisionWide => "vision_wide",
            TocSource::Regex => "regex",
            TocSource::SingleChapter => "single_chapter",
        }
    }
}

impl fmt::Display for TocSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `jobs/{job_id}/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: String,
    pub file_id: String,
    pub status: JobStatus,
    pub book_title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub category: String,
    #[serde(default)]
    pub total_chapters: Option<usize>,
    #[serde(default)]
    pub completed_chapters: Vec<usize>,
    #[serde(default)]
    pub toc_source: Option<TocSource>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default, rename = "newConcepts")]
    pub new_concepts: Vec<String>,
    #[serde(default)]
    pub output_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// `jobs/{job_id}/status.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub job_id: String,
    pub status: JobStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub details: StatusDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub current_chapter: Option<usize>,
    #[serde(default)]
    pub total_chapters: Option<usize>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusDetails {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_progress(mut self, completed: usize, total: usize) -> Self {
        self.current_chapter = Some(completed);
        self.total_chapters = Some(total);
        self.progress = Some(format!("{}/{}", completed, total));
        self
    }
}

/// `jobs/{job_id}/chapters/{index}.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub index: usize,
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
    pub status: ChapterStatus,
    #[serde(default)]
    pub summary_text: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ChapterRecord {
    pub fn pending(index: usize, title: impl Into<String>, start_page: usize, end_page: usize) -> Self {
        Self {
            index,
            title: title.into(),
            start_page,
            end_page,
            status: ChapterStatus::Pending,
            summary_text: String::new(),
            concepts: Vec::new(),
            retry_count: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// One entry of `jobs/{job_id}/errors.json`. Exactly one of `error` or
/// `warning` carries the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn error(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: Some(message.into()),
            warning: None,
            context: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn warning(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: None,
            warning: Some(message.into()),
            context: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn message(&self) -> &str {
        self.error
            .as_deref()
            .or(self.warning.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationState {
    Started,
    Released,
}

/// `jobs/{job_id}/finalization_started`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizationFlag {
    pub state: FinalizationState,
    /// Token of the caller that last flipped the flag to `Started`.
    pub owner: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Preparing));
        assert!(JobStatus::Preparing.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Processing));

        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Preparing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_completed_only_from_processing() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Preparing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Preparing.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_has_fanned_out() {
        assert!(!JobStatus::Preparing.has_fanned_out());
        assert!(JobStatus::Processing.has_fanned_out());
        assert!(JobStatus::Failed.has_fanned_out());
    }

    #[test]
    fn test_metadata_uses_stable_field_names() {
        let now = Utc::now();
        let metadata = JobMetadata {
            job_id: "j1".to_string(),
            file_id: "book.pdf".to_string(),
            status: JobStatus::Queued,
            book_title: "book".to_string(),
            author: None,
            category: "Business".to_string(),
            total_chapters: None,
            completed_chapters: vec![],
            toc_source: Some(TocSource::VisionNarrow),
            concepts: vec![],
            new_concepts: vec!["Flow".to_string()],
            output_uri: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["status"], "queued");
        assert_eq!(value["toc_source"], "vision_narrow");
        assert_eq!(value["newConcepts"][0], "Flow");
        assert!(value.get("completed_chapters").is_some());
        assert!(value.get("file_id").is_some());
    }

    #[test]
    fn test_error_entry_shape() {
        let entry = ErrorEntry::error("toc_extraction", "Runaway detection: 137 chapters found")
            .with_context("regex_matches", 137);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["stage"], "toc_extraction");
        assert_eq!(value["error"], "Runaway detection: 137 chapters found");
        assert!(value.get("warning").is_none());
        assert_eq!(value["context"]["regex_matches"], 137);
        assert_eq!(entry.message(), "Runaway detection: 137 chapters found");
    }

    #[test]
    fn test_warning_entry_omits_error() {
        let entry = ErrorEntry::warning("toc_extraction", "vision_narrow found 1 chapter");
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("error").is_none());
        assert!(value.get("context").is_none());
        assert!(!entry.is_error());
    }

    #[test]
    fn test_progress_details() {
        let details = StatusDetails::stage("chapter_summary").with_progress(2, 5);
        assert_eq!(details.progress.as_deref(), Some("2/5"));
        assert_eq!(details.current_chapter, Some(2));
    }
}
