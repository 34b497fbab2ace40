//! Durable job and chapter state.
//!
//! Everything lives under `jobs/{job_id}/` in an [`ObjectStore`](crate::store::ObjectStore);
//! see [`keys`] for the exact layout.

pub mod model;
pub mod store;

pub use model::{
    ChapterRecord, ChapterStatus, ErrorEntry, FinalizationFlag, FinalizationState, JobMetadata,
    JobStatus, StatusDetails, StatusDocument, TocSource,
};
pub use store::JobStore;

/// Object keys for job artifacts.
pub mod keys {
    pub const JOBS_PREFIX: &str = "jobs/";

    pub fn metadata(job_id: &str) -> String {
        format!("jobs/{}/metadata.json", job_id)
    }

    pub fn status(job_id: &str) -> String {
        format!("jobs/{}/status.json", job_id)
    }

    pub fn errors(job_id: &str) -> String {
        format!("jobs/{}/errors.json", job_id)
    }

    pub fn chapter(job_id: &str, index: usize) -> String {
        format!("jobs/{}/chapters/{}.json", job_id, index)
    }

    pub fn completed_prefix(job_id: &str) -> String {
        format!("jobs/{}/completed/", job_id)
    }

    pub fn completed_marker(job_id: &str, index: usize) -> String {
        format!("jobs/{}/completed/{}", job_id, index)
    }

    pub fn finalization_flag(job_id: &str) -> String {
        format!("jobs/{}/finalization_started", job_id)
    }

    pub fn pages(job_id: &str) -> String {
        format!("jobs/{}/pages.json", job_id)
    }

    /// Extracts the job id from a `jobs/{id}/metadata.json` key.
    pub fn job_id_from_metadata_key(key: &str) -> Option<&str> {
        key.strip_prefix(JOBS_PREFIX)?
            .strip_suffix("/metadata.json")
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }

}
