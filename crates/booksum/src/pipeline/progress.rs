use std::sync::Mutex;

/// Events emitted by the stages as a job moves along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage {
        job_id: String,
        stage: String,
        message: String,
    },
    ChapterFinished {
        job_id: String,
        chapter_index: usize,
        completed: usize,
        total: usize,
    },
    Completed {
        job_id: String,
        output_uri: String,
    },
    Failed {
        job_id: String,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes every event to the log.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage {
                job_id,
                stage,
                message,
            } => log::info!("[{}] {}: {}", job_id, stage, message),
            ProgressEvent::ChapterFinished {
                job_id,
                chapter_index,
                completed,
                total,
            } => log::info!(
                "[{}] chapter {} finished ({}/{})",
                job_id,
                chapter_index,
                completed,
                total
            ),
            ProgressEvent::Completed { job_id, output_uri } => {
                log::info!("[{}] completed: {}", job_id, output_uri)
            }
            ProgressEvent::Failed { job_id, error } => log::error!("[{}] failed: {}", job_id, error),
        }
    }
}

/// Keeps events in memory for inspection.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
