use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineSettings;
use crate::jobs::ErrorEntry;
use crate::pipeline::{Pipeline, PipelineError, TaskOutcome};
use crate::queue::{Envelope, LocalQueue};
use crate::retry::RetryPolicy;

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub succeeded: usize,
    pub redelivered: usize,
    /// Deliveries that ended by failing their job.
    pub failed: usize,
}

/// Pulls tasks off a [`LocalQueue`] and runs up to `worker_count` of them
/// concurrently.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    queue: Arc<LocalQueue>,
    worker_count: usize,
    max_deliveries: u32,
    redelivery: RetryPolicy,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, queue: Arc<LocalQueue>, settings: &PipelineSettings) -> Self {
        Self {
            pipeline,
            queue,
            worker_count: settings.worker_count.max(1),
            max_deliveries: settings.max_deliveries.max(1),
            redelivery: settings.retry.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling the token stops intake; tasks already running finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until shut down or until the queue is closed and drained.
    pub async fn run(&self) -> DispatchStats {
        self.dispatch(false).await
    }

    /// Runs until nothing is queued and nothing is in flight.
    pub async fn run_until_idle(&self) -> DispatchStats {
        self.dispatch(true).await
    }

    async fn dispatch(&self, stop_when_idle: bool) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let mut in_flight: JoinSet<(Envelope, Result<TaskOutcome, PipelineError>)> = JoinSet::new();
        let mut drained = false;
        info!("Dispatcher started with {} workers", self.worker_count);

        loop {
            if drained && in_flight.is_empty() {
                break;
            }
            if stop_when_idle && in_flight.is_empty() && self.queue.is_empty() {
                debug!("Queue is idle");
                break;
            }

            let has_capacity = in_flight.len() < self.worker_count;
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, waiting for {} running tasks", in_flight.len());
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok((envelope, result)) => self.settle(envelope, result, &mut stats).await,
                        Err(e) => error!("Task join failed: {}", e),
                    }
                }
                next = self.queue.next(), if has_capacity && !drained => {
                    match next {
                        Some(envelope) => self.spawn(&mut in_flight, envelope),
                        None => drained = true,
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((envelope, result)) => self.settle(envelope, result, &mut stats).await,
                Err(e) => error!("Task join failed: {}", e),
            }
        }

        info!(
            "Dispatcher stopped: {} succeeded, {} redelivered, {} failed",
            stats.succeeded, stats.redelivered, stats.failed
        );
        stats
    }

    fn spawn(
        &self,
        in_flight: &mut JoinSet<(Envelope, Result<TaskOutcome, PipelineError>)>,
        envelope: Envelope,
    ) {
        debug!(
            "Delivering {} for job {} (attempt {})",
            envelope.task.stage(),
            envelope.task.job_id(),
            envelope.attempt
        );
        let pipeline = self.pipeline.clone();
        in_flight.spawn(async move {
            let result = AssertUnwindSafe(pipeline.handle(&envelope.task))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Worker(panic_message(panic.as_ref()))));
            (envelope, result)
        });
    }

    async fn settle(
        &self,
        envelope: Envelope,
        result: Result<TaskOutcome, PipelineError>,
        stats: &mut DispatchStats,
    ) {
        let error = match result {
            Ok(outcome) => {
                debug!("{} for job {} done: {:?}", envelope.task.stage(), envelope.task.job_id(), outcome);
                stats.succeeded += 1;
                return;
            }
            Err(e) => e,
        };

        if error.is_retryable() && envelope.attempt < self.max_deliveries {
            let delay = self.redelivery.delay_for(envelope.attempt);
            warn!(
                "{} for job {} failed (delivery {}/{}): {}; redelivering in {:?}",
                envelope.task.stage(),
                envelope.task.job_id(),
                envelope.attempt,
                self.max_deliveries,
                error,
                delay
            );
            match self.queue.redeliver(envelope.clone(), delay) {
                Ok(()) => {
                    stats.redelivered += 1;
                    return;
                }
                Err(e) => warn!("Could not redeliver: {}", e),
            }
        }

        error!(
            "{} for job {} failed permanently after {} deliveries: {}",
            envelope.task.stage(),
            envelope.task.job_id(),
            envelope.attempt,
            error
        );
        stats.failed += 1;
        let entry = ErrorEntry::error(envelope.task.stage(), error.to_string())
            .with_context("attempts", envelope.attempt);
        if let Err(e) = self
            .pipeline
            .context()
            .jobs
            .fail_job(envelope.task.job_id(), entry)
            .await
        {
            error!("Could not mark job {} failed: {}", envelope.task.job_id(), e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "task panicked: boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(boxed.as_ref()), "task panicked: bad state");

        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "task panicked");
    }
}
