use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Envelope, Task, TaskQueue};
use crate::error::QueueError;

struct Scheduled {
    ready_at: Instant,
    seq: u64,
    envelope: Envelope,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap and the earliest entry must surface first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    entries: BinaryHeap<Scheduled>,
    seq: u64,
    closed: bool,
}

/// In-process delayed queue.
pub struct LocalQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn schedule(&self, envelope: Envelope, delay: Duration) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.seq += 1;
            let seq = state.seq;
            state.entries.push(Scheduled {
                ready_at: Instant::now() + delay,
                seq,
                envelope,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Puts a failed delivery back with its attempt count bumped.
    pub fn redeliver(&self, envelope: Envelope, delay: Duration) -> Result<(), QueueError> {
        let envelope = Envelope {
            attempt: envelope.attempt + 1,
            ..envelope
        };
        self.schedule(envelope, delay)
    }

    /// Waits for the next deliverable task. Returns `None` once the queue is
    /// closed and drained. Dropping the future loses nothing.
    pub async fn next(&self) -> Option<Envelope> {
        loop {
            let wait = {
                let mut state = self.lock();
                match state.entries.peek() {
                    Some(head) if head.ready_at <= Instant::now() => {
                        return state.entries.pop().map(|s| s.envelope);
                    }
                    Some(head) => Some(head.ready_at),
                    None if state.closed => return None,
                    None => None,
                }
            };

            match wait {
                Some(ready_at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(ready_at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Pops a task that is deliverable right now.
    pub fn try_next(&self) -> Option<Envelope> {
        let mut state = self.lock();
        match state.entries.peek() {
            Some(head) if head.ready_at <= Instant::now() => state.entries.pop().map(|s| s.envelope),
            _ => None,
        }
    }

    /// Removes every entry regardless of its delay, earliest first.
    pub fn take_all(&self) -> Vec<Envelope> {
        let mut state = self.lock();
        let mut taken = Vec::with_capacity(state.entries.len());
        while let Some(entry) = state.entries.pop() {
            taken.push(entry.envelope);
        }
        taken
    }

    /// Snapshot of queued tasks, earliest first.
    pub fn pending_tasks(&self) -> Vec<Task> {
        let state = self.lock();
        let mut entries: Vec<&Scheduled> = state.entries.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.iter().map(|s| s.envelope.task.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further enqueues; [`LocalQueue::next`] drains what is left.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<(), QueueError> {
        log::debug!(
            "Enqueue {} for job {} in {:?}",
            task.stage(),
            task.job_id(),
            delay
        );
        self.schedule(Envelope { task, attempt: 1 }, delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(id: &str) -> Task {
        Task::Prepare {
            job_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fifo_for_equal_delays() {
        let queue = LocalQueue::new();
        queue.enqueue(prepare("a"), Duration::ZERO).await.unwrap();
        queue.enqueue(prepare("b"), Duration::ZERO).await.unwrap();

        assert_eq!(queue.next().await.unwrap().task.job_id(), "a");
        assert_eq!(queue.next().await.unwrap().task.job_id(), "b");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_task_waits_for_its_time() {
        let queue = LocalQueue::new();
        queue
            .enqueue(prepare("late"), Duration::from_secs(60))
            .await
            .unwrap();
        queue.enqueue(prepare("now"), Duration::ZERO).await.unwrap();

        assert_eq!(queue.next().await.unwrap().task.job_id(), "now");
        assert!(queue.try_next().is_none());

        let started = Instant::now();
        assert_eq!(queue.next().await.unwrap().task.job_id(), "late");
        assert!(started.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_redeliver_bumps_attempt() {
        let queue = LocalQueue::new();
        queue.enqueue(prepare("a"), Duration::ZERO).await.unwrap();
        let first = queue.next().await.unwrap();
        assert_eq!(first.attempt, 1);

        queue.redeliver(first, Duration::ZERO).unwrap();
        assert_eq!(queue.next().await.unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let queue = LocalQueue::new();
        queue.enqueue(prepare("a"), Duration::ZERO).await.unwrap();
        queue.close();

        assert!(matches!(
            queue.enqueue(prepare("b"), Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
        assert!(queue.next().await.is_some());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_take_all_ignores_delays() {
        let queue = LocalQueue::new();
        queue
            .enqueue(prepare("b"), Duration::from_secs(120))
            .await
            .unwrap();
        queue
            .enqueue(prepare("a"), Duration::from_secs(60))
            .await
            .unwrap();

        let ids: Vec<String> = queue
            .pending_tasks()
            .iter()
            .map(|t| t.job_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let taken = queue.take_all();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].task.job_id(), "a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(LocalQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(prepare("a"), Duration::ZERO).await.unwrap();

        let envelope = consumer.await.unwrap().unwrap();
        assert_eq!(envelope.task.job_id(), "a");
    }
}
