use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::types::Priority;

/// A task waiting in the queue, plus the channel its result goes back on.
pub(super) struct QueuedTask {
    pub task_id: String,
    pub algorithm_id: String,
    pub payload: Value,
    pub vertex_id: String,
    pub priority: Priority,
    pub sequence: u64,
    pub submitted_at: DateTime<Utc>,
    pub responder: oneshot::Sender<Result<Value>>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

// Reversed so the max-heap yields the most urgent priority first, then the
// earliest submission within a tier.
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Shared priority queue polled by the worker pool.
#[derive(Default)]
pub(super) struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    available: Notify,
}

impl TaskQueue {
    pub fn push(&self, task: QueuedTask) {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
        self.available.notify_one();
    }

    /// Pop unless `shutdown` is set. The flag is read under the heap lock,
    /// and [`halt`](Self::halt) sets it under the same lock, so no task
    /// leaves the queue once shutdown has been signalled.
    fn try_pop(&self, shutdown: &AtomicBool) -> Option<QueuedTask> {
        let mut heap = self
            .heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if shutdown.load(Ordering::Acquire) {
            return None;
        }
        heap.pop()
    }

    /// Wait up to `timeout` for a task. Returns `None` on timeout or once
    /// `shutdown` is set.
    pub async fn pop_timeout(&self, timeout: Duration, shutdown: &AtomicBool) -> Option<QueuedTask> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(task) = self.try_pop(shutdown) {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Set `shutdown` and wake every waiting worker so it can observe it.
    pub fn halt(&self, shutdown: &AtomicBool) {
        {
            let _heap = self
                .heap
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            shutdown.store(true, Ordering::Release);
        }
        self.available.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Caller's side of a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl TaskHandle {
    pub(super) fn new(task_id: String, receiver: oneshot::Receiver<Result<Value>>) -> Self {
        Self { task_id, receiver }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the task's result. Fails with [`OrchestratorError::QueueClosed`]
    /// if the orchestrator is dropped before the task runs.
    pub async fn wait(self) -> Result<Value> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::QueueClosed(self.task_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, priority: Priority, sequence: u64) -> (QueuedTask, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        let queued = QueuedTask {
            task_id: id.to_string(),
            algorithm_id: "noop".to_string(),
            payload: json!(null),
            vertex_id: "v".to_string(),
            priority,
            sequence,
            submitted_at: Utc::now(),
            responder: tx,
        };
        (queued, TaskHandle::new(id.to_string(), rx))
    }

    #[tokio::test]
    async fn pops_by_priority_then_fifo() {
        let queue = TaskQueue::default();
        let shutdown = AtomicBool::new(false);
        let mut handles = Vec::new();
        for (id, priority, seq) in [
            ("low", Priority::Low, 0),
            ("med-1", Priority::Medium, 1),
            ("crit", Priority::Critical, 2),
            ("med-2", Priority::Medium, 3),
        ] {
            let (t, h) = task(id, priority, seq);
            queue.push(t);
            handles.push(h);
        }
        assert_eq!(queue.len(), 4);

        let mut order = Vec::new();
        while let Some(t) = queue.pop_timeout(Duration::from_millis(10), &shutdown).await {
            order.push(t.task_id);
        }
        assert_eq!(order, vec!["crit", "med-1", "med-2", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_when_empty() {
        let queue = TaskQueue::default();
        let shutdown = AtomicBool::new(false);
        assert!(queue.pop_timeout(Duration::from_secs(1), &shutdown).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_dequeue() {
        let queue = TaskQueue::default();
        let shutdown = AtomicBool::new(true);
        let (t, _h) = task("a", Priority::Critical, 0);
        queue.push(t);

        assert!(queue.pop_timeout(Duration::from_millis(10), &shutdown).await.is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn halt_blocks_later_pops() {
        let queue = TaskQueue::default();
        let shutdown = AtomicBool::new(false);
        let (t, _h) = task("a", Priority::Critical, 0);
        queue.push(t);

        queue.halt(&shutdown);
        assert!(shutdown.load(Ordering::Acquire));
        assert!(queue.try_pop(&shutdown).is_none());
        assert!(queue.pop_timeout(Duration::from_millis(10), &shutdown).await.is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn dropped_queue_closes_handles() {
        let queue = TaskQueue::default();
        let (t, handle) = task("orphan", Priority::Low, 0);
        queue.push(t);
        drop(queue);

        assert!(matches!(
            handle.wait().await,
            Err(OrchestratorError::QueueClosed(id)) if id == "orphan"
        ));
    }
}
