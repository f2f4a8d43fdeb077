use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::graph;
use crate::types::{Priority, TaskState};

use super::core::{Inner, Lifecycle, Orchestrator};
use super::queue::{QueuedTask, TaskHandle};

impl Orchestrator {
    /// Spawn the worker pool and the resource monitor loop. No-op if they
    /// are already running.
    ///
    /// Must be called from within a tokio runtime; otherwise fails with
    /// [`OrchestratorError::Runtime`] and nothing is started.
    pub fn start(&self) -> Result<()> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| OrchestratorError::Runtime(e.to_string()))?;

        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !handles.is_empty() {
            debug!("orchestrator already running");
            return Ok(());
        }

        self.inner.shutdown.store(false, Ordering::Release);
        self.inner.set_lifecycle(Lifecycle::Running);

        let num_workers = self.inner.config.resolved_worker_count();
        for worker_id in 0..num_workers {
            handles.push(tokio::spawn(worker_loop(Arc::clone(&self.inner), worker_id)));
        }
        handles.push(tokio::spawn(monitor_loop(Arc::clone(&self.inner))));

        info!(
            workers = num_workers,
            queued = self.inner.queue.len(),
            "orchestrator started"
        );
        Ok(())
    }

    /// Stop accepting work and wait for every loop to exit. Tasks already
    /// running finish; tasks still queued stay queued.
    pub async fn stop(&self) {
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if self.inner.lifecycle() == Lifecycle::Stopped && handles.is_empty() {
            return;
        }

        info!("orchestrator shutdown requested");
        self.inner.set_lifecycle(Lifecycle::Stopped);
        self.inner.queue.halt(&self.inner.shutdown);
        self.inner.shutdown_signal.notify_waiters();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "orchestrator loop exited abnormally");
            }
        }

        let abandoned = self.inner.queue.len();
        if abandoned > 0 {
            warn!(abandoned, "stopped with tasks still queued");
        }
        info!("orchestrator stopped");
    }

    /// Queue a task and return a handle to its eventual result.
    ///
    /// Without `vertex_id` the least loaded vertex is chosen. Tasks queued
    /// before [`start`](Self::start) wait until workers are running.
    pub fn enqueue_task(
        &self,
        task_id: &str,
        algorithm_id: &str,
        payload: Value,
        priority: Priority,
        vertex_id: Option<&str>,
    ) -> Result<TaskHandle> {
        if self.inner.lifecycle() == Lifecycle::Stopped {
            return Err(OrchestratorError::NotRunning);
        }

        self.inner.tasks().admit(task_id)?;
        let vertex_id = match self.inner.select_vertex(vertex_id) {
            Ok(id) => id,
            Err(e) => {
                self.inner.tasks().forget(task_id);
                return Err(e);
            }
        };

        let (responder, receiver) = oneshot::channel();
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        // Mark before pushing: a worker may pick the task up immediately.
        self.inner.set_task_state(task_id, TaskState::Queued);
        self.inner.queue.push(QueuedTask {
            task_id: task_id.to_string(),
            algorithm_id: algorithm_id.to_string(),
            payload,
            vertex_id: vertex_id.clone(),
            priority,
            sequence,
            submitted_at: Utc::now(),
            responder,
        });

        debug!(
            task_id = %task_id,
            algorithm_id = %algorithm_id,
            vertex_id = %vertex_id,
            priority = ?priority,
            "task queued"
        );
        Ok(TaskHandle::new(task_id.to_string(), receiver))
    }

    /// Queue a task and wait for its result.
    pub async fn submit_task(
        &self,
        task_id: &str,
        algorithm_id: &str,
        payload: Value,
        priority: Priority,
        vertex_id: Option<&str>,
    ) -> Result<Value> {
        self.enqueue_task(task_id, algorithm_id, payload, priority, vertex_id)?
            .wait()
            .await
    }
}

impl Inner {
    /// Run one dequeued task end to end and resolve its handle.
    async fn process(&self, task: QueuedTask) {
        let QueuedTask {
            task_id,
            algorithm_id,
            payload,
            vertex_id,
            submitted_at,
            responder,
            ..
        } = task;

        self.set_task_state(&task_id, TaskState::Dispatched);
        let waited_ms = (Utc::now() - submitted_at).num_milliseconds();
        debug!(task_id = %task_id, vertex_id = %vertex_id, waited_ms, "task dispatched");

        let result = {
            let _slot = self.occupy(&vertex_id, &algorithm_id);
            self.set_task_state(&task_id, TaskState::Running);

            let started = Instant::now();
            let result = graph::load_and_execute(&self.loader, &algorithm_id, payload).await;
            let stats = self
                .tracker
                .record_execution(&algorithm_id, started.elapsed(), result.is_ok());
            self.loader.record_performance(&algorithm_id, &stats);
            result
        };

        match &result {
            Ok(_) => {
                debug!(task_id = %task_id, algorithm_id = %algorithm_id, "task completed");
                self.set_task_state(&task_id, TaskState::Completed);
            }
            Err(e) => {
                error!(task_id = %task_id, algorithm_id = %algorithm_id, error = %e, "task failed");
                self.set_task_state(&task_id, TaskState::Failed);
            }
        }

        if responder.send(result).is_err() {
            debug!(task_id = %task_id, "caller dropped task handle");
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    debug!(worker_id, "worker started");
    let timeout = inner.config.dequeue_timeout();
    while !inner.shutdown.load(Ordering::Acquire) {
        if let Some(task) = inner.queue.pop_timeout(timeout, &inner.shutdown).await {
            inner.process(task).await;
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn monitor_loop(inner: Arc<Inner>) {
    debug!("resource monitor started");
    loop {
        let stopped = inner.shutdown_signal.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let wait = match inner.monitor.update().await {
            Ok(sample) => {
                inner.apply_load_factor(sample.load_factor());
                inner.config.monitor_interval()
            }
            Err(e) => {
                warn!(error = %e, "resource sampling failed, backing off");
                inner.config.monitor_backoff()
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut stopped => break,
        }
    }
    debug!("resource monitor stopped");
}
