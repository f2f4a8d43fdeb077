use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::algorithm::AlgorithmFactory;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::graph::{CascadeReport, CompoundReport, ExecutionGraph};
use crate::loader::AlgorithmLoader;
use crate::monitor::{default_sampler, ResourceMonitor, ResourceSample, ResourceSampler};
use crate::tracker::PerformanceTracker;
use crate::types::{AlgorithmMetadata, AlgorithmStats, TaskState, VertexNode, VertexSnapshot};

use super::queue::TaskQueue;

/// Where the orchestrator is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Created, workers not started. Submissions queue up.
    Idle,
    Running,
    /// Stopped. Submissions fail with [`OrchestratorError::NotRunning`].
    Stopped,
}

/// Point-in-time view of everything the orchestrator tracks.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub lifecycle: Lifecycle,
    pub workers: usize,
    pub queued_tasks: usize,
    pub pending_tasks: usize,
    pub registered_algorithms: usize,
    pub cached_algorithms: usize,
    pub algorithms: BTreeMap<String, AlgorithmStats>,
    pub vertices: Vec<VertexSnapshot>,
    pub resources: Option<ResourceSample>,
}

/// Task states keyed by id. Finished entries are kept for a while so callers
/// can still see the terminal state, oldest dropped first.
pub(super) struct TaskRegistry {
    states: HashMap<String, TaskState>,
    finished: VecDeque<String>,
    retain_finished: usize,
}

impl TaskRegistry {
    fn new(retain_finished: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            retain_finished: retain_finished.max(1),
        }
    }

    /// Claim `task_id` for a new submission.
    pub fn admit(&mut self, task_id: &str) -> Result<()> {
        if let Some(state) = self.states.get(task_id) {
            if !state.is_terminal() {
                return Err(OrchestratorError::DuplicateTask(task_id.to_string()));
            }
            self.finished.retain(|id| id != task_id);
        }
        self.states.insert(task_id.to_string(), TaskState::Submitted);
        Ok(())
    }

    pub fn set(&mut self, task_id: &str, state: TaskState) {
        if let Some(current) = self.states.get_mut(task_id) {
            *current = state;
        }
        if state.is_terminal() {
            self.finished.push_back(task_id.to_string());
            while self.finished.len() > self.retain_finished {
                if let Some(old) = self.finished.pop_front() {
                    self.states.remove(&old);
                }
            }
        }
    }

    pub fn forget(&mut self, task_id: &str) {
        self.states.remove(task_id);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).copied()
    }

    pub fn pending(&self) -> usize {
        self.states.values().filter(|s| !s.is_terminal()).count()
    }
}

/// State shared between the public handle and the worker/monitor loops.
pub(super) struct Inner {
    pub config: OrchestratorConfig,
    pub loader: AlgorithmLoader,
    pub graph: ExecutionGraph,
    pub tracker: PerformanceTracker,
    pub monitor: ResourceMonitor,
    /// Insertion order breaks placement ties.
    pub vertices: Mutex<IndexMap<String, VertexNode>>,
    pub queue: TaskQueue,
    pub tasks: Mutex<TaskRegistry>,
    pub lifecycle: RwLock<Lifecycle>,
    pub sequence: AtomicU64,
    pub shutdown: AtomicBool,
    pub shutdown_signal: Notify,
}

impl Inner {
    pub fn vertices(&self) -> MutexGuard<'_, IndexMap<String, VertexNode>> {
        self.vertices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tasks(&self) -> MutexGuard<'_, TaskRegistry> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self
            .lifecycle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *self
            .lifecycle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = lifecycle;
    }

    pub fn set_task_state(&self, task_id: &str, state: TaskState) {
        self.tasks().set(task_id, state);
    }
}

/// Priority-driven orchestrator over a pool of vertices.
///
/// Owns the algorithm loader, execution graph, performance tracker and
/// resource monitor; [`start`](Self::start) spawns the worker pool and the
/// monitor loop on the current tokio runtime.
pub struct Orchestrator {
    pub(super) inner: Arc<Inner>,
    pub(super) handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator sampling host resources from `/proc` when
    /// available.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        Self::with_sampler(config, default_sampler())
    }

    pub fn with_sampler(config: OrchestratorConfig, sampler: Arc<dyn ResourceSampler>) -> Result<Self> {
        config.validate()?;
        let loader = AlgorithmLoader::new(config.cache_capacity)?;
        let inner = Inner {
            loader,
            graph: ExecutionGraph::new(config.compound_weighting),
            tracker: PerformanceTracker::new(config.history_limit),
            monitor: ResourceMonitor::new(sampler),
            vertices: Mutex::new(IndexMap::new()),
            queue: TaskQueue::default(),
            tasks: Mutex::new(TaskRegistry::new(config.history_limit)),
            lifecycle: RwLock::new(Lifecycle::Idle),
            sequence: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
            handles: Mutex::new(Vec::new()),
        })
    }

    // ── Algorithms ──────────────────────────────────────────────

    /// Register (or replace) an algorithm. Instantiated lazily on first use.
    pub fn register_algorithm(&self, id: &str, factory: AlgorithmFactory, metadata: AlgorithmMetadata) {
        self.inner.loader.register(id, factory, metadata);
    }

    pub fn algorithm_stats(&self, id: &str) -> Option<AlgorithmStats> {
        self.inner.tracker.stats(id)
    }

    pub fn algorithm_metadata(&self, id: &str) -> Option<AlgorithmMetadata> {
        self.inner.loader.metadata(id)
    }

    pub fn loader(&self) -> &AlgorithmLoader {
        &self.inner.loader
    }

    // ── Execution graph ─────────────────────────────────────────

    pub fn define_cascade<I, S>(&self, chain_id: &str, algorithm_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.graph.define_cascade(chain_id, algorithm_ids);
    }

    pub fn define_compound<I, S>(&self, group_id: &str, algorithm_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.graph.define_compound(group_id, algorithm_ids);
    }

    /// Run a cascade on the caller's task. Not queued or vertex-accounted.
    pub async fn run_cascade(&self, chain_id: &str, payload: Value) -> Result<Value> {
        self.inner.graph.run_cascade(chain_id, payload, &self.inner.loader).await
    }

    pub async fn run_cascade_report(&self, chain_id: &str, payload: Value) -> Result<CascadeReport> {
        self.inner
            .graph
            .run_cascade_report(chain_id, payload, &self.inner.loader)
            .await
    }

    /// Run a compound group on the caller's task. Not queued or
    /// vertex-accounted.
    pub async fn run_compound(&self, group_id: &str, payload: Value) -> Result<Map<String, Value>> {
        self.inner.graph.run_compound(group_id, payload, &self.inner.loader).await
    }

    pub async fn run_compound_report(&self, group_id: &str, payload: Value) -> Result<CompoundReport> {
        self.inner
            .graph
            .run_compound_report(group_id, payload, &self.inner.loader)
            .await
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.inner.graph
    }

    // ── Vertices ────────────────────────────────────────────────

    pub fn create_vertex(&self, vertex_id: &str, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(OrchestratorError::InvalidCapacity(capacity));
        }
        let mut vertices = self.inner.vertices();
        if vertices.contains_key(vertex_id) {
            return Err(OrchestratorError::VertexExists(vertex_id.to_string()));
        }
        let mut vertex = VertexNode::new(vertex_id, capacity);
        vertex.load_factor = self.inner.monitor.load_factor();
        vertices.insert(vertex_id.to_string(), vertex);
        info!(vertex_id = %vertex_id, capacity, "created vertex");
        Ok(())
    }

    /// Create a vertex with the configured default capacity.
    pub fn create_vertex_default(&self, vertex_id: &str) -> Result<()> {
        self.create_vertex(vertex_id, self.inner.config.default_vertex_capacity)
    }

    /// Remove a vertex and every edge pointing at it. Tasks already
    /// dispatched to it still run to completion.
    pub fn remove_vertex(&self, vertex_id: &str) -> Result<()> {
        let mut vertices = self.inner.vertices();
        let removed = vertices
            .shift_remove(vertex_id)
            .ok_or_else(|| OrchestratorError::VertexNotFound(vertex_id.to_string()))?;
        for peer in &removed.connections {
            if let Some(node) = vertices.get_mut(peer) {
                node.connections.retain(|c| c != vertex_id);
            }
        }
        info!(vertex_id = %vertex_id, "removed vertex");
        Ok(())
    }

    /// Connect two vertices. Unknown ids are ignored.
    pub fn connect(&self, a: &str, b: &str) {
        let mut vertices = self.inner.vertices();
        if !vertices.contains_key(a) || !vertices.contains_key(b) {
            debug!(a = %a, b = %b, "connect ignored: unknown vertex");
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(node) = vertices.get_mut(from) {
                if from != to && !node.connections.iter().any(|c| c == to) {
                    node.connections.push(to.to_string());
                }
            }
        }
    }

    pub fn vertex_metrics(&self, vertex_id: &str) -> Option<VertexSnapshot> {
        self.inner.vertices().get(vertex_id).map(VertexNode::snapshot)
    }

    /// Vertex ids in creation order.
    pub fn vertex_ids(&self) -> Vec<String> {
        self.inner.vertices().keys().cloned().collect()
    }

    // ── Observability ───────────────────────────────────────────

    /// State of a pending (or recently finished) task.
    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.inner.tasks().get(task_id)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let workers = match self.inner.lifecycle() {
            Lifecycle::Running => self.inner.config.resolved_worker_count(),
            _ => 0,
        };
        OrchestratorMetrics {
            lifecycle: self.inner.lifecycle(),
            workers,
            queued_tasks: self.inner.queue.len(),
            pending_tasks: self.inner.tasks().pending(),
            registered_algorithms: self.inner.loader.registered_ids().len(),
            cached_algorithms: self.inner.loader.cached_len(),
            algorithms: self.inner.tracker.all_stats().into_iter().collect(),
            vertices: self.inner.vertices().values().map(VertexNode::snapshot).collect(),
            resources: self.inner.monitor.last_sample(),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Let detached loops exit so queued tasks are dropped and their
        // handles resolve with `QueueClosed`.
        self.inner.queue.halt(&self.inner.shutdown);
        self.inner.shutdown_signal.notify_waiters();
    }
}
