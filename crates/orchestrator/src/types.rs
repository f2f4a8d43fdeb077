use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task dispatch priority. Lower numeric value = served first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical = 1,
    High = 2,
    #[default]
    Medium = 3,
    Low = 4,
    Background = 5,
}

impl Priority {
    /// Numeric tier, 1 (critical) through 5 (background).
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Broad family an algorithm belongs to. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmCategory {
    Predictive,
    Learning,
    Causal,
    Recursive,
    Optimization,
    PatternRecognition,
    DecisionMaking,
    MemoryManagement,
}

/// Registration-time description of an algorithm plus the access and
/// performance stats the loader and tracker keep up to date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmMetadata {
    pub algorithm_id: String,
    pub category: AlgorithmCategory,
    pub priority: Priority,
    /// Relative resource weights, e.g. `cpu` and `memory`.
    #[serde(default)]
    pub resource_requirements: HashMap<String, f64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Rolling average execution time in seconds.
    #[serde(default)]
    pub execution_time_avg: f64,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default = "Utc::now")]
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub memory_footprint: u64,
    #[serde(default = "default_weight")]
    pub cpu_intensity: f64,
    #[serde(default)]
    pub cascading_potential: f64,
    #[serde(default = "default_weight")]
    pub compounding_factor: f64,
}

fn default_success_rate() -> f64 { 1.0 }
fn default_weight() -> f64 { 1.0 }

impl AlgorithmMetadata {
    pub fn new(
        algorithm_id: impl Into<String>,
        category: AlgorithmCategory,
        priority: Priority,
    ) -> Self {
        Self {
            algorithm_id: algorithm_id.into(),
            category,
            priority,
            resource_requirements: HashMap::new(),
            dependencies: Vec::new(),
            execution_time_avg: 0.0,
            success_rate: default_success_rate(),
            last_used: Utc::now(),
            usage_count: 0,
            memory_footprint: 0,
            cpu_intensity: default_weight(),
            cascading_potential: 0.0,
            compounding_factor: default_weight(),
        }
    }

    pub fn with_resource(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.resource_requirements.insert(name.into(), weight);
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cpu_intensity(mut self, intensity: f64) -> Self {
        self.cpu_intensity = intensity;
        self
    }

    pub fn with_cascading_potential(mut self, potential: f64) -> Self {
        self.cascading_potential = potential;
        self
    }

    pub fn with_compounding_factor(mut self, factor: f64) -> Self {
        self.compounding_factor = factor;
        self
    }

    /// Record one cache access.
    pub(crate) fn touch(&mut self) {
        self.last_used = Utc::now();
        self.usage_count += 1;
    }
}

/// A named logical execution context with its own capacity and load factor.
#[derive(Debug, Clone, Serialize)]
pub struct VertexNode {
    pub vertex_id: String,
    /// Resident algorithm ids (informational).
    pub algorithms: Vec<String>,
    /// Symmetric topology edges.
    pub connections: Vec<String>,
    /// Free-form per-vertex annotations.
    pub state: serde_json::Map<String, serde_json::Value>,
    /// Normalized host load in `[0, 1]`, rewritten by the resource monitor.
    pub load_factor: f64,
    pub active_tasks: usize,
    pub max_capacity: usize,
}

impl VertexNode {
    pub fn new(vertex_id: impl Into<String>, max_capacity: usize) -> Self {
        Self {
            vertex_id: vertex_id.into(),
            algorithms: Vec::new(),
            connections: Vec::new(),
            state: serde_json::Map::new(),
            load_factor: 0.0,
            active_tasks: 0,
            max_capacity,
        }
    }

    /// Placement score: lower is better.
    pub fn placement_score(&self) -> f64 {
        self.load_factor + self.active_tasks as f64 / self.max_capacity as f64
    }

    pub fn snapshot(&self) -> VertexSnapshot {
        VertexSnapshot {
            vertex_id: self.vertex_id.clone(),
            load_factor: self.load_factor,
            active_tasks: self.active_tasks,
            capacity: self.max_capacity,
            connections: self.connections.clone(),
        }
    }
}

/// Read-only per-vertex metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexSnapshot {
    pub vertex_id: String,
    pub load_factor: f64,
    pub active_tasks: usize,
    pub capacity: usize,
    pub connections: Vec<String>,
}

/// Lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Queued,
    Dispatched,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Rolling execution statistics for one algorithm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmStats {
    pub average_execution_time: Duration,
    pub success_rate: f64,
    pub total_executions: usize,
}
