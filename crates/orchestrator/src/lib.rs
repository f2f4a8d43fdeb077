pub mod algorithm;
pub mod builtin;
pub mod config;
pub mod error;
pub mod graph;
pub mod loader;
pub mod monitor;
pub mod orchestrator;
pub mod tracker;
pub mod types;

pub use algorithm::{factory, Algorithm, AlgorithmFactory, AlgorithmInstance};
pub use builtin::register_builtins;
pub use config::{CompoundWeighting, OrchestratorConfig};
pub use error::{AlgorithmError, OrchestratorError, Result};
pub use graph::{
    CascadeReport, CompoundReport, ExecutionGraph, StageOutcome, COMPOUND_AGGREGATE_KEY,
};
pub use loader::AlgorithmLoader;
pub use monitor::{FixedSampler, ProcSampler, ResourceMonitor, ResourceSample, ResourceSampler};
pub use orchestrator::{Lifecycle, Orchestrator, OrchestratorMetrics, TaskHandle, DEFAULT_VERTEX_ID};
pub use tracker::PerformanceTracker;
pub use types::{
    AlgorithmCategory, AlgorithmMetadata, AlgorithmStats, Priority, TaskState, VertexNode,
    VertexSnapshot,
};
