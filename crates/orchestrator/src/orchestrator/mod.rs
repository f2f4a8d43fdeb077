//! Vertex orchestrator -- priority queue, vertex accounting and worker pool.
//!
//! Split into focused submodules:
//! - `core`: Orchestrator struct, constructors, registration, vertices and metrics
//! - `queue`: priority queue shared by the workers, and the caller's task handle
//! - `scheduling`: vertex placement and active-task accounting
//! - `execution`: lifecycle, submission, worker and resource-monitor loops

mod core;
mod execution;
mod queue;
mod scheduling;

pub use self::core::{Lifecycle, Orchestrator, OrchestratorMetrics};
pub use self::queue::TaskHandle;
pub use self::scheduling::DEFAULT_VERTEX_ID;
