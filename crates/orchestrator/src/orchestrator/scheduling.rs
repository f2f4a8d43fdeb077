use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::types::VertexNode;

use super::core::Inner;

/// Vertex created on demand when a task arrives and none exist.
pub const DEFAULT_VERTEX_ID: &str = "default_vertex";

impl Inner {
    /// Resolve the vertex a task should be accounted against.
    ///
    /// An explicit id must exist. Otherwise the vertex with the lowest
    /// `load_factor + active_tasks / capacity` wins, earliest created first
    /// on ties.
    pub(super) fn select_vertex(&self, requested: Option<&str>) -> Result<String> {
        let mut vertices = self.vertices();

        if let Some(id) = requested {
            return if vertices.contains_key(id) {
                Ok(id.to_string())
            } else {
                Err(OrchestratorError::VertexNotFound(id.to_string()))
            };
        }

        if vertices.is_empty() {
            let capacity = self.config.default_vertex_capacity;
            let mut vertex = VertexNode::new(DEFAULT_VERTEX_ID, capacity);
            vertex.load_factor = self.monitor.load_factor();
            vertices.insert(DEFAULT_VERTEX_ID.to_string(), vertex);
            info!(vertex_id = DEFAULT_VERTEX_ID, capacity, "created default vertex");
            return Ok(DEFAULT_VERTEX_ID.to_string());
        }

        let mut best: Option<(&String, f64)> = None;
        for (id, vertex) in vertices.iter() {
            let score = vertex.placement_score();
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((id, score));
            }
        }
        let (id, score) = best.ok_or_else(|| OrchestratorError::VertexNotFound(DEFAULT_VERTEX_ID.into()))?;
        debug!(vertex_id = %id, score, "selected vertex");
        Ok(id.clone())
    }

    /// Mark a task as active on `vertex_id`. The returned slot gives the
    /// count back when dropped. Vertices removed in the meantime are skipped.
    pub(super) fn occupy<'a>(&'a self, vertex_id: &str, algorithm_id: &str) -> VertexSlot<'a> {
        let mut vertices = self.vertices();
        let occupied = match vertices.get_mut(vertex_id) {
            Some(vertex) => {
                vertex.active_tasks += 1;
                if !vertex.algorithms.iter().any(|a| a == algorithm_id) {
                    vertex.algorithms.push(algorithm_id.to_string());
                }
                true
            }
            None => false,
        };
        VertexSlot {
            inner: self,
            vertex_id: vertex_id.to_string(),
            occupied,
        }
    }

    /// Apply one global load signal to every vertex.
    pub(super) fn apply_load_factor(&self, load_factor: f64) {
        let load_factor = load_factor.clamp(0.0, 1.0);
        for vertex in self.vertices().values_mut() {
            vertex.load_factor = load_factor;
        }
    }
}

/// Holds one unit of a vertex's `active_tasks` for the duration of a task.
pub(super) struct VertexSlot<'a> {
    inner: &'a Inner,
    vertex_id: String,
    occupied: bool,
}

impl Drop for VertexSlot<'_> {
    fn drop(&mut self) {
        if !self.occupied {
            return;
        }
        if let Some(vertex) = self.inner.vertices().get_mut(&self.vertex_id) {
            vertex.active_tasks = vertex.active_tasks.saturating_sub(1);
        }
    }
}
