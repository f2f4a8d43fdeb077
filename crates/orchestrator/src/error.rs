use std::any::Any;

use thiserror::Error;

/// Error raised by an algorithm implementation or its factory.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AlgorithmError {
    #[error("algorithm failed: {0}")]
    Failed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("algorithm panicked: {0}")]
    Panicked(String),
}

impl AlgorithmError {
    /// Convert a caught panic payload into [`AlgorithmError::Panicked`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }
}

/// Errors surfaced by the loader, graph engine and orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("algorithm not registered: {0}")]
    NotRegistered(String),

    #[error("failed to load algorithm '{id}': {source}")]
    LoadFailure {
        id: String,
        #[source]
        source: AlgorithmError,
    },

    #[error("algorithm '{id}' failed during execution: {source}")]
    AlgorithmExecution {
        id: String,
        #[source]
        source: AlgorithmError,
    },

    #[error("cascade chain not defined: {0}")]
    UndefinedChain(String),

    #[error("compound group not defined: {0}")]
    UndefinedGroup(String),

    #[error("vertex not found: {0}")]
    VertexNotFound(String),

    #[error("vertex already exists: {0}")]
    VertexExists(String),

    #[error("capacity must be at least 1 (got {0})")]
    InvalidCapacity(usize),

    #[error("task already pending: {0}")]
    DuplicateTask(String),

    #[error("orchestrator is not accepting tasks")]
    NotRunning,

    #[error("task queue closed before '{0}' completed")]
    QueueClosed(String),

    #[error("no tokio runtime available: {0}")]
    Runtime(String),

    #[error("resource sampling failed: {0}")]
    Sampling(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Whether the failure came from the algorithm itself rather than from
    /// the orchestration layer around it.
    pub fn is_algorithm_failure(&self) -> bool {
        matches!(
            self,
            Self::LoadFailure { .. } | Self::AlgorithmExecution { .. } | Self::NotRegistered(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
