use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// How numeric compound-group results are weighted when merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundWeighting {
    /// Plain arithmetic mean.
    #[default]
    Equal,
    /// Weight each member by its metadata `compounding_factor`.
    CompoundingFactor,
}

/// Orchestrator configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running tasks.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Worker pool size. 0 = min(max_concurrent_tasks, 10).
    #[serde(default)]
    pub worker_count: usize,
    /// Live algorithm instances kept by the loader.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Capacity given to vertices created without an explicit one.
    #[serde(default = "default_vertex_capacity")]
    pub default_vertex_capacity: usize,
    /// How long a worker waits on an empty queue before rechecking shutdown.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// Resource monitor sampling interval in seconds.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    /// Delay after a failed sample before trying again, in seconds.
    #[serde(default = "default_monitor_backoff")]
    pub monitor_backoff_secs: u64,
    /// Execution records kept per algorithm.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub compound_weighting: CompoundWeighting,
}

fn default_max_concurrent_tasks() -> usize { 50 }
fn default_cache_capacity() -> usize { 100 }
fn default_vertex_capacity() -> usize { 10 }
fn default_dequeue_timeout_ms() -> u64 { 1000 }
fn default_monitor_interval() -> u64 { 5 }
fn default_monitor_backoff() -> u64 { 10 }
fn default_history_limit() -> usize { 1000 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            worker_count: 0,
            cache_capacity: default_cache_capacity(),
            default_vertex_capacity: default_vertex_capacity(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            monitor_interval_secs: default_monitor_interval(),
            monitor_backoff_secs: default_monitor_backoff(),
            history_limit: default_history_limit(),
            compound_weighting: CompoundWeighting::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus any `VERTEX_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `VERTEX_*` environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_usize("VERTEX_MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = env_usize("VERTEX_WORKER_COUNT") {
            self.worker_count = v;
        }
        if let Some(v) = env_usize("VERTEX_CACHE_CAPACITY") {
            self.cache_capacity = v;
        }
        if let Some(v) = env_u64("VERTEX_MONITOR_INTERVAL_SECS") {
            self.monitor_interval_secs = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::Config(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(OrchestratorError::Config(
                "cache_capacity must be at least 1".into(),
            ));
        }
        if self.default_vertex_capacity == 0 {
            return Err(OrchestratorError::Config(
                "default_vertex_capacity must be at least 1".into(),
            ));
        }
        if self.dequeue_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "dequeue_timeout_ms must be positive".into(),
            ));
        }
        if self.monitor_interval_secs == 0 {
            return Err(OrchestratorError::Config(
                "monitor_interval_secs must be positive".into(),
            ));
        }
        if self.monitor_backoff_secs == 0 {
            return Err(OrchestratorError::Config(
                "monitor_backoff_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the worker pool size (0 means min(max_concurrent_tasks, 10)).
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            self.max_concurrent_tasks.min(10)
        } else {
            self.worker_count
        }
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn monitor_backoff(&self) -> Duration {
        Duration::from_secs(self.monitor_backoff_secs)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Orchestrator config:");
        tracing::info!(
            "  workers:  {} (max concurrent tasks {})",
            self.resolved_worker_count(),
            self.max_concurrent_tasks
        );
        tracing::info!("  cache:    {} instances", self.cache_capacity);
        tracing::info!("  monitor:  every {}s", self.monitor_interval_secs);
        tracing::info!("  compound: {:?} weighting", self.compound_weighting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_tasks, 50);
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.default_vertex_capacity, 10);
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
        assert_eq!(config.dequeue_timeout(), Duration::from_secs(1));
        assert_eq!(config.history_limit, 1000);
        assert_eq!(config.compound_weighting, CompoundWeighting::Equal);
    }

    #[test]
    fn resolved_worker_count() {
        let mut config = OrchestratorConfig::default();
        assert_eq!(config.resolved_worker_count(), 10);

        config.max_concurrent_tasks = 4;
        assert_eq!(config.resolved_worker_count(), 4);

        config.worker_count = 2;
        assert_eq!(config.resolved_worker_count(), 2);
    }

    #[test]
    fn parses_partial_toml() {
        let config = OrchestratorConfig::from_toml(
            r#"
            cache_capacity = 8
            compound_weighting = "compounding_factor"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.compound_weighting, CompoundWeighting::CompoundingFactor);
        assert_eq!(config.default_vertex_capacity, 10);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = OrchestratorConfig::from_toml("cache_capacity = 0").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn rejects_zero_monitor_periods() {
        let zero_interval = OrchestratorConfig {
            monitor_interval_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(zero_interval.validate(), Err(OrchestratorError::Config(_))));

        let zero_backoff = OrchestratorConfig {
            monitor_backoff_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(zero_backoff.validate(), Err(OrchestratorError::Config(_))));

        let err = OrchestratorConfig::from_toml("monitor_backoff_secs = 0").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = OrchestratorConfig::from_toml("cache_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigParse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrent_tasks = 3\nmonitor_interval_secs = 1").unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.resolved_worker_count(), 3);
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = OrchestratorConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigIo(_)));
    }
}
