//! Host resource sampling feeding vertex load factors.
//!
//! One global CPU/memory sample is applied to every vertex.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// One CPU/memory observation, both as percentages in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub sampled_at: DateTime<Utc>,
}

impl ResourceSample {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            memory_percent: memory_percent.clamp(0.0, 100.0),
            sampled_at: Utc::now(),
        }
    }

    /// Mean of CPU and memory utilization, normalized to `[0, 1]`.
    pub fn load_factor(&self) -> f64 {
        ((self.cpu_percent + self.memory_percent) / 200.0).clamp(0.0, 1.0)
    }
}

/// Source of host utilization samples.
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample>;
}

/// Returns the same numbers every time. Used where `/proc` is unavailable
/// and in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl FixedSampler {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
        }
    }
}

impl Default for FixedSampler {
    fn default() -> Self {
        Self::new(50.0, 60.0)
    }
}

#[async_trait]
impl ResourceSampler for FixedSampler {
    async fn sample(&self) -> Result<ResourceSample> {
        Ok(ResourceSample::new(self.cpu_percent, self.memory_percent))
    }
}

/// Linux sampler reading `/proc/stat` and `/proc/meminfo`.
///
/// CPU utilization is the busy share of jiffies since the previous sample
/// (since boot on the first call).
#[derive(Debug, Default)]
pub struct ProcSampler {
    previous: Mutex<Option<CpuTimes>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

impl ProcSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn cpu_percent(&self, now: CpuTimes) -> f64 {
        let mut previous = self
            .previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (total, idle) = match *previous {
            Some(prev) if now.total > prev.total => {
                (now.total - prev.total, now.idle.saturating_sub(prev.idle))
            }
            _ => (now.total, now.idle),
        };
        *previous = Some(now);
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
    }
}

#[async_trait]
impl ResourceSampler for ProcSampler {
    async fn sample(&self) -> Result<ResourceSample> {
        let stat = tokio::fs::read_to_string("/proc/stat")
            .await
            .map_err(|e| OrchestratorError::Sampling(format!("/proc/stat: {e}")))?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(|e| OrchestratorError::Sampling(format!("/proc/meminfo: {e}")))?;

        let times = parse_cpu_times(&stat)
            .ok_or_else(|| OrchestratorError::Sampling("malformed /proc/stat".into()))?;
        let memory = parse_memory_percent(&meminfo)
            .ok_or_else(|| OrchestratorError::Sampling("malformed /proc/meminfo".into()))?;

        Ok(ResourceSample::new(self.cpu_percent(times), memory))
    }
}

/// Aggregate `cpu` line: idle time is `idle + iowait`.
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        total: fields.iter().sum(),
        idle,
    })
}

fn parse_memory_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - available / total) * 100.0)
}

/// Pick the `/proc` sampler on hosts that have it, otherwise a fixed one.
pub fn default_sampler() -> Arc<dyn ResourceSampler> {
    if Path::new("/proc/stat").exists() && Path::new("/proc/meminfo").exists() {
        Arc::new(ProcSampler::new())
    } else {
        Arc::new(FixedSampler::default())
    }
}

/// Holds the latest host sample.
pub struct ResourceMonitor {
    sampler: Arc<dyn ResourceSampler>,
    latest: RwLock<Option<ResourceSample>>,
}

impl ResourceMonitor {
    pub fn new(sampler: Arc<dyn ResourceSampler>) -> Self {
        Self {
            sampler,
            latest: RwLock::new(None),
        }
    }

    /// Take a fresh sample and store it.
    pub async fn update(&self) -> Result<ResourceSample> {
        let sample = self.sampler.sample().await?;
        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            "sampled host resources"
        );
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sample);
        Ok(sample)
    }

    pub fn last_sample(&self) -> Option<ResourceSample> {
        *self
            .latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cpu_usage(&self) -> f64 {
        self.last_sample().map_or(0.0, |s| s.cpu_percent)
    }

    pub fn memory_usage(&self) -> f64 {
        self.last_sample().map_or(0.0, |s| s.memory_percent)
    }

    pub fn load_factor(&self) -> f64 {
        self.last_sample().map_or(0.0, |s| s.load_factor())
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(default_sampler())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\nintr 1\n";
    const MEMINFO: &str =
        "MemTotal:       16000000 kB\nMemFree:         2000000 kB\nMemAvailable:    4000000 kB\n";

    #[test]
    fn parses_cpu_line() {
        let t = parse_cpu_times(STAT).unwrap();
        assert_eq!(t.total, 1000);
        assert_eq!(t.idle, 800);
        assert!(parse_cpu_times("intr 1\n").is_none());
    }

    #[test]
    fn parses_meminfo() {
        let pct = parse_memory_percent(MEMINFO).unwrap();
        assert!((pct - 75.0).abs() < 1e-9);
        assert!(parse_memory_percent("MemTotal: 0 kB\nMemFree: 0 kB\n").is_none());
    }

    #[test]
    fn cpu_percent_uses_delta_between_samples() {
        let s = ProcSampler::new();
        let first = s.cpu_percent(CpuTimes { total: 1000, idle: 800 });
        assert!((first - 20.0).abs() < 1e-9);
        // 100 more jiffies, 50 of them idle.
        let second = s.cpu_percent(CpuTimes { total: 1100, idle: 850 });
        assert!((second - 50.0).abs() < 1e-9);
    }

    #[test]
    fn load_factor_is_normalized() {
        let sample = ResourceSample::new(50.0, 60.0);
        assert!((sample.load_factor() - 0.55).abs() < 1e-9);
        let clamped = ResourceSample::new(250.0, -3.0);
        assert_eq!(clamped.cpu_percent, 100.0);
        assert_eq!(clamped.memory_percent, 0.0);
    }

    #[tokio::test]
    async fn monitor_stores_latest_sample() {
        let monitor = ResourceMonitor::new(Arc::new(FixedSampler::new(20.0, 40.0)));
        assert!(monitor.last_sample().is_none());
        assert_eq!(monitor.load_factor(), 0.0);

        monitor.update().await.unwrap();
        assert_eq!(monitor.cpu_usage(), 20.0);
        assert_eq!(monitor.memory_usage(), 40.0);
        assert!((monitor.load_factor() - 0.3).abs() < 1e-9);
    }
}
