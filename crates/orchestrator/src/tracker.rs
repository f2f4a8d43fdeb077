//! Passive per-algorithm execution log with rolling statistics.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::AlgorithmStats;

/// Records kept per algorithm before the oldest is dropped.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
struct ExecutionRecord {
    recorded_at: DateTime<Utc>,
    duration: Duration,
    success: bool,
}

/// Bounded history for one algorithm, with running sums so the stats can
/// be refreshed on every append without rescanning.
#[derive(Debug, Clone)]
struct History {
    records: VecDeque<ExecutionRecord>,
    total_nanos: u128,
    successes: usize,
    stats: AlgorithmStats,
}

impl History {
    fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit.min(64)),
            total_nanos: 0,
            successes: 0,
            stats: AlgorithmStats {
                average_execution_time: Duration::ZERO,
                success_rate: 1.0,
                total_executions: 0,
            },
        }
    }

    fn push(&mut self, record: ExecutionRecord, limit: usize) {
        if self.records.len() == limit {
            if let Some(old) = self.records.pop_front() {
                self.total_nanos -= old.duration.as_nanos();
                if old.success {
                    self.successes -= 1;
                }
            }
        }
        self.total_nanos += record.duration.as_nanos();
        if record.success {
            self.successes += 1;
        }
        self.records.push_back(record);

        let count = self.records.len();
        self.stats = AlgorithmStats {
            average_execution_time: Duration::from_nanos(
                (self.total_nanos / count as u128) as u64,
            ),
            success_rate: self.successes as f64 / count as f64,
            total_executions: count,
        };
    }
}

/// Append-only execution log keyed by algorithm id.
pub struct PerformanceTracker {
    histories: RwLock<HashMap<String, History>>,
    limit: usize,
}

impl PerformanceTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Append one execution outcome and return the refreshed stats.
    pub fn record_execution(
        &self,
        algorithm_id: &str,
        duration: Duration,
        success: bool,
    ) -> AlgorithmStats {
        let mut histories = self
            .histories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let history = histories
            .entry(algorithm_id.to_string())
            .or_insert_with(|| History::new(self.limit));
        history.push(
            ExecutionRecord {
                recorded_at: Utc::now(),
                duration,
                success,
            },
            self.limit,
        );
        history.stats.clone()
    }

    pub fn stats(&self, algorithm_id: &str) -> Option<AlgorithmStats> {
        self.histories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(algorithm_id)
            .map(|h| h.stats.clone())
    }

    /// When the most recent execution of `algorithm_id` was recorded.
    pub fn last_recorded(&self, algorithm_id: &str) -> Option<DateTime<Utc>> {
        self.histories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(algorithm_id)
            .and_then(|h| h.records.back().map(|r| r.recorded_at))
    }

    pub fn all_stats(&self) -> HashMap<String, AlgorithmStats> {
        self.histories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(id, h)| (id.clone(), h.stats.clone()))
            .collect()
    }

    pub fn history_limit(&self) -> usize {
        self.limit
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
