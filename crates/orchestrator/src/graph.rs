//! Cascade and compound execution over loaded algorithms.
//!
//! A cascade feeds each stage's output into the next and stops at the first
//! failure, keeping the last good payload. A compound group runs every member
//! against the same input concurrently, keeps each member's result (failures
//! become `null`) and adds a merged numeric aggregate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::RwLock;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::algorithm::AlgorithmInstance;
use crate::config::CompoundWeighting;
use crate::error::{AlgorithmError, OrchestratorError, Result};
use crate::loader::AlgorithmLoader;

/// Key under which the merged numeric result of a compound group is stored.
pub const COMPOUND_AGGREGATE_KEY: &str = "compound_numerical";

/// Run one algorithm instance. Panics inside the algorithm are reported as
/// [`AlgorithmError::Panicked`] instead of unwinding into the caller.
pub async fn execute(
    instance: &AlgorithmInstance,
    payload: Value,
) -> std::result::Result<Value, AlgorithmError> {
    match AssertUnwindSafe(instance.execute(payload)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(AlgorithmError::from_panic(panic)),
    }
}

/// Load `id` and run it, mapping failures into [`OrchestratorError`].
pub async fn load_and_execute(loader: &AlgorithmLoader, id: &str, payload: Value) -> Result<Value> {
    let instance = loader.load(id)?;
    execute(&instance, payload)
        .await
        .map_err(|source| OrchestratorError::AlgorithmExecution {
            id: id.to_string(),
            source,
        })
}

/// Outcome of a single cascade stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub algorithm_id: String,
    pub result: std::result::Result<(), String>,
}

/// Full diagnostics of a cascade run.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub chain_id: String,
    /// Output of the last successful stage (the input if none succeeded).
    pub output: Value,
    /// Stages that were attempted, in order.
    pub stages: Vec<StageOutcome>,
    /// Whether every stage ran successfully.
    pub completed: bool,
}

/// Full diagnostics of a compound run.
#[derive(Debug, Clone, Serialize)]
pub struct CompoundReport {
    pub group_id: String,
    pub members: BTreeMap<String, std::result::Result<Value, String>>,
    /// Weighted mean of the numeric member results, if any.
    pub aggregate: Option<f64>,
}

impl CompoundReport {
    /// Flatten into the result map: one entry per member (`null` on failure)
    /// plus the aggregate key when at least one member produced a number.
    pub fn into_map(self) -> Map<String, Value> {
        let mut merged = Map::new();
        if let Some(aggregate) = self.aggregate {
            merged.insert(COMPOUND_AGGREGATE_KEY.to_string(), Value::from(aggregate));
        }
        for (id, result) in self.members {
            merged.insert(id, result.unwrap_or(Value::Null));
        }
        merged
    }

    pub fn failed_members(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Stores cascade and compound definitions and runs them.
#[derive(Default)]
pub struct ExecutionGraph {
    cascades: RwLock<HashMap<String, Vec<String>>>,
    compounds: RwLock<HashMap<String, BTreeSet<String>>>,
    weighting: CompoundWeighting,
}

impl ExecutionGraph {
    pub fn new(weighting: CompoundWeighting) -> Self {
        Self {
            cascades: RwLock::new(HashMap::new()),
            compounds: RwLock::new(HashMap::new()),
            weighting,
        }
    }

    /// Define (or redefine) an ordered cascade chain.
    pub fn define_cascade<I, S>(&self, chain_id: &str, algorithm_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages: Vec<String> = algorithm_ids.into_iter().map(Into::into).collect();
        info!(chain_id = %chain_id, stages = ?stages, "defined cascade chain");
        self.cascades
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(chain_id.to_string(), stages);
    }

    /// Define (or redefine) an unordered compound group.
    pub fn define_compound<I, S>(&self, group_id: &str, algorithm_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: BTreeSet<String> = algorithm_ids.into_iter().map(Into::into).collect();
        info!(group_id = %group_id, members = ?members, "defined compound group");
        self.compounds
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(group_id.to_string(), members);
    }

    pub fn cascade(&self, chain_id: &str) -> Option<Vec<String>> {
        self.cascades
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(chain_id)
            .cloned()
    }

    pub fn compound(&self, group_id: &str) -> Option<Vec<String>> {
        self.compounds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(group_id)
            .map(|m| m.iter().cloned().collect())
    }

    pub fn cascade_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cascades
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn compound_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .compounds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Algorithms that directly follow `algorithm_id` in any defined cascade.
    pub fn downstream(&self, algorithm_id: &str) -> Vec<String> {
        let cascades = self
            .cascades
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next: BTreeSet<String> = cascades
            .values()
            .flat_map(|stages| stages.windows(2))
            .filter(|pair| pair[0] == algorithm_id)
            .map(|pair| pair[1].clone())
            .collect();
        next.into_iter().collect()
    }

    /// Run a cascade, returning the last successfully produced payload.
    pub async fn run_cascade(
        &self,
        chain_id: &str,
        payload: Value,
        loader: &AlgorithmLoader,
    ) -> Result<Value> {
        Ok(self.run_cascade_report(chain_id, payload, loader).await?.output)
    }

    /// Run a cascade and keep the per-stage outcomes.
    pub async fn run_cascade_report(
        &self,
        chain_id: &str,
        payload: Value,
        loader: &AlgorithmLoader,
    ) -> Result<CascadeReport> {
        let stages = self
            .cascade(chain_id)
            .ok_or_else(|| OrchestratorError::UndefinedChain(chain_id.to_string()))?;

        let mut current = payload;
        let mut outcomes = Vec::with_capacity(stages.len());
        let mut completed = true;

        for algorithm_id in stages {
            match load_and_execute(loader, &algorithm_id, current.clone()).await {
                Ok(next) => {
                    debug!(chain_id = %chain_id, algorithm_id = %algorithm_id, "cascade stage completed");
                    current = next;
                    outcomes.push(StageOutcome {
                        algorithm_id,
                        result: Ok(()),
                    });
                }
                Err(e) => {
                    warn!(chain_id = %chain_id, algorithm_id = %algorithm_id, error = %e, "cascade stopped early");
                    outcomes.push(StageOutcome {
                        algorithm_id,
                        result: Err(e.to_string()),
                    });
                    completed = false;
                    break;
                }
            }
        }

        Ok(CascadeReport {
            chain_id: chain_id.to_string(),
            output: current,
            stages: outcomes,
            completed,
        })
    }

    /// Run a compound group and return the merged result map.
    pub async fn run_compound(
        &self,
        group_id: &str,
        payload: Value,
        loader: &AlgorithmLoader,
    ) -> Result<Map<String, Value>> {
        Ok(self.run_compound_report(group_id, payload, loader).await?.into_map())
    }

    /// Run a compound group and keep each member's tagged result.
    pub async fn run_compound_report(
        &self,
        group_id: &str,
        payload: Value,
        loader: &AlgorithmLoader,
    ) -> Result<CompoundReport> {
        let members = self
            .compound(group_id)
            .ok_or_else(|| OrchestratorError::UndefinedGroup(group_id.to_string()))?;

        let runs = members.iter().map(|id| {
            let input = payload.clone();
            async move { load_and_execute(loader, id, input).await }
        });
        let results = join_all(runs).await;

        let mut tagged = BTreeMap::new();
        for (id, result) in members.into_iter().zip(results) {
            match result {
                Ok(value) => {
                    tagged.insert(id, Ok(value));
                }
                Err(e) => {
                    warn!(group_id = %group_id, algorithm_id = %id, error = %e, "compound member failed");
                    tagged.insert(id, Err(e.to_string()));
                }
            }
        }

        let aggregate = self.merge_numeric(&tagged, loader);
        Ok(CompoundReport {
            group_id: group_id.to_string(),
            members: tagged,
            aggregate,
        })
    }

    fn merge_numeric(
        &self,
        results: &BTreeMap<String, std::result::Result<Value, String>>,
        loader: &AlgorithmLoader,
    ) -> Option<f64> {
        let numeric: Vec<(f64, f64)> = results
            .iter()
            .filter_map(|(id, r)| {
                let value = r.as_ref().ok()?.as_f64()?;
                let weight = match self.weighting {
                    CompoundWeighting::Equal => 1.0,
                    CompoundWeighting::CompoundingFactor => loader
                        .metadata(id)
                        .map_or(1.0, |m| m.compounding_factor),
                };
                Some((value, weight))
            })
            .collect();

        let total_weight: f64 = numeric.iter().map(|(_, w)| w).sum();
        if numeric.is_empty() || total_weight <= 0.0 {
            return None;
        }
        Some(numeric.iter().map(|(v, w)| v * w / total_weight).sum())
    }
}
