//! Example algorithms and the demo graph wired around them.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::algorithm::{factory, Algorithm, AlgorithmInstance};
use crate::error::AlgorithmError;
use crate::orchestrator::Orchestrator;
use crate::types::{AlgorithmCategory, AlgorithmMetadata, Priority};

pub const PREDICTIVE_ID: &str = "predictive_example";
pub const LEARNING_ID: &str = "learning_example";
pub const PREDICTION_CHAIN: &str = "prediction_learning_chain";
pub const ANALYSIS_GROUP: &str = "analysis_group";

/// Predicts a 10% rise over the mean of a numeric array. Anything that is
/// not a non-empty array passes through unchanged.
#[derive(Debug, Default)]
pub struct PredictiveAverage;

#[async_trait]
impl Algorithm for PredictiveAverage {
    async fn execute(&self, payload: Value) -> Result<Value, AlgorithmError> {
        let items = match payload.as_array() {
            Some(items) if !items.is_empty() => items,
            _ => return Ok(payload),
        };
        let mut sum = 0.0;
        for item in items {
            sum += item
                .as_f64()
                .ok_or_else(|| AlgorithmError::InvalidInput(format!("non-numeric element: {item}")))?;
        }
        Ok(json!(sum / items.len() as f64 * 1.1))
    }
}

/// Remembers a fingerprint of every payload it has seen.
#[derive(Debug, Default)]
pub struct PatternLearner {
    patterns: Mutex<Vec<String>>,
}

impl PatternLearner {
    pub fn pattern_count(&self) -> usize {
        self.patterns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl Algorithm for PatternLearner {
    async fn execute(&self, payload: Value) -> Result<Value, AlgorithmError> {
        let pattern_hash = format!("{:x}", Sha256::digest(payload.to_string().as_bytes()));
        let pattern_count = {
            let mut patterns = self
                .patterns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            patterns.push(pattern_hash.clone());
            patterns.len()
        };
        Ok(json!({
            "processed_data": payload,
            "pattern_count": pattern_count,
            "pattern_hash": pattern_hash,
        }))
    }
}

/// Register both example algorithms plus the
/// `prediction_learning_chain` cascade and `analysis_group` compound.
pub fn register_builtins(orchestrator: &Orchestrator) {
    orchestrator.register_algorithm(
        PREDICTIVE_ID,
        factory(|| Ok(AlgorithmInstance::executable(PredictiveAverage))),
        AlgorithmMetadata::new(PREDICTIVE_ID, AlgorithmCategory::Predictive, Priority::Medium)
            .with_resource("cpu", 0.1)
            .with_resource("memory", 0.05)
            .with_cpu_intensity(0.3)
            .with_cascading_potential(0.8),
    );
    orchestrator.register_algorithm(
        LEARNING_ID,
        factory(|| Ok(AlgorithmInstance::executable(PatternLearner::default()))),
        AlgorithmMetadata::new(LEARNING_ID, AlgorithmCategory::Learning, Priority::High)
            .with_resource("cpu", 0.2)
            .with_resource("memory", 0.1)
            .with_cpu_intensity(0.5)
            .with_cascading_potential(0.6),
    );

    orchestrator.define_cascade(PREDICTION_CHAIN, [PREDICTIVE_ID, LEARNING_ID]);
    orchestrator.define_compound(ANALYSIS_GROUP, [PREDICTIVE_ID, LEARNING_ID]);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::graph::COMPOUND_AGGREGATE_KEY;
    use crate::monitor::FixedSampler;

    #[tokio::test]
    async fn predictive_average() {
        let p = PredictiveAverage;
        let out = p.execute(json!([1, 2, 3, 4, 5])).await.unwrap();
        assert!((out.as_f64().unwrap() - 3.3).abs() < 1e-9);

        assert_eq!(p.execute(json!([])).await.unwrap(), json!([]));
        assert_eq!(p.execute(json!({"a": 1})).await.unwrap(), json!({"a": 1}));
        assert!(matches!(
            p.execute(json!([1, "two"])).await,
            Err(AlgorithmError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn pattern_learner_accumulates() {
        let learner = PatternLearner::default();
        let first = learner.execute(json!([1, 2])).await.unwrap();
        let second = learner.execute(json!([1, 2])).await.unwrap();

        assert_eq!(first["processed_data"], json!([1, 2]));
        assert_eq!(first["pattern_count"], 1);
        assert_eq!(second["pattern_count"], 2);
        assert_eq!(first["pattern_hash"], second["pattern_hash"]);
        assert_eq!(first["pattern_hash"].as_str().unwrap().len(), 64);
        assert_eq!(learner.pattern_count(), 2);
    }

    #[tokio::test]
    async fn builtin_graph() {
        let o = Orchestrator::with_sampler(OrchestratorConfig::default(), Arc::new(FixedSampler::default()))
            .unwrap();
        register_builtins(&o);

        let cascade = o.run_cascade(PREDICTION_CHAIN, json!([10, 20, 30])).await.unwrap();
        assert!((cascade["processed_data"].as_f64().unwrap() - 22.0).abs() < 1e-9);
        assert_eq!(cascade["pattern_count"], 1);

        let compound = o.run_compound(ANALYSIS_GROUP, json!([100, 200, 300])).await.unwrap();
        let predicted = compound[PREDICTIVE_ID].as_f64().unwrap();
        assert!((predicted - 220.0).abs() < 1e-9);
        assert!(compound[LEARNING_ID].is_object());
        // Only the numeric member feeds the aggregate.
        assert!((compound[COMPOUND_AGGREGATE_KEY].as_f64().unwrap() - predicted).abs() < 1e-9);

        // Same cached learner instance keeps counting.
        let again = o.run_cascade(PREDICTION_CHAIN, json!([1])).await.unwrap();
        assert_eq!(again["pattern_count"], 3);
    }
}
