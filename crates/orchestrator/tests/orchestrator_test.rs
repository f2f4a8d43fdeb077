//! End-to-end tests for the orchestrator's public API.
//!
//! Each test builds its own orchestrator with a fixed resource sampler so
//! results do not depend on the host's load.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use vertex_orchestrator::{
    factory, AlgorithmCategory, AlgorithmError, AlgorithmInstance, AlgorithmMetadata,
    FixedSampler, Orchestrator, OrchestratorConfig, OrchestratorError, Priority, StageOutcome,
    COMPOUND_AGGREGATE_KEY,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn build(workers: usize) -> Orchestrator {
    let config = OrchestratorConfig {
        worker_count: workers,
        dequeue_timeout_ms: 50,
        ..OrchestratorConfig::default()
    };
    let o = Orchestrator::with_sampler(config, Arc::new(FixedSampler::default())).unwrap();
    o.register_algorithm(
        "double",
        factory(|| {
            Ok(AlgorithmInstance::callable(|v: Value| {
                v.as_i64()
                    .map(|n| json!(n * 2))
                    .ok_or_else(|| AlgorithmError::InvalidInput("expected integer".into()))
            }))
        }),
        AlgorithmMetadata::new("double", AlgorithmCategory::Predictive, Priority::Medium),
    );
    o
}

#[tokio::test]
async fn single_task_doubles() {
    let o = build(4);
    o.start().unwrap();

    let out = timeout(TIMEOUT, o.submit_task("t1", "double", json!(5), Priority::Medium, None))
        .await
        .expect("task timed out")
        .unwrap();
    assert_eq!(out, json!(10));

    let stats = o.algorithm_stats("double").unwrap();
    assert_eq!(stats.total_executions, 1);
    o.stop().await;
}

#[tokio::test]
async fn cascade_of_two_doubles() {
    let o = build(1);
    o.define_cascade("c", ["double", "double"]);

    let out = o.run_cascade("c", json!(5)).await.unwrap();
    assert_eq!(out, json!(20));
}

#[tokio::test]
async fn cascade_keeps_last_good_output() {
    let o = build(1);
    o.define_cascade("c", ["double", "missing", "double"]);

    let report = o.run_cascade_report("c", json!(3)).await.unwrap();
    assert_eq!(report.output, json!(6));
    assert!(!report.completed);
    assert_eq!(report.stages.len(), 2);
    assert_eq!(
        report.stages[0],
        StageOutcome {
            algorithm_id: "double".into(),
            result: Ok(()),
        }
    );
    assert_eq!(report.stages[1].algorithm_id, "missing");
    assert!(report.stages[1].result.is_err());
}

#[tokio::test]
async fn compound_of_one_double() {
    let o = build(1);
    o.define_compound("g", ["double"]);

    let merged = o.run_compound("g", json!(5)).await.unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged["double"], json!(10));
    assert_eq!(merged[COMPOUND_AGGREGATE_KEY], json!(10.0));
}

#[tokio::test]
async fn undefined_graphs_are_errors() {
    let o = build(1);
    assert!(matches!(
        o.run_cascade("nope", json!(1)).await,
        Err(OrchestratorError::UndefinedChain(_))
    ));
    assert!(matches!(
        o.run_compound("nope", json!(1)).await,
        Err(OrchestratorError::UndefinedGroup(_))
    ));
}

#[tokio::test]
async fn priority_pickup_order() {
    let o = build(1);
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = Arc::clone(&seen);
    o.register_algorithm(
        "record",
        factory(move || {
            let log = Arc::clone(&log);
            Ok(AlgorithmInstance::callable(move |v: Value| {
                log.lock().unwrap().push(v.as_str().unwrap_or_default().to_string());
                Ok(v)
            }))
        }),
        AlgorithmMetadata::new("record", AlgorithmCategory::Recursive, Priority::Low),
    );

    let handles = vec![
        o.enqueue_task("a", "record", json!("LOW"), Priority::Low, None).unwrap(),
        o.enqueue_task("b", "record", json!("CRITICAL"), Priority::Critical, None).unwrap(),
        o.enqueue_task("c", "record", json!("MEDIUM"), Priority::Medium, None).unwrap(),
    ];
    o.start().unwrap();
    for handle in handles {
        timeout(TIMEOUT, handle.wait()).await.expect("task timed out").unwrap();
    }

    assert_eq!(*seen.lock().unwrap(), vec!["CRITICAL", "MEDIUM", "LOW"]);
    o.stop().await;
}

#[tokio::test]
async fn explicit_vertex_and_placement() {
    let o = build(2);
    o.create_vertex("vertex_1", 10).unwrap();
    o.create_vertex("vertex_2", 10).unwrap();
    o.connect("vertex_1", "vertex_2");
    o.start().unwrap();

    let out = o
        .submit_task("on-2", "double", json!(21), Priority::High, Some("vertex_2"))
        .await
        .unwrap();
    assert_eq!(out, json!(42));
    assert!(matches!(
        o.submit_task("bad", "double", json!(1), Priority::High, Some("vertex_9")).await,
        Err(OrchestratorError::VertexNotFound(_))
    ));

    let v2 = o.vertex_metrics("vertex_2").unwrap();
    assert_eq!(v2.active_tasks, 0);
    assert_eq!(v2.connections, vec!["vertex_1"]);
    o.stop().await;
}

#[tokio::test]
async fn no_dispatch_after_stop() {
    let o = build(2);
    o.start().unwrap();
    o.stop().await;

    assert!(matches!(
        o.submit_task("late", "double", json!(1), Priority::Critical, None).await,
        Err(OrchestratorError::NotRunning)
    ));
    assert!(o.algorithm_stats("double").is_none());
}

#[tokio::test]
async fn metrics_reflect_activity() {
    let o = build(2);
    o.start().unwrap();
    for i in 0..5 {
        o.submit_task(&format!("m{i}"), "double", json!(i), Priority::Low, None)
            .await
            .unwrap();
    }

    let metrics = o.metrics();
    assert_eq!(metrics.algorithms["double"].total_executions, 5);
    assert_eq!(metrics.pending_tasks, 0);
    assert_eq!(metrics.queued_tasks, 0);
    assert_eq!(metrics.cached_algorithms, 1);
    assert_eq!(metrics.vertices.len(), 1);
    o.stop().await;
}
