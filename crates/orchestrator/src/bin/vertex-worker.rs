//! vertex-worker: runs the built-in algorithms through the orchestrator.
//!
//! Flow:
//! - load config (TOML file, `VERTEX_*` env overrides)
//! - register the example algorithms, cascade and compound group
//! - start the worker pool, create two connected vertices
//! - run queued tasks, one cascade and one compound, printing JSON results
//! - print final metrics and stop

use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use vertex_orchestrator::builtin::{ANALYSIS_GROUP, PREDICTION_CHAIN, PREDICTIVE_ID};
use vertex_orchestrator::config::load_dotenv;
use vertex_orchestrator::{register_builtins, Orchestrator, OrchestratorConfig, Priority};

// ── CLI ─────────────────────────────────────────────────────────────

/// Vertex orchestrator demo worker.
#[derive(Parser, Debug)]
#[command(name = "vertex-worker", version, about)]
struct Cli {
    /// Path to the orchestrator TOML config.
    #[arg(long, env = "VERTEX_CONFIG", default_value = "config/vertex.toml")]
    config: String,

    /// Number of queued prediction tasks to submit.
    #[arg(long, env = "VERTEX_DEMO_TASKS", default_value_t = 1)]
    tasks: usize,

    /// Seconds to keep running after the demo so the monitor can sample.
    #[arg(long, default_value_t = 0)]
    linger: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Fall back to defaults (plus env overrides) if the file is missing
    let config = match OrchestratorConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded orchestrator config");
            cfg
        }
        Err(e) => {
            warn!(error = %e, path = %cli.config, "failed to load config, using defaults");
            OrchestratorConfig::from_env()?
        }
    };
    config.log_summary();

    let orchestrator = Orchestrator::new(config)?;
    register_builtins(&orchestrator);
    orchestrator.start()?;

    orchestrator.create_vertex_default("vertex_1")?;
    orchestrator.create_vertex_default("vertex_2")?;
    orchestrator.connect("vertex_1", "vertex_2");

    let mut handles = Vec::with_capacity(cli.tasks);
    for i in 0..cli.tasks {
        let task_id = uuid::Uuid::new_v4().to_string();
        let payload = json!([1 + i, 2 + i, 3 + i, 4 + i, 5 + i]);
        handles.push(orchestrator.enqueue_task(&task_id, PREDICTIVE_ID, payload, Priority::Medium, None)?);
    }
    for (i, result) in join_all(handles.into_iter().map(|h| h.wait())).await.into_iter().enumerate() {
        match result {
            Ok(value) => println!("Task {i} result: {value}"),
            Err(e) => warn!(task = i, error = %e, "task failed"),
        }
    }

    let cascade = orchestrator.run_cascade(PREDICTION_CHAIN, json!([10, 20, 30])).await?;
    println!("Cascade result: {}", serde_json::to_string_pretty(&cascade)?);

    let compound = orchestrator.run_compound(ANALYSIS_GROUP, json!([100, 200, 300])).await?;
    println!("Compound result: {}", serde_json::to_string_pretty(&compound)?);

    if cli.linger > 0 {
        tokio::time::sleep(Duration::from_secs(cli.linger)).await;
    }

    println!(
        "Metrics: {}",
        serde_json::to_string_pretty(&orchestrator.metrics())?
    );

    orchestrator.stop().await;
    info!("vertex-worker exited cleanly");
    Ok(())
}
