//! CLI front end for the erasure-workflow orchestration engine.
//!
//! Per-vendor connectors are out of scope (spec.md §1); this binary wires the
//! engine against `FakeConnector` for every system so the orchestration
//! itself can be exercised end to end. A real deployment swaps in connector
//! implementations at this same seam (`EngineDeps::connectors`).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use erasure_common::{CreateErasureRequest, Jurisdiction, System, UserIdentifiers};
use erasure_runtime::{
    Connector, Engine, EngineDeps, FakeConnector, NotificationSink, SqliteStateStore, StateStore,
    TracingSink,
};
use uuid::Uuid;

mod config;

use config::OrchestratorConfig;

#[derive(Parser)]
#[command(name = "erasure-orchestrator")]
#[command(version, about = "Durable erasure-workflow orchestration engine")]
struct Cli {
    /// Path to erasure.toml. Defaults to ./erasure.toml if present.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new erasure request and run it to completion or until idle.
    Submit {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        jurisdiction: String,
        #[arg(long, default_value = "cli")]
        requested_by: String,
        #[arg(long)]
        legal_proof: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Run the engine as a long-lived daemon: workers plus the zombie cron.
    Run,
    /// Run a single zombie-scan pass immediately and exit.
    ScanNow,
    /// Show a workflow's current state.
    Status {
        workflow_id: Uuid,
    },
    /// Print a workflow's certificate, if generated.
    Certificate {
        workflow_id: Uuid,
    },
    /// Apply a legal hold to a step within a workflow.
    LegalHold {
        workflow_id: Uuid,
        step_name: String,
        #[arg(long = "condition")]
        conditions: Vec<String>,
        #[arg(long, default_value_t = 365)]
        max_duration_days: u32,
    },
    /// Cancel a workflow.
    Cancel {
        workflow_id: Uuid,
    },
}

fn build_engine(config: &OrchestratorConfig) -> Result<Engine> {
    let store: Arc<dyn StateStore> = if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Arc::new(SqliteStateStore::open(&config.db_path.to_string_lossy())?)
    } else {
        Arc::new(SqliteStateStore::open(&config.db_path.to_string_lossy())?)
    };

    let signing = match &config.signing_key_path {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("failed to read signing key at {}", path.display()))?;
            let bytes: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("signing key must be exactly 32 bytes"))?;
            Arc::new(erasure_runtime::crypto::SigningContext::from_bytes(&bytes))
        }
        None => {
            tracing::warn!("no signing_key_path configured, generating an ephemeral key for this process");
            Arc::new(erasure_runtime::crypto::SigningContext::generate())
        }
    };

    let connectors: Vec<Arc<dyn Connector>> = System::ALL
        .iter()
        .map(|s| Arc::new(FakeConnector::new(*s, 0)) as Arc<dyn Connector>)
        .collect();
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(TracingSink)];

    Ok(Engine::new(
        config.engine.clone(),
        EngineDeps {
            store,
            connectors,
            signing,
            sinks,
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Submit {
            user_id,
            jurisdiction,
            requested_by,
            legal_proof,
            reason,
        } => {
            let mut engine = build_engine(&config)?;
            engine.start_zombie_scan_loop();
            let created = engine
                .submit_request(CreateErasureRequest {
                    user_identifiers: UserIdentifiers::new(&user_id),
                    jurisdiction: Jurisdiction::parse_or_other(&jurisdiction),
                    requested_by,
                    legal_proof,
                    reason,
                    original_workflow_id: None,
                })
                .await?;
            println!("workflow_id: {}", created.workflow_id);
            println!("newly_created: {}", created.newly_created);
        }
        Commands::Run => {
            let mut engine = build_engine(&config)?;
            engine.start_zombie_scan_loop();
            tracing::info!("engine running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        }
        Commands::ScanNow => {
            let engine = build_engine(&config)?;
            let processed = engine.scan_zombies_now().await?;
            println!("processed {} due zombie checks", processed.len());
        }
        Commands::Status { workflow_id } => {
            let engine = build_engine(&config)?;
            let workflow = engine.workflows.load_workflow(workflow_id)?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
        }
        Commands::Certificate { workflow_id } => {
            let engine = build_engine(&config)?;
            match engine.load_certificate(workflow_id)? {
                Some(certificate) => println!("{}", serde_json::to_string_pretty(&certificate)?),
                None => println!("no certificate generated yet for {workflow_id}"),
            }
        }
        Commands::LegalHold {
            workflow_id,
            step_name,
            conditions,
            max_duration_days,
        } => {
            let engine = build_engine(&config)?;
            engine
                .legal_hold()
                .apply_hold(workflow_id, &step_name, conditions, max_duration_days)?;
            println!("legal hold applied to {step_name} on {workflow_id}");
        }
        Commands::Cancel { workflow_id } => {
            let engine = build_engine(&config)?;
            engine.cancel_workflow(workflow_id)?;
            println!("workflow {workflow_id} cancelled");
        }
    }

    Ok(())
}
