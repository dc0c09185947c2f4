use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use beebop_lite::backend::CommandBackend;
use beebop_lite::config::PipelineConfig;
use beebop_lite::filestore::AmrRecord;
use beebop_lite::model::{AssignmentResult, QcFailure};
use beebop_lite::pipeline::{Backends, Pipeline, ProjectStatus, SubmitRequest};
use beebop_lite::shutdown::install_shutdown_handler;
use beebop_lite::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "beebop-lite")]
#[command(version)]
#[command(about = "Per-project genomic clustering pipeline")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Submit one project and run it to completion
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Species name, as keyed in the species config
    #[arg(long)]
    species: String,

    /// Project hash grouping this submission's outputs
    #[arg(long)]
    project_hash: String,

    /// JSON object mapping sample hash to sketch
    #[arg(long)]
    sketches: PathBuf,

    /// JSON object mapping sample hash to file name
    #[arg(long)]
    names: Option<PathBuf>,

    /// JSON array of AMR metadata rows (each with an "ID" column)
    #[arg(long)]
    amr: Option<PathBuf>,

    /// JSON species configuration keyed by species name
    #[arg(long)]
    config: PathBuf,

    /// Storage root for sketches and outputs
    #[arg(long, default_value = "./storage")]
    storage: PathBuf,

    /// Number of worker loops
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Clustering command; reads a JSON request on stdin, prints a JSON assignment
    #[arg(long)]
    cluster_cmd: String,

    /// Rendering command; reads a JSON request on stdin
    #[arg(long)]
    render_cmd: String,

    /// Sub-lineage command; reads a JSON request on stdin
    #[arg(long)]
    sublineage_cmd: Option<String>,
}

#[derive(Serialize)]
struct RunOutput {
    project_hash: String,
    status: ProjectStatus,
    results: Option<AssignmentResult>,
    failed_samples: Vec<QcFailure>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&raw)?)
}

async fn run_project(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = PipelineConfig::new(&args.storage).with_species_file(&args.config)?;
    config.worker_count = args.workers;

    let mut backend = CommandBackend::new(args.cluster_cmd, args.render_cmd);
    if let Some(cmd) = args.sublineage_cmd {
        backend = backend.with_sublineage_cmd(cmd);
    }
    let backend = Arc::new(backend);
    let backends = Backends {
        clustering: backend.clone(),
        rendering: backend.clone(),
        sublineage: Some(backend),
    };

    let pipeline = Pipeline::new(config, Arc::new(MemoryStore::new()), backends);
    let shutdown = install_shutdown_handler();
    let workers = pipeline.spawn_workers(shutdown.clone());
    let scheduler = pipeline.scheduler();

    let request = SubmitRequest {
        project_hash: args.project_hash.clone(),
        species: args.species,
        sketches: read_json(&args.sketches)?,
        names: match &args.names {
            Some(path) => read_json(path)?,
            None => BTreeMap::new(),
        },
        amr_metadata: match &args.amr {
            Some(path) => read_json::<Vec<AmrRecord>>(path)?,
            None => Vec::new(),
        },
    };
    let submitted = scheduler.submit(request).await?;
    tracing::info!(assign_job = %submitted.assign.id, "Waiting for project to complete");

    let mut interval = tokio::time::interval(Duration::from_millis(250));
    while !shutdown.is_cancelled() {
        interval.tick().await;
        if pipeline.is_idle().await {
            break;
        }
    }
    shutdown.cancel();
    for worker in workers {
        worker.await?;
    }

    let output = RunOutput {
        status: scheduler.get_status(&args.project_hash).await?,
        results: scheduler.results(&args.project_hash).ok(),
        failed_samples: scheduler.failed_samples(&args.project_hash)?,
        project_hash: args.project_hash,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Run(run_args) => run_project(run_args).await?,
    }
    Ok(())
}
