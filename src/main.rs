//! plothub - Main entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use plothub::{
    config::{CliOverrides, Config},
    content::{ContentStore, NoopWrite},
    gate::TokenStore,
    gateway::{self, AppState},
    orchestrator::{ProcessLauncher, RestartJob, RestartOrchestrator, WorkerPool},
    registry::ArtifactRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "plothub")]
#[command(about = "Serve plot rendering workers with zero-downtime content updates")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding plot_<id>.py files
    #[arg(long)]
    plot_path: Option<PathBuf>,

    /// Directory holding datasets
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Worker script, started as `<program> <script> <port>`
    #[arg(long)]
    worker_path: Option<PathBuf>,

    /// Interpreter used to run the worker script
    #[arg(long)]
    worker_program: Option<String>,

    /// JSON file with per-plot access tokens
    #[arg(long)]
    token_path: Option<PathBuf>,

    /// Port of the first worker
    #[arg(long)]
    worker_port_1: Option<u16>,

    /// Port of the second worker
    #[arg(long)]
    worker_port_2: Option<u16>,
}

impl From<Args> for CliOverrides {
    fn from(args: Args) -> Self {
        Self {
            port: args.port,
            plot_path: args.plot_path,
            data_path: args.data_path,
            worker_path: args.worker_path,
            worker_program: args.worker_program,
            token_path: args.token_path,
            worker_port_1: args.worker_port_1,
            worker_port_2: args.worker_port_2,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("plothub=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env()?.with_overrides(args.into())?;
    tracing::info!(
        port = config.server.port,
        workers = ?config.workers.ports,
        "Starting plothub"
    );

    let tokens = TokenStore::load(&config.content.token_path).await?;
    let content = ContentStore::from_config(&config.content);
    let artifacts = content
        .scan()
        .await
        .context("content directories must exist before startup")?;

    // The second worker counts as live so the first cycle starts the first.
    let pool = Arc::new(WorkerPool::new(config.workers.ports, 1));
    let launcher = Arc::new(ProcessLauncher::from_config(&config.workers));
    let orchestrator =
        RestartOrchestrator::start(pool, ArtifactRegistry::new(artifacts), launcher);

    // Bring the first worker up; its readiness marks everything ready.
    orchestrator.submit(RestartJob::refresh_all(NoopWrite)).await?;

    let state = AppState::new(&config, orchestrator.clone(), tokens, content)?;
    if state.sessions.is_empty() {
        tracing::warn!("PLOTHUB_SESSION_TOKENS is empty, the management API will reject every request");
    }
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.host))?;

    gateway::serve(state, addr, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
    })
    .await?;

    orchestrator.shutdown().await?;
    tracing::info!("Workers stopped");
    Ok(())
}
