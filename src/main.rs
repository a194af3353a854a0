//! Project Discovery & Analysis Pipeline — process entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use project_pipeline::config::Config;
use project_pipeline::{api, discovery, storage, worker, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Project Discovery & Analysis Pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the watcher, discovery subscriber, worker pool, and realtime server.
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// One-shot discovery of a directory tree without starting the watcher.
    Scan {
        #[arg(long)]
        path: String,
        #[arg(long, default_value_t = false)]
        reset_deleted: bool,
    },
    /// Force a project stuck in ANALYZING back to DISCOVERED.
    ResetStuck {
        #[arg(long)]
        project: Uuid,
    },
    /// Inspect or administer the analysis queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    Stats,
    Pause,
    Resume,
    Clear,
    Remove { job_id: String },
    ForceDelete { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,project_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            run_serve(config).await
        }
        Commands::Scan { path, reset_deleted } => run_scan(config, &path, reset_deleted).await,
        Commands::ResetStuck { project } => run_reset_stuck(config, project).await,
        Commands::Queue { action } => run_queue(config, action).await,
    }
}

async fn run_serve(config: Config) -> Result<()> {
    tracing::info!("starting project discovery & analysis pipeline");
    let state = AppState::new(config.clone()).await?;

    let (mut observer, watch_rx) =
        project_pipeline::watcher::DebouncedObserver::new(config.watcher.clone());
    observer.start()?;

    let subscriber = discovery::DiscoverySubscriber::new(state.store.clone(), state.bus.clone());
    let discovery_task = tokio::spawn(async move { subscriber.run(watch_rx).await });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let delayed_queue = state.queue.clone();
    let mut delayed_shutdown_rx = shutdown_rx.clone();
    let delayed_interval = Duration::from_millis(config.queue.process_delayed_interval_ms);
    let delayed_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(delayed_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = delayed_queue.process_delayed().await {
                        tracing::warn!(%err, "failed to promote delayed jobs");
                    }
                }
                _ = delayed_shutdown_rx.changed() => break,
            }
        }
    });

    let mut worker_tasks = Vec::new();
    for _ in 0..config.worker.concurrency {
        let processor = Arc::new(worker::WorkerProcessor::new(
            state.store.clone(),
            state.bus.clone(),
            state.queue.clone(),
            state.cache.clone(),
            state.executor.clone(),
            state.analyzer.clone(),
            config.worker.clone(),
        ));
        let rx = shutdown_rx.clone();
        worker_tasks.push(tokio::spawn(processor.run_loop(rx)));
    }

    let app = api::create_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "realtime server listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining pipeline");

    state.queue.pause().await.ok();
    shutdown_tx.send(true).ok();
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join_all(worker_tasks),
    )
    .await;

    observer.flush_all().await;
    server.abort();
    discovery_task.abort();
    delayed_task.abort();

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok() };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_scan(config: Config, path: &str, reset_deleted: bool) -> Result<()> {
    let store = storage::PgStore::connect(&config.database_url).await?;
    let bus = project_pipeline::events::EventBus::new(64);
    let discovered = discovery::scan_once(
        &store,
        &bus,
        std::path::Path::new(path),
        config.watcher.depth,
        reset_deleted,
    )
    .await?;
    tracing::info!(discovered, "scan complete");
    Ok(())
}

async fn run_reset_stuck(config: Config, project: Uuid) -> Result<()> {
    let store = storage::PgStore::connect(&config.database_url).await?;
    let queue =
        project_pipeline::queue::AnalysisQueue::new(&config.redis_url, config.queue.max_attempts)?;
    discovery::reset_stuck(&store, &queue, project).await?;
    tracing::info!(%project, "project reset to DISCOVERED");
    Ok(())
}

async fn run_queue(config: Config, action: QueueAction) -> Result<()> {
    let queue =
        project_pipeline::queue::AnalysisQueue::new(&config.redis_url, config.queue.max_attempts)?;
    match action {
        QueueAction::Stats => {
            let stats = queue.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        QueueAction::Pause => queue.pause().await?,
        QueueAction::Resume => queue.resume().await?,
        QueueAction::Clear => {
            let removed = queue.clear().await?;
            println!("removed {removed} stale jobs");
        }
        QueueAction::Remove { job_id } => queue.remove(&job_id).await?,
        QueueAction::ForceDelete { job_id } => queue.force_delete(&job_id).await?,
    }
    Ok(())
}
