//! nxt-ra - NXT research agent
//!
//! - `nxt-ra run`: one research run across the portfolio, summary on stdout
//! - `nxt-ra serve`: HTTP control surface (default port 5731)
//! - `nxt-ra init [--seed projects.json]`: create the database, optionally
//!   importing the project portfolio

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nxt_common::config::{database_path, locate_config_file, resolve_root_folder, ROOT_FOLDER_ENV};
use nxt_ra::config::Settings;
use nxt_ra::db::projects::NewProject;
use nxt_ra::workflow::RunOrchestrator;
use nxt_ra::{AppState, RunError};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "nxt-ra")]
#[command(about = "Research agent for the NXT infrastructure portfolio")]
#[command(version)]
struct Args {
    /// Root folder holding the database, feeds and exports
    #[arg(short, long, global = true)]
    root_folder: Option<String>,

    /// Settings file (default: ~/.config/nxt/nxt-ra.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the research pipeline once
    Run,
    /// Serve the HTTP control surface
    Serve {
        #[arg(short, long, default_value = "5731", env = "NXT_RA_PORT")]
        port: u16,
    },
    /// Create the database schema
    Init {
        /// JSON array of projects to import
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_file = locate_config_file(args.config.as_deref())?;
    let settings = Settings::load(config_file.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("nxt_ra={},tower_http=info", settings.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config_file.as_deref(),
    )?;
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    info!(
        "nxt-ra {} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("NXT_GIT_HASH"),
        env!("NXT_BUILD_TIMESTAMP"),
        env!("NXT_BUILD_PROFILE")
    );
    info!("Root folder: {}", root_folder.display());

    match args.command {
        Command::Init { seed } => init(&root_folder, seed.as_deref()).await,
        Command::Run => run_once(&root_folder, settings).await,
        Command::Serve { port } => serve(&root_folder, settings, port).await,
    }
}

async fn init(root_folder: &Path, seed: Option<&Path>) -> Result<()> {
    let pool = nxt_common::db::init_database(&database_path(root_folder)).await?;

    if let Some(seed) = seed {
        let content = std::fs::read_to_string(seed)
            .with_context(|| format!("Failed to read {}", seed.display()))?;
        let projects: Vec<NewProject> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", seed.display()))?;
        let inserted = nxt_ra::update::seed_portfolio(&pool, &projects).await?;
        info!(inserted, total = projects.len(), "Portfolio seeded");
    }

    info!("Database ready: {}", database_path(root_folder).display());
    Ok(())
}

/// Validate settings and build the orchestrator; nothing is written on failure
fn orchestrator(pool: sqlx::SqlitePool, settings: Settings, root_folder: &Path) -> Result<RunOrchestrator> {
    RunOrchestrator::from_settings(pool, settings, root_folder).map_err(|e| match e {
        RunError::Configuration(msg) => anyhow::anyhow!("Configuration error: {}", msg),
        other => other.into(),
    })
}

async fn run_once(root_folder: &Path, settings: Settings) -> Result<()> {
    settings.validate()?;
    let pool = nxt_common::db::init_database(&database_path(root_folder)).await?;
    let orchestrator = orchestrator(pool, settings, root_folder)?;

    let ticket = orchestrator.begin().await?;
    let cancel = ticket.cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let summary = orchestrator.execute(ticket).await?;
    println!("{}", summary.to_markdown());
    Ok(())
}

async fn serve(root_folder: &Path, settings: Settings, port: u16) -> Result<()> {
    settings.validate()?;
    let pool = nxt_common::db::init_database(&database_path(root_folder)).await?;
    let orchestrator = orchestrator(pool.clone(), settings, root_folder)?;

    let interrupted = nxt_ra::db::runs::fail_interrupted_runs(&pool).await?;
    if interrupted > 0 {
        warn!(interrupted, "Marked runs left over from a previous process as failed");
    }

    let state = AppState::new(pool, orchestrator.clone(), root_folder.to_path_buf());
    let app = nxt_ra::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            orchestrator.cancel().await;
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
