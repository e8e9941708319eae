#![forbid(unsafe_code)]

//! `localrun-daemon`: local development run daemon binary.
//!
//! Bootstraps configuration, opens the app database, starts the update
//! poller and the IPC server the `localrun` client talks to.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use localrun::config::GlobalConfig;
use localrun::daemon::DaemonState;
use localrun::ipc::server::spawn_ipc_server;
use localrun::manager::process::ProcessRunManager;
use localrun::persistence::app_repo::AppRepo;
use localrun::persistence::db;
use localrun::secrets::FileSecretsStore;
use localrun::stream::StreamRegistry;
use localrun::update::{HttpUpdateChecker, VersionChecker};
use localrun::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "localrun-daemon", about = "Local development run daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("localrun daemon bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    // ── Build shared daemon state ───────────────────────
    let registry = Arc::new(StreamRegistry::new());
    let updates = Arc::new(HttpUpdateChecker::new(config.update.clone()));
    let checker: Arc<dyn VersionChecker> = updates.clone();
    let manager = ProcessRunManager::new(Arc::clone(&registry), config.stop_grace());

    let state = Arc::new(DaemonState::new(
        Arc::clone(&config),
        registry,
        Arc::new(AppRepo::new(db)),
        Arc::new(FileSecretsStore::new()),
        checker,
        Arc::new(manager),
    ));

    // ── Start background services ───────────────────────
    let ct = CancellationToken::new();
    let poller_handle = Arc::clone(&updates).spawn_poller(ct.clone());
    let ipc_handle = spawn_ipc_server(Arc::clone(&state), ct.clone())?;

    info!("localrun daemon ready");

    // ── Wait for shutdown signal ────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = state.shutdown_token().cancelled() => info!("shutdown requested"),
    }
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(poller_handle, ipc_handle);

    if state.is_forced_shutdown() {
        error!("daemon stopped for a forced upgrade");
        return Err(AppError::ForcedUpgrade(
            "daemon stopped to complete a mandatory upgrade".into(),
        ));
    }

    info!("localrun daemon shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Tracing(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Tracing(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
