#![forbid(unsafe_code)]

//! `courier` — outbound messaging session server binary.
//!
//! Bootstraps configuration, starts the HTTP transport and the
//! inactivity reaper, and drains live sessions on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use courier::config::GlobalConfig;
use courier::reaper::spawn_reaper;
use courier::registry::SessionRegistry;
use courier::transport::gateway::GatewayTransport;
use courier::{http, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "courier", about = "Outbound messaging session server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the credential data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("courier server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::load_default()?,
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|err| AppError::Config(format!("cannot create data dir: {err}")))?;

    let config = Arc::new(config);
    info!(port = config.http_port, "configuration loaded");

    // ── Build the session engine ────────────────────────
    let transport = Arc::new(GatewayTransport::new(config.connection.gateway_url.clone()));
    let registry = SessionRegistry::new(Arc::clone(&config), transport);

    let ct = CancellationToken::new();
    let reaper_handle = spawn_reaper(Arc::clone(&registry), ct.clone());
    info!("reaper started");

    // ── Start the HTTP transport ────────────────────────
    let http_ct = ct.clone();
    let http_registry = Arc::clone(&registry);
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(http_registry, http_ct).await {
            error!(%err, "http transport failed");
        }
    });

    info!("courier ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Drain live sessions ─────────────────────────────
    registry.stop_all().await;
    for _ in 0..50 {
        if registry.is_empty().await {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    let leftover = registry.len().await;
    if leftover > 0 {
        error!(leftover, "sessions did not drain before shutdown");
    }

    let _ = tokio::join!(http_handle, reaper_handle);
    info!("courier shut down");

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
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
