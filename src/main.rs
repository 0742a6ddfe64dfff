#![forbid(unsafe_code)]

//! `fleet-broker`: fleet command-and-control broker binary.
//!
//! Loads configuration, binds the agent listener, starts the realtime
//! bridge to the operator channel, and shuts everything down on
//! SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fleet_broker::agent::{listener, worker};
use fleet_broker::bridge::service;
use fleet_broker::{AppError, Broker, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "fleet-broker", about = "Fleet command-and-control broker", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("fleet-broker bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(addr) = args.listen {
        config.agent.listen_addr = addr;
    }
    info!(
        listen = %config.agent.listen_addr,
        bridge = %config.bridge.authority(),
        framing = ?config.agent.framing,
        "configuration loaded"
    );

    // ── Shared state ────────────────────────────────────
    let ct = CancellationToken::new();
    let broker = Broker::new(config, ct.clone())?;

    // ── Start tasks ─────────────────────────────────────
    let tcp = listener::bind(&broker.config.agent).map_err(|err| {
        error!(%err, "agent listener bind failed");
        err
    })?;
    let listener_handle = listener::spawn_listener(Arc::clone(&broker), tcp);
    let bridge_handle = service::spawn_bridge(Arc::clone(&broker));

    info!("broker ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Graceful shutdown ───────────────────────────────
    let (listener_result, bridge_result) = tokio::join!(listener_handle, bridge_handle);
    if let Err(err) = listener_result {
        warn!(%err, "agent listener task panicked");
    }
    if let Err(err) = bridge_result {
        warn!(%err, "realtime bridge task panicked");
    }
    worker::stop_all(&broker).await;
    let undelivered = broker.output.clear();
    info!(undelivered, "fleet-broker shut down");

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
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
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
