#![forbid(unsafe_code)]

//! `process-relay`: process supervisor server binary.
//!
//! Bootstraps configuration, creates the process registry and event bus,
//! and starts the HTTP/WebSocket gateway plus the local IPC gateway for
//! `process-relay-ctl`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use process_relay::config::GlobalConfig;
use process_relay::gateway::{ipc, ws};
use process_relay::supervisor::{EventBus, ProcessRegistry};
use process_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "process-relay", about = "Process supervisor with live lifecycle broadcast", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the HTTP/WebSocket port.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("process-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!(
        program = %config.command.program,
        args = ?config.command.args,
        "configuration loaded"
    );

    // ── Build the supervision core ──────────────────────
    let bus = EventBus::new(config.event_buffer);
    let registry = ProcessRegistry::new(config.command.clone(), bus);

    // ── Start transports ────────────────────────────────
    let ct = CancellationToken::new();

    let ipc_handle = ipc::spawn_ipc_server(
        Arc::clone(&registry),
        &config.ipc_name,
        config.outbound_buffer,
        ct.clone(),
    )?;

    let http_ct = ct.clone();
    let http_registry = Arc::clone(&registry);
    let http_config = Arc::clone(&config);
    let http_handle = tokio::spawn(async move {
        if let Err(err) = ws::serve_http(http_registry, &http_config, http_ct).await {
            error!(%err, "http gateway failed");
        }
    });

    info!("process-relay ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Best-effort termination of remaining processes ──
    let remaining = registry.shutdown(config.shutdown_grace()).await;
    if remaining > 0 {
        error!(remaining, "processes left running at shutdown; relying on kill-on-drop");
    }

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(ipc_handle, http_handle);
    info!("process-relay shut down");

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
