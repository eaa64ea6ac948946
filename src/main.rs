use anyhow::Result;
use clap::Parser;
use job_sandbox::{Janitor, JobStore};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpy_workbench::{
    config::Config,
    services::JobService,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "rpy-workbench")]
#[command(version)]
#[command(about = "Upload, decompile, extract and repack Ren'Py game files in disposable jobs")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Directory holding job workspaces (overrides config file)
    #[arg(short = 'j', long, value_name = "DIR")]
    jobs_root: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!(
            "rpy_workbench={0},job_sandbox={0},tower_http=trace",
            cli.log_level
        )
    } else {
        format!("rpy_workbench={0},job_sandbox={0}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rpy-workbench v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(jobs_root) = cli.jobs_root {
        config.storage.jobs_root = jobs_root;
    }
    config.validate()?;

    let store = JobStore::builder()
        .jobs_root(&config.storage.jobs_root)
        .expiry_policy(config.storage.expiry_policy())
        .build()
        .await?;
    info!(
        "Job store at {} (ttl {})",
        store.jobs_root().display(),
        humantime::format_duration(config.storage.job_ttl)
    );

    let cancellation_token = CancellationToken::new();

    let janitor = Janitor::new(store.clone(), config.storage.sweep_interval());
    let janitor_handle = janitor.spawn(cancellation_token.clone());

    let service = JobService::new(store, &config);
    let web_server = WebServer::new(AppState::new(service, config))?;

    let signal_token = cancellation_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let served = web_server
        .serve_with_cancellation(cancellation_token.clone())
        .await;
    // Bind failures end up here too; stop the janitor either way
    cancellation_token.cancel();
    if let Err(e) = janitor_handle.await {
        warn!("Janitor task ended abnormally: {}", e);
    }
    served?;

    info!("Shutdown complete");
    Ok(())
}
