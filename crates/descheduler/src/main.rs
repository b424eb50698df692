//! Descheduler - cluster rebalancing controller
//!
//! Runs as a long-lived in-cluster process, periodically evicting pods that
//! violate rebalancing policies so the platform scheduler can re-place them
//! more evenly.

use anyhow::Result;
use clap::Parser;
use descheduler_lib::config::find_config_file;
use descheduler_lib::health::{components, HealthRegistry};
use descheduler_lib::{
    ClusterClient, Descheduler, DeschedulerConfig, DeschedulerMetrics, KubeClusterClient,
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

#[derive(Parser)]
#[command(name = "descheduler")]
#[command(version, about = "Lightweight Kubernetes descheduler", long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults to ./config.yaml,
    /// /etc/descheduler/config.yaml or ./configs/config.yaml)
    #[arg(long)]
    config: Option<String>,

    /// Path to a kubeconfig file (defaults to in-cluster credentials,
    /// then ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,

    /// Log verbosity 0-5, overriding the logLevel config key
    #[arg(long = "log-level")]
    log_level: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config.as_deref())?;
    let config = Arc::new(DeschedulerConfig::load(&config_path)?);

    tracing_subscriber::registry()
        .with(level_filter(cli.log_level, &config.log_level))
        .with(fmt::layer().json())
        .init();

    info!("Starting descheduler {}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", config_path.display());

    let kube_client = KubeClusterClient::connect(cli.kubeconfig.as_deref()).await?;
    kube_client.check_connectivity().await?;
    info!("Kubernetes client created successfully");
    let client: Arc<dyn ClusterClient> = Arc::new(kube_client);

    let health = HealthRegistry::new();
    health.register(components::CLUSTER_CLIENT).await;
    health.register(components::CONTROLLER).await;
    let metrics = DeschedulerMetrics::new();

    let state = Arc::new(api::AppState::new(health.clone(), metrics));
    tokio::spawn(api::serve(config.metrics_port, state));

    health.set_ready(true).await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(received) => info!("Received {}, shutting down...", received),
                Err(err) => warn!("Failed to install signal handlers: {:#}", err),
            }
            cancel.cancel();
        });
    }

    let descheduler = Descheduler::new(client, config, health);
    descheduler.run(&cancel).await?;

    info!("Descheduler stopped gracefully");
    Ok(())
}

/// Map the 0-5 CLI verbosity onto tracing levels; without the flag the
/// environment filter and then the config value apply.
fn level_filter(cli_level: Option<u8>, config_level: &str) -> EnvFilter {
    let level = match cli_level {
        Some(0) => "error",
        Some(1) => "warn",
        Some(2) => "info",
        Some(3) => "debug",
        Some(_) => "trace",
        None => config_level,
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

async fn shutdown_signal() -> Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let received = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    Ok(received)
}
