//! Replicator - ReplicaSet reconciler

mod cli;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use replicator_common::telemetry::{init_logging, LoggingConfig};
use replicator_controller::build_replica_set_controller;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let config = cli.controller_config();
    config.validate()?;

    let client = build_client(&cli).await?;

    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        resync_secs = config.resync_period.as_secs(),
        concurrency = config.concurrency,
        "Starting replicator"
    );

    build_replica_set_controller(client, config).await;

    tracing::info!("Controller stopped, shutting down");
    Ok(())
}

/// Kubernetes client from an explicit kubeconfig, or inferred from the environment
async fn build_client(cli: &Cli) -> anyhow::Result<Client> {
    let Some(path) = cli.kubeconfig.as_ref() else {
        return Client::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e));
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| anyhow::anyhow!("Failed to read kubeconfig {}: {}", path.display(), e))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load kubeconfig {}: {}", path.display(), e))?;
    Client::try_from(config)
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))
}
