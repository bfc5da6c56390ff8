//! grafops
//!
//! Keeps Grafana organizations, folders, data sources, and dashboards in line
//! with the TOML manifests in a directory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use grafops_api::GrafanaClient;
use grafops_controller::{
    config::Config,
    secrets::FileSecretSource,
    worker::{Controller, ControllerWorker},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to GRAFOPS_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting grafops");
    info!(
        grafana_url = %config.grafana_url,
        manifest_dir = %config.manifest_dir.display(),
        state_file = %config.state_file.display(),
        "Configuration loaded"
    );

    let client = GrafanaClient::new(&config.client_config()).context("failed to build Grafana client")?;
    let controller = Controller::new(
        Arc::new(client),
        Box::new(FileSecretSource::new(&config.secrets_dir)),
        &config.manifest_dir,
        &config.state_file,
    );

    if config.once {
        let stats = controller.run_pass().await?;
        info!(
            created = stats.created,
            updated = stats.updated,
            up_to_date = stats.up_to_date,
            deleted = stats.deleted,
            failed = stats.failed,
            "Pass complete"
        );
        if stats.failed > 0 {
            bail!("{} instance(s) failed to reconcile", stats.failed);
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = ControllerWorker::new(controller, config.reconcile_interval);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    } else {
        info!("Received shutdown signal");
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for worker to shut down...");
    if let Err(e) = tokio::time::timeout(Duration::from_secs(10), worker_handle).await {
        warn!(error = %e, "Controller worker did not shut down in time");
    }

    info!("grafops shutdown complete");
    Ok(())
}
