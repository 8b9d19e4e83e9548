use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod kube_store;
mod metrics;
mod service_controller;

use config::Config;
use metrics::ControllerMetrics;
use service_controller::ServiceController;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.debug, config.log_json);

    info!("Starting collector-controller v{}...", env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(ControllerMetrics::new()?);
    let metrics_addr = config.metrics_addr;
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr, server_metrics).await {
            error!("Metrics listener error: {}", e);
        }
    });

    let client = Client::try_default().await?;
    let controller = ServiceController::new(client, config, metrics);

    // Returns once a shutdown signal has drained the controller
    controller.run().await?;
    info!("Shutdown signal received, exiting...");

    Ok(())
}

/// `RUST_LOG` wins; otherwise `debug` with `--debug` and `info` without
fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
