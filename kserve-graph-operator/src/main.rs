//! The InferenceGraph raw deployment controller.

mod app;
mod config;
#[cfg(test)]
mod fixtures;
mod k8s;
mod raw;
mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;
use kserve_graph_core::constants::CONTROLLER_NAME;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    let recorder = PrometheusBuilder::new().add_global_label("controller", CONTROLLER_NAME).build();
    let metrics = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder)).context("error setting prometheus metrics recorder")?;
    tracing::info!(
        http_port = %cfg.http_port,
        kserve_namespace = %cfg.kserve_namespace,
        config_map = %cfg.config_map_name,
        watch_namespace = ?cfg.watch_namespace,
        default_deployment_mode = %cfg.default_deployment_mode,
        "starting InferenceGraph controller",
    );
    if let Err(err) = App::new(cfg, metrics).await?.spawn().await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
