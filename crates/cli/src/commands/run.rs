//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{InputSource, Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(size) = args.buffer_size.filter(|size| *size > 0) {
        info!(buffer_size = size, "Overriding input capacity from CLI");
        blueprint.pipeline.input_capacity = size;
    }

    info!(
        pipeline = %blueprint.pipeline.name,
        sinks = blueprint.sinks.len(),
        dry_run = args.dry_run,
        "Configuration loaded"
    );

    let pipeline_config = PipelineConfig {
        blueprint,
        input: InputSource::from_arg(&args.input),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        dry_run: args.dry_run,
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    info!("Starting pipeline...");
    let stats = Pipeline::new(pipeline_config)
        .run(cancel)
        .await
        .context("Pipeline execution failed")?;

    let summary = stats.report.delivery.summary();
    info!(
        batches = summary.total_batches,
        records = summary.total_records,
        failed_deliveries = summary.failed_deliveries,
        duration_secs = stats.duration.as_secs_f64(),
        "Pipeline completed"
    );
    stats.print_summary();

    if let Some(e) = stats.report.teardown_errors {
        return Err(CliError::shutdown(e.to_string()).into());
    }

    info!("logport finished");
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    shutdown_signal().await;
    warn!("Received shutdown signal, stopping pipeline...");
    token.cancel();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
