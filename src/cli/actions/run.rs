//! The `Run` and `ValidateConfig` actions: load configuration, then either
//! report on it or actually wire up and run the pipeline end to end
//! (scheduler -> batcher -> pipeline stages -> OTLP exporter), serving the
//! health endpoint alongside it until interrupted.

use crate::cli::actions::Action;
use crate::config::Config;
use crate::exporter::Exporter;
use crate::health;
use crate::pipeline::Pipeline;
use crate::pipeline::batcher::Batcher;
use crate::scheduler::Scheduler;
use anyhow::{Context, Result};
use prometheus::Registry;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

async fn load_config(config_path: &Path) -> Result<Config> {
    let document = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("reading configuration file {}", config_path.display()))?;
    Config::from_yaml_str(&document).map_err(|e| anyhow::anyhow!(e)).with_context(|| "validating configuration document")
}

/// Run the chosen `action` to completion.
///
/// # Errors
/// Returns an error if the configuration cannot be loaded, any pipeline
/// component fails to start, or the health endpoint fails to bind.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::ValidateConfig { config_path } => {
            let config = load_config(&config_path).await?;
            info!(targets = config.scrapers.len(), "configuration is valid");
            Ok(())
        }
        Action::Run { config_path, health_port } => run(config_path, health_port).await,
    }
}

async fn run(config_path: std::path::PathBuf, health_port: u16) -> Result<()> {
    let config = load_config(&config_path).await?;

    let registry = Registry::new();
    let pipeline = Pipeline::new(&config);
    pipeline.register(&registry).context("registering pipeline self-telemetry")?;

    let exporter = Exporter::new(&config.exporter).map_err(|e| anyhow::anyhow!(e)).context("building OTLP metrics exporter")?;

    let (scrape_tx, scrape_rx) = mpsc::channel(256);
    let (batch_tx, mut batch_rx) = mpsc::channel(64);

    let mut scheduler = Scheduler::start(
        &config,
        std::sync::Arc::clone(&pipeline.breaker),
        std::sync::Arc::clone(&pipeline.memory_limiter),
        std::sync::Arc::clone(&pipeline.query_correlator),
        scrape_tx,
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))
    .context("starting scrape scheduler")?;
    scheduler.register(&registry).context("registering scheduler self-telemetry")?;

    let mut batcher = Batcher::spawn(config.batcher.max_size, config.batcher.timeout(), scrape_rx, batch_tx);

    let shutdown = CancellationToken::new();
    let memory_check_interval = config.memory_limiter.check_interval();
    let memory_limiter = std::sync::Arc::clone(&pipeline.memory_limiter);
    let memory_refresh_shutdown = shutdown.clone();
    let memory_refresh_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(memory_check_interval);
        loop {
            tokio::select! {
                () = memory_refresh_shutdown.cancelled() => break,
                _ = ticker.tick() => memory_limiter.refresh(),
            }
        }
    });

    let health_breaker = std::sync::Arc::clone(&pipeline.breaker);
    let health_registry = registry.clone();
    let health_shutdown = shutdown.clone();
    let health_task = tokio::spawn(async move {
        if let Err(err) = health::serve(health_port, health_breaker, health_registry, health_shutdown.cancelled_owned()).await {
            error!(error = %err, "health endpoint exited with an error");
        }
    });

    info!(targets = config.scrapers.len(), health_port, "pipeline running");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!(error = %err, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received");
                break;
            }
            received = batch_rx.recv() => {
                let Some(batch) = received else {
                    info!("batcher channel closed, shutting down");
                    break;
                };
                let Some(batch) = pipeline.memory_limiter.shed_if_over_hard_limit(batch) else {
                    continue;
                };
                if let Some(batch) = pipeline.process(batch) {
                    exporter.export(&batch);
                }
            }
        }
    }

    shutdown.cancel();
    scheduler.stop();
    batcher.join().await;
    let _ = tokio::join!(memory_refresh_task, health_task);
    exporter.shutdown();

    Ok(())
}
