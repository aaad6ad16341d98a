//! Benchwatch daemon: polls bench metrics and discovers attached assets.
//!
//! Configuration comes from `~/.benchwatch/config.yaml` plus
//! `BENCHWATCH_*` environment variables. Runs until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use benchwatch::builtin::{LogSink, RuntimeMetricSource};
use benchwatch::{Config, DiscoveryCoordinator, DiscoveryService, MetricsContext};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    info!("Benchwatch v{}", env!("CARGO_PKG_VERSION"));

    // ── Metric core ─────────────────────────────────────────────────
    let metrics = MetricsContext::from_config(&config).context("Failed to build metric core")?;
    metrics
        .registry
        .register(Arc::new(RuntimeMetricSource::new(Arc::downgrade(&metrics.registry))));
    metrics.distributor.register_sink(Arc::new(LogSink));

    let seeded = metrics.refresh_now();
    info!(
        sources = metrics.registry.len(),
        configured = metrics.settings.items().len(),
        seeded,
        "Metric core ready"
    );

    // ── Asset discovery ─────────────────────────────────────────────
    let coordinator = Arc::new(DiscoveryCoordinator::new(config.discovery_timeout()));
    let discovery = Arc::new(
        DiscoveryService::new(coordinator, config.debounce_window(), config.debounce_max_delay())
            .context("Failed to start asset discovery")?,
    );
    discovery.attach_metrics(&metrics.registry);

    // ── Run ─────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let distributor = tokio::spawn(
        Arc::clone(&metrics.distributor).run(config.distribution_interval(), shutdown_rx.clone()),
    );
    let discovery_task =
        tokio::spawn(Arc::clone(&discovery).run(config.discovery_interval(), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    // Receivers only go away once the loops have exited.
    let _ = shutdown_tx.send(true);

    distributor.await.context("Distributor task failed")?;
    discovery_task.await.context("Discovery task failed")?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("benchwatch={}", config.log_level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
