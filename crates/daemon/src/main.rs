//! Background prediction daemon over a synthetic data feed.

mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;

use foresight_ai::StatisticalForecaster;
use foresight_core::SystemClock;
use foresight_infra::publish::InMemoryPublisher;
use foresight_infra::throttle::SysinfoLoadSampler;
use foresight_infra::worker::ForecasterPrototype;
use foresight_infra::{Collaborators, PipelineConfig, PredictionOrchestrator};
use foresight_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var("FORESIGHT_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    foresight_observability::init_with(format);

    let config = PipelineConfig::from_env();
    tracing::info!(config = %serde_json::to_string(&config)?, "configuration loaded");

    let feed_interval = std::env::var("FORESIGHT_FEED_INTERVAL_MS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(60));

    let clock = SystemClock::shared();
    let source = synthetic::seeded(Utc::now());
    let publisher = Arc::new(InMemoryPublisher::new(clock.clone()));

    let orchestrator = PredictionOrchestrator::builder(
        config,
        Collaborators {
            source: source.clone(),
            publisher: publisher.clone(),
            forecasters: Arc::new(ForecasterPrototype(StatisticalForecaster::new())),
        },
    )
    .with_clock(clock)
    .with_load_sampler(Box::new(SysinfoLoadSampler::new()))
    .build()
    .context("building prediction orchestrator")?;

    orchestrator
        .start()
        .await
        .context("starting prediction orchestrator")?;
    orchestrator.trigger_generation();

    let feed = tokio::spawn(synthetic::feed(source, feed_interval));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");
    feed.abort();

    let status = orchestrator.get_status();
    tracing::info!(
        status = %serde_json::to_string(&status)?,
        published = publisher.keys().len(),
        "final status"
    );

    let report = orchestrator.shutdown().await;
    tracing::info!(report = %serde_json::to_string(&report)?, "shutdown report");
    if !orchestrator.get_shutdown_status().is_clean() {
        anyhow::bail!("shutdown left work behind");
    }
    Ok(())
}
