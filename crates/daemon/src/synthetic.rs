//! Synthetic historical feed for running the daemon without real stores.
//!
//! Seeds a week of hourly data for every default model and keeps appending
//! one point per series on an interval, so revisions move and retraining has
//! something to notice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;

use foresight_core::{DataSourceKind, HistoricalPoint};
use foresight_infra::source::InMemoryDataSource;

const SEED_HOURS: i64 = 7 * 24;
const ACTIONS: [&str; 4] = ["browse", "search", "add_to_cart", "checkout"];

fn wave(step: i64, period: f64, amplitude: f64) -> f64 {
    amplitude * (step as f64 * std::f64::consts::TAU / period).sin()
}

fn points_at(step: i64, at: DateTime<Utc>) -> [(DataSourceKind, &'static str, HistoricalPoint); 4] {
    let errors = if step % 37 == 0 { 9.0 } else { (step % 3) as f64 };
    let action = ACTIONS[(step as usize) % ACTIONS.len()];
    [
        (
            DataSourceKind::SystemLogs,
            "system",
            HistoricalPoint::labelled(at, errors, if step % 2 == 0 { "db" } else { "queue" }),
        ),
        (
            DataSourceKind::PerformanceMetrics,
            "api",
            HistoricalPoint::new(at, 120.0 + wave(step, 24.0, 40.0) + 0.05 * step as f64),
        ),
        (
            DataSourceKind::UserBehavior,
            "users",
            HistoricalPoint::labelled(at, 1.0 + (step % 5) as f64, format!("visitors:{action}")),
        ),
        (
            DataSourceKind::BusinessMetrics,
            "revenue",
            HistoricalPoint::new(at, 10_000.0 + 15.0 * step as f64 + wave(step, 168.0, 500.0)),
        ),
    ]
}

pub fn seeded(now: DateTime<Utc>) -> Arc<InMemoryDataSource> {
    let source = Arc::new(InMemoryDataSource::new());
    for step in 0..SEED_HOURS {
        let at = now - ChronoDuration::hours(SEED_HOURS - step);
        for (kind, target, point) in points_at(step, at) {
            source.append(kind, target, point);
        }
    }
    source
}

/// Append one point per series every `interval` until the task is aborted.
pub async fn feed(source: Arc<InMemoryDataSource>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut step = SEED_HOURS;
    loop {
        ticker.tick().await;
        for (kind, target, point) in points_at(step, Utc::now()) {
            source.append(kind, target, point);
        }
        debug!(step, "synthetic feed advanced");
        step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foresight_infra::source::HistoricalDataSource;

    #[tokio::test]
    async fn seeds_every_default_series() {
        let source = seeded(Utc::now());
        for (kind, target) in [
            (DataSourceKind::SystemLogs, "system"),
            (DataSourceKind::PerformanceMetrics, "api"),
            (DataSourceKind::UserBehavior, "users"),
            (DataSourceKind::BusinessMetrics, "revenue"),
        ] {
            let series = source.fetch(kind, target, None).await.unwrap();
            assert_eq!(series.len(), SEED_HOURS as usize);
        }
    }
}
