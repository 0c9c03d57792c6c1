//! Historical data collaborator: where forecasts get their input.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use foresight_core::{DataSourceKind, HistoricalPoint, HistoricalSeries};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("no {kind} data for `{target}`")]
    UnknownTarget {
        kind: DataSourceKind,
        target: String,
    },
}

/// Read side of the historical store, keyed by source kind and target.
#[async_trait::async_trait]
pub trait HistoricalDataSource: Send + Sync + 'static {
    /// Points for `target`, oldest first, optionally only those at or after `since`.
    async fn fetch(
        &self,
        source: DataSourceKind,
        target: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<HistoricalSeries, SourceError>;

    /// Changes whenever data behind `source` is refreshed.
    async fn revision(&self, source: DataSourceKind) -> Result<u64, SourceError>;
}

/// In-memory source for tests/dev and the daemon's synthetic feed.
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    series: RwLock<HashMap<(DataSourceKind, String), Vec<HistoricalPoint>>>,
    revisions: RwLock<HashMap<DataSourceKind, u64>>,
    outage: RwLock<Option<String>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known for `(source, target)`.
    pub fn replace(&self, source: DataSourceKind, target: &str, mut points: Vec<HistoricalPoint>) {
        points.sort_by_key(|p| p.at);
        self.series
            .write()
            .unwrap()
            .insert((source, target.to_string()), points);
        self.bump(source);
    }

    pub fn append(&self, source: DataSourceKind, target: &str, point: HistoricalPoint) {
        {
            let mut series = self.series.write().unwrap();
            let points = series.entry((source, target.to_string())).or_default();
            let at = points.partition_point(|p| p.at <= point.at);
            points.insert(at, point);
        }
        self.bump(source);
    }

    /// Make every call fail with `Unavailable(reason)` until cleared with `None`.
    pub fn set_outage(&self, reason: Option<&str>) {
        *self.outage.write().unwrap() = reason.map(str::to_string);
    }

    pub fn targets(&self, source: DataSourceKind) -> Vec<String> {
        let mut targets: Vec<String> = self
            .series
            .read()
            .unwrap()
            .keys()
            .filter(|(kind, _)| *kind == source)
            .map(|(_, target)| target.clone())
            .collect();
        targets.sort();
        targets
    }

    fn bump(&self, source: DataSourceKind) {
        *self.revisions.write().unwrap().entry(source).or_insert(0) += 1;
    }

    fn check_outage(&self) -> Result<(), SourceError> {
        match self.outage.read().unwrap().as_ref() {
            Some(reason) => Err(SourceError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl HistoricalDataSource for InMemoryDataSource {
    async fn fetch(
        &self,
        source: DataSourceKind,
        target: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<HistoricalSeries, SourceError> {
        self.check_outage()?;
        let series = self.series.read().unwrap();
        let points = series
            .get(&(source, target.to_string()))
            .ok_or_else(|| SourceError::UnknownTarget {
                kind: source,
                target: target.to_string(),
            })?;
        let from = since.map_or(0, |since| points.partition_point(|p| p.at < since));
        Ok(HistoricalSeries::new(source, target, points[from..].to_vec()))
    }

    async fn revision(&self, source: DataSourceKind) -> Result<u64, SourceError> {
        self.check_outage()?;
        Ok(self.revisions.read().unwrap().get(&source).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap() + Duration::hours(hour)
    }

    #[tokio::test]
    async fn fetch_filters_by_since_and_keeps_order() {
        let source = InMemoryDataSource::new();
        source.replace(
            DataSourceKind::PerformanceMetrics,
            "api",
            vec![
                HistoricalPoint::new(at(2), 20.0),
                HistoricalPoint::new(at(0), 0.0),
                HistoricalPoint::new(at(1), 10.0),
            ],
        );
        source.append(DataSourceKind::PerformanceMetrics, "api", HistoricalPoint::new(at(3), 30.0));

        let all = source
            .fetch(DataSourceKind::PerformanceMetrics, "api", None)
            .await
            .unwrap();
        assert_eq!(all.values().collect::<Vec<_>>(), vec![0.0, 10.0, 20.0, 30.0]);

        let recent = source
            .fetch(DataSourceKind::PerformanceMetrics, "api", Some(at(2)))
            .await
            .unwrap();
        assert_eq!(recent.values().collect::<Vec<_>>(), vec![20.0, 30.0]);
    }

    #[tokio::test]
    async fn revisions_move_per_source() {
        let source = InMemoryDataSource::new();
        assert_eq!(source.revision(DataSourceKind::SystemLogs).await.unwrap(), 0);
        source.replace(DataSourceKind::SystemLogs, "db", Vec::new());
        source.append(DataSourceKind::SystemLogs, "db", HistoricalPoint::new(at(0), 1.0));
        assert_eq!(source.revision(DataSourceKind::SystemLogs).await.unwrap(), 2);
        assert_eq!(source.revision(DataSourceKind::UserBehavior).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn outage_and_unknown_target_are_errors() {
        let source = InMemoryDataSource::new();
        assert!(matches!(
            source.fetch(DataSourceKind::UserBehavior, "users", None).await,
            Err(SourceError::UnknownTarget { .. })
        ));
        source.set_outage(Some("db down"));
        assert_eq!(
            source.revision(DataSourceKind::UserBehavior).await,
            Err(SourceError::Unavailable("db down".into()))
        );
        source.set_outage(None);
        assert!(source.revision(DataSourceKind::UserBehavior).await.is_ok());
    }
}
