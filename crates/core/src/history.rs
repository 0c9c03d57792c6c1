//! Historical input series handed to forecasters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::DataSourceKind;

/// One observation from a historical data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
    /// Free-form tag (component name, user segment, event label...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl HistoricalPoint {
    pub fn new(at: DateTime<Utc>, value: f64) -> Self {
        Self {
            at,
            value,
            label: None,
        }
    }

    pub fn labelled(at: DateTime<Utc>, value: f64, label: impl Into<String>) -> Self {
        Self {
            at,
            value,
            label: Some(label.into()),
        }
    }
}

/// A time-ordered slice of one source for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub source: DataSourceKind,
    pub target: String,
    pub points: Vec<HistoricalPoint>,
}

impl HistoricalSeries {
    pub fn new(source: DataSourceKind, target: impl Into<String>, points: Vec<HistoricalPoint>) -> Self {
        Self {
            source,
            target: target.into(),
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    pub fn last(&self) -> Option<&HistoricalPoint> {
        self.points.last()
    }

    /// Points observed at or after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> HistoricalSeries {
        HistoricalSeries {
            source: self.source,
            target: self.target.clone(),
            points: self
                .points
                .iter()
                .filter(|p| p.at >= since)
                .cloned()
                .collect(),
        }
    }
}
