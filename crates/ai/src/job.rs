use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foresight_core::{HistoricalSeries, PredictionType};

use crate::result::{ForecastError, ForecastOutput};

/// Everything a forecaster needs for one prediction.
///
/// Serializable so it can cross the worker boundary by value and be hashed
/// into a cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    #[serde(rename = "type")]
    pub ptype: PredictionType,
    pub target: String,
    pub history: HistoricalSeries,
    /// Reference instant the horizon is measured from.
    pub as_of: DateTime<Utc>,
}

impl ForecastRequest {
    pub fn new(
        ptype: PredictionType,
        target: impl Into<String>,
        history: HistoricalSeries,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            ptype,
            target: target.into(),
            history,
            as_of,
        }
    }

    pub(crate) fn ensure_source(&self) -> Result<(), ForecastError> {
        if self.history.source != self.ptype.data_source() {
            return Err(ForecastError::InvalidInput(format!(
                "{} forecasts read {}, got {}",
                self.ptype,
                self.ptype.data_source(),
                self.history.source
            )));
        }
        Ok(())
    }
}

/// The forecasting black box.
///
/// Implementations are CPU-bound and synchronous; the pipeline runs them on
/// an isolated worker thread. Must not touch shared pipeline state.
pub trait Forecaster: Send + Sync + 'static {
    fn forecast(&self, request: &ForecastRequest) -> Result<ForecastOutput, ForecastError>;
}

impl<F> Forecaster for F
where
    F: Fn(&ForecastRequest) -> Result<ForecastOutput, ForecastError> + Send + Sync + 'static,
{
    fn forecast(&self, request: &ForecastRequest) -> Result<ForecastOutput, ForecastError> {
        self(request)
    }
}
