//! Default statistical forecasters, one per prediction type.

mod behavior;
mod failure;
mod load;
mod trend;

pub(crate) use behavior::split_label;
pub(crate) use trend::direction_of;

use foresight_core::PredictionType;

use crate::job::{ForecastRequest, Forecaster};
use crate::result::{ForecastError, ForecastOutput};

/// In-process forecaster routing each request to the method for its type.
#[derive(Debug, Clone)]
pub struct StatisticalForecaster {
    /// Rolling window for failure baselines (must be >= 2).
    window: usize,
    /// Z-score threshold for failure detection (e.g., 3.0).
    z_threshold: f64,
}

impl Default for StatisticalForecaster {
    fn default() -> Self {
        Self {
            window: 10,
            z_threshold: 3.0,
        }
    }
}

impl StatisticalForecaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_z_threshold(mut self, z_threshold: f64) -> Self {
        self.z_threshold = z_threshold;
        self
    }
}

impl Forecaster for StatisticalForecaster {
    fn forecast(&self, request: &ForecastRequest) -> Result<ForecastOutput, ForecastError> {
        request.ensure_source()?;
        match request.ptype {
            PredictionType::Failure => failure::forecast(request, self.window, self.z_threshold),
            PredictionType::Load => load::forecast(request),
            PredictionType::Behavior => behavior::forecast(request),
            PredictionType::Trend => trend::forecast(request),
        }
    }
}
