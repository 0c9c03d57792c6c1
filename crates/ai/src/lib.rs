//! `foresight-ai`
//!
//! **Responsibility:** the forecasting black box behind the prediction pipeline.
//!
//! This crate is intentionally pure and synchronous:
//! - It knows nothing about caching, throttling, workers or schedules.
//! - Forecasters are CPU-bound functions of a [`ForecastRequest`].
//! - It also owns the cheap fallback heuristic and accuracy scoring, so the
//!   orchestrator never reimplements forecasting math.

pub mod accuracy;
pub mod fallback;
pub mod forecasters;
pub mod job;
pub mod result;
pub mod stats;

pub use fallback::{FALLBACK_CONFIDENCE, heuristic_forecast};
pub use forecasters::StatisticalForecaster;
pub use job::{ForecastRequest, Forecaster};
pub use result::{ForecastError, ForecastOutput};
