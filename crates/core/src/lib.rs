//! `foresight-core`: data model of the prediction pipeline.
//!
//! Pure types only (no async, no I/O): identifiers, prediction models,
//! predictions with their typed payloads, historical input series, and the
//! clock every time-based rule is measured against.

pub mod clock;
pub mod entity;
pub mod error;
pub mod history;
pub mod id;
pub mod kind;
pub mod model;
pub mod prediction;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use history::{HistoricalPoint, HistoricalSeries};
pub use id::{CycleId, ModelId, PredictionId};
pub use kind::{DataSourceKind, PredictionType};
pub use model::PredictionModel;
pub use prediction::{
    BehaviorPrediction, FailurePrediction, LoadPrediction, Prediction, PredictionPayload, Severity,
    TrendDirection, TrendPrediction,
};
