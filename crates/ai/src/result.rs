use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use foresight_core::PredictionPayload;

/// Output of one forecast.
///
/// Not yet a `Prediction`: the orchestrator attaches the model id, clamps
/// confidence to the model's own and records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutput {
    pub payload: PredictionPayload,

    /// Confidence in \[0, 100\].
    pub confidence: f64,

    /// Optional human-readable explanation.
    pub explanation: Option<String>,

    /// Free-form metadata (method, window sizes, fallback marker...).
    pub metadata: JsonValue,
}

impl ForecastOutput {
    pub fn new(payload: PredictionPayload, confidence: f64) -> Self {
        Self {
            payload,
            confidence: confidence.clamp(0.0, 100.0),
            explanation: None,
            metadata: JsonValue::Null,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("invalid forecast input: {0}")]
    InvalidInput(String),

    #[error("insufficient history: need {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("inference failed: {0}")]
    InferenceFailed(String),
}
