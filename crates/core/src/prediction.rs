//! Generated predictions and their typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::{ModelId, PredictionId};
use crate::kind::PredictionType;
use crate::model::check_percent;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Expected failure of a component within the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePrediction {
    pub component: String,
    /// 0–1.
    pub probability: f64,
    pub expected_at: DateTime<Utc>,
    pub severity: Severity,
    pub indicators: Vec<String>,
}

/// Expected load at one future instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadPrediction {
    pub at: DateTime<Utc>,
    pub expected: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Expected action of a user segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorPrediction {
    pub segment: String,
    pub action: String,
    /// 0–1.
    pub likelihood: f64,
}

/// Direction and projection of a business metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPrediction {
    pub metric: String,
    pub direction: TrendDirection,
    /// Change per hour.
    pub slope: f64,
    pub projected: f64,
}

/// Result of a forecast, one variant per prediction type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum PredictionPayload {
    Failure(Vec<FailurePrediction>),
    Load(Vec<LoadPrediction>),
    Behavior(Vec<BehaviorPrediction>),
    Trend(Vec<TrendPrediction>),
}

impl PredictionPayload {
    pub fn prediction_type(&self) -> PredictionType {
        match self {
            PredictionPayload::Failure(_) => PredictionType::Failure,
            PredictionPayload::Load(_) => PredictionType::Load,
            PredictionPayload::Behavior(_) => PredictionType::Behavior,
            PredictionPayload::Trend(_) => PredictionType::Trend,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PredictionPayload::Failure(v) => v.len(),
            PredictionPayload::Load(v) => v.len(),
            PredictionPayload::Behavior(v) => v.len(),
            PredictionPayload::Trend(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn empty(ptype: PredictionType) -> Self {
        match ptype {
            PredictionType::Failure => PredictionPayload::Failure(Vec::new()),
            PredictionType::Load => PredictionPayload::Load(Vec::new()),
            PredictionType::Behavior => PredictionPayload::Behavior(Vec::new()),
            PredictionType::Trend => PredictionPayload::Trend(Vec::new()),
        }
    }
}

/// One generated prediction, appended to the orchestrator history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub model_id: ModelId,
    pub target: String,
    pub payload: PredictionPayload,
    /// 0–100.
    pub confidence: f64,
    pub time_horizon_hours: u32,
    pub created_at: DateTime<Utc>,
    /// Filled exactly once by validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Prediction {
    pub fn new(
        model_id: ModelId,
        target: impl Into<String>,
        payload: PredictionPayload,
        confidence: f64,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        check_percent("confidence", confidence)?;
        let horizon = payload.prediction_type().time_horizon_hours();
        Ok(Self {
            id: PredictionId::new(),
            model_id,
            target: target.into(),
            payload,
            confidence,
            time_horizon_hours: horizon,
            created_at,
            accuracy: None,
        })
    }

    pub fn prediction_type(&self) -> PredictionType {
        self.payload.prediction_type()
    }

    pub fn is_validated(&self) -> bool {
        self.accuracy.is_some()
    }

    /// Stamp the validated accuracy. A second stamp is an invariant violation.
    pub fn record_accuracy(&mut self, accuracy: f64) -> DomainResult<()> {
        check_percent("accuracy", accuracy)?;
        if self.accuracy.is_some() {
            return Err(DomainError::invariant(format!(
                "prediction {} already validated",
                self.id
            )));
        }
        self.accuracy = Some(accuracy);
        Ok(())
    }
}

impl Entity for Prediction {
    type Id = PredictionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_prediction() -> Prediction {
        let now = Utc::now();
        Prediction::new(
            ModelId::new("load-api").unwrap(),
            "api",
            PredictionPayload::Load(vec![LoadPrediction {
                at: now,
                expected: 10.0,
                lower: 8.0,
                upper: 12.0,
            }]),
            80.0,
            now,
        )
        .unwrap()
    }

    #[test]
    fn horizon_follows_payload_type() {
        let p = load_prediction();
        assert_eq!(p.prediction_type(), PredictionType::Load);
        assert_eq!(p.time_horizon_hours, PredictionType::Load.time_horizon_hours());
    }

    #[test]
    fn accuracy_is_stamped_exactly_once() {
        let mut p = load_prediction();
        p.record_accuracy(91.0).unwrap();
        let err = p.record_accuracy(50.0).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(p.accuracy, Some(91.0));
    }

    #[test]
    fn payload_serializes_as_tagged_union() {
        let payload = PredictionPayload::empty(PredictionType::Trend);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "trend");
        assert!(json["items"].as_array().unwrap().is_empty());
    }
}
