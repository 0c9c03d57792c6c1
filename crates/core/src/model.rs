//! Prediction models: the registry entries the orchestrator iterates.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::ModelId;
use crate::kind::PredictionType;

/// A registered forecasting model for one subject.
///
/// `accuracy` is the simple moving average of the last validated outcomes;
/// `confidence` follows it, capped by the orchestrator's maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionModel {
    pub id: ModelId,
    #[serde(rename = "type")]
    pub ptype: PredictionType,
    /// Subject identifier (component, endpoint, segment, metric).
    pub target: String,
    /// 0–100.
    pub accuracy: f64,
    /// 0–100.
    pub confidence: f64,
    pub last_trained: DateTime<Utc>,
    /// Most recent validated accuracies, oldest first.
    #[serde(default)]
    pub recent_outcomes: VecDeque<f64>,
}

impl PredictionModel {
    pub fn new(
        id: ModelId,
        ptype: PredictionType,
        target: impl Into<String>,
        initial_confidence: f64,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        check_percent("confidence", initial_confidence)?;
        Ok(Self {
            id,
            ptype,
            target: target.into(),
            accuracy: initial_confidence,
            confidence: initial_confidence,
            last_trained: created_at,
            recent_outcomes: VecDeque::new(),
        })
    }

    /// Whether generation may run for this model.
    pub fn is_eligible(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence
    }

    /// Fold one validated accuracy into the running average.
    ///
    /// Keeps at most `window` outcomes; confidence never exceeds `max_confidence`.
    pub fn record_outcome(
        &mut self,
        accuracy: f64,
        window: usize,
        max_confidence: f64,
    ) -> DomainResult<()> {
        check_percent("accuracy", accuracy)?;
        self.recent_outcomes.push_back(accuracy);
        while self.recent_outcomes.len() > window.max(1) {
            self.recent_outcomes.pop_front();
        }
        self.refresh_from_outcomes(max_confidence);
        Ok(())
    }

    /// Recompute accuracy/confidence from the validation history and stamp
    /// `last_trained`. Without any validated outcome the scores are left alone.
    pub fn retrain(&mut self, max_confidence: f64, at: DateTime<Utc>) -> bool {
        let changed = self.refresh_from_outcomes(max_confidence);
        self.last_trained = at;
        changed
    }

    fn refresh_from_outcomes(&mut self, max_confidence: f64) -> bool {
        if self.recent_outcomes.is_empty() {
            return false;
        }
        let sum: f64 = self.recent_outcomes.iter().sum();
        let avg = sum / self.recent_outcomes.len() as f64;
        self.accuracy = avg;
        self.confidence = avg.min(max_confidence);
        true
    }
}

impl Entity for PredictionModel {
    type Id = ModelId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub(crate) fn check_percent(what: &str, value: f64) -> DomainResult<()> {
    if !(value.is_finite() && (0.0..=100.0).contains(&value)) {
        return Err(DomainError::validation(format!(
            "{what} must be within 0..=100, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model(confidence: f64) -> PredictionModel {
        PredictionModel::new(
            ModelId::new("load-api").unwrap(),
            PredictionType::Load,
            "api",
            confidence,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = PredictionModel::new(
            ModelId::new("x").unwrap(),
            PredictionType::Trend,
            "revenue",
            120.0,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn eligibility_is_inclusive_of_threshold() {
        assert!(model(60.0).is_eligible(60.0));
        assert!(!model(59.9).is_eligible(60.0));
    }

    #[test]
    fn outcomes_form_a_capped_moving_average() {
        let mut m = model(70.0);
        m.record_outcome(100.0, 3, 95.0).unwrap();
        m.record_outcome(100.0, 3, 95.0).unwrap();
        assert_eq!(m.accuracy, 100.0);
        assert_eq!(m.confidence, 95.0);

        m.record_outcome(40.0, 3, 95.0).unwrap();
        m.record_outcome(40.0, 3, 95.0).unwrap();
        // window keeps [100, 40, 40]
        assert_eq!(m.recent_outcomes.len(), 3);
        assert_eq!(m.accuracy, 60.0);
        assert_eq!(m.confidence, 60.0);
    }

    proptest! {
        #[test]
        fn confidence_stays_within_bounds(
            outcomes in proptest::collection::vec(0.0f64..=100.0, 1..40),
            window in 1usize..10,
            max in 50.0f64..=100.0,
        ) {
            let mut m = model(75.0);
            for accuracy in outcomes {
                m.record_outcome(accuracy, window, max).unwrap();
                prop_assert!(m.confidence <= max);
                prop_assert!((0.0..=100.0).contains(&m.accuracy));
                prop_assert!(m.recent_outcomes.len() <= window);
            }
        }
    }

    #[test]
    fn retrain_without_history_keeps_scores() {
        let mut m = model(72.0);
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(!m.retrain(95.0, later));
        assert_eq!(m.confidence, 72.0);
        assert_eq!(m.last_trained, later);
    }
}
