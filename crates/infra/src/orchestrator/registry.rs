//! Fixed model registry loaded at orchestrator start.

use chrono::{DateTime, Utc};

use foresight_core::{DomainResult, ModelId, PredictionModel, PredictionType};

/// Static description of one registered model.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub id: &'static str,
    pub ptype: PredictionType,
    pub target: &'static str,
}

pub const DEFAULT_MODELS: [ModelSpec; 4] = [
    ModelSpec {
        id: "failure-system",
        ptype: PredictionType::Failure,
        target: "system",
    },
    ModelSpec {
        id: "load-api",
        ptype: PredictionType::Load,
        target: "api",
    },
    ModelSpec {
        id: "behavior-users",
        ptype: PredictionType::Behavior,
        target: "users",
    },
    ModelSpec {
        id: "trend-business",
        ptype: PredictionType::Trend,
        target: "revenue",
    },
];

impl ModelSpec {
    pub fn build(&self, initial_confidence: f64, at: DateTime<Utc>) -> DomainResult<PredictionModel> {
        PredictionModel::new(
            ModelId::new(self.id)?,
            self.ptype,
            self.target,
            initial_confidence,
            at,
        )
    }
}

/// The default registry, every model starting at `initial_confidence`.
pub fn default_models(
    initial_confidence: f64,
    at: DateTime<Utc>,
) -> DomainResult<Vec<PredictionModel>> {
    DEFAULT_MODELS
        .iter()
        .map(|spec| spec.build(initial_confidence, at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_type_once() {
        let models = default_models(75.0, Utc::now()).unwrap();
        for ptype in PredictionType::ALL {
            assert_eq!(models.iter().filter(|m| m.ptype == ptype).count(), 1);
        }
        assert!(models.iter().all(|m| m.confidence == 75.0));
    }
}
