//! Reports and status snapshots handed to collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use foresight_core::{CycleId, ModelId, PredictionId, PredictionModel, PredictionType};

use crate::cache::CacheStats;
use crate::error::PipelineFailure;
use crate::throttle::ThrottleStats;
use crate::worker::WorkerPoolStatus;

/// What one generation cycle did for one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ModelOutcome {
    CacheHit { prediction_id: PredictionId },
    Computed { prediction_id: PredictionId },
    Fallback {
        prediction_id: PredictionId,
        failure: PipelineFailure,
    },
    Throttled { failure: PipelineFailure },
    /// Below the minimum confidence: no lookup, no dispatch, no fallback.
    Skipped { confidence: f64 },
    /// Historical data could not be read; nothing recorded.
    NoData { reason: String },
}

impl ModelOutcome {
    pub fn prediction_id(&self) -> Option<PredictionId> {
        match self {
            ModelOutcome::CacheHit { prediction_id }
            | ModelOutcome::Computed { prediction_id }
            | ModelOutcome::Fallback { prediction_id, .. } => Some(*prediction_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<ModelId, ModelOutcome>,
    /// Deadline elapsed before every model resolved.
    pub abandoned: bool,
    pub failure: Option<PipelineFailure>,
}

impl GenerationReport {
    pub fn recorded(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| o.prediction_id().is_some())
            .count()
    }

    pub fn outcome(&self, model: &str) -> Option<&ModelOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id.as_str() == model)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Unvalidated predictions older than the validation window.
    pub due: usize,
    pub validated: usize,
    /// Not enough observed data to score yet; retried next pass.
    pub inconclusive: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrainingReport {
    pub changed_types: Vec<PredictionType>,
    pub invalidated_entries: usize,
    pub retrained: Vec<ModelId>,
    /// Models left untouched this pass, with why.
    pub failures: BTreeMap<ModelId, PipelineFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub id: ModelId,
    #[serde(rename = "type")]
    pub ptype: PredictionType,
    pub target: String,
    pub accuracy: f64,
    pub confidence: f64,
    pub last_trained: DateTime<Utc>,
    pub eligible: bool,
}

impl ModelSummary {
    pub(crate) fn of(model: &PredictionModel, min_confidence: f64) -> Self {
        Self {
            id: model.id.clone(),
            ptype: model.ptype,
            target: model.target.clone(),
            accuracy: model.accuracy,
            confidence: model.confidence,
            last_trained: model.last_trained,
            eligible: model.is_eligible(min_confidence),
        }
    }
}

/// Orchestrator counters since start.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub abandoned_cycles: u64,
    pub computed: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
    pub throttled: u64,
    pub skipped: u64,
    pub validated: u64,
    pub retraining_passes: u64,
    pub retraining_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Running, worker healthy and breaker closed.
    pub healthy: bool,
    pub running: bool,
    pub worker: WorkerPoolStatus,
    pub cache: CacheStats,
    pub throttle: ThrottleStats,
    pub models: Vec<ModelSummary>,
    pub metrics: MetricsSnapshot,
    pub history_len: usize,
    pub last_prediction_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeStats {
    pub count: usize,
    pub validated: usize,
    pub average_accuracy: Option<f64>,
    pub average_confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionStats {
    pub total: usize,
    pub validated: usize,
    pub average_accuracy: Option<f64>,
    pub by_type: BTreeMap<PredictionType, TypeStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownStep {
    pub name: &'static str,
    pub completed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub steps: Vec<ShutdownStep>,
    /// Set on reports returned by repeated `shutdown` calls.
    pub repeated: bool,
}

impl ShutdownReport {
    pub fn all_completed(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownStatus {
    pub shut_down: bool,
    /// Live scheduled tasks across orchestrator, worker pool and throttle.
    pub pending_timers: usize,
    pub worker_ready: bool,
    pub throttle_destroyed: bool,
    pub cache_destroyed: bool,
    pub cache_entries: usize,
    pub report: Option<ShutdownReport>,
}

impl ShutdownStatus {
    pub fn is_clean(&self) -> bool {
        self.shut_down
            && self.pending_timers == 0
            && !self.worker_ready
            && self.throttle_destroyed
            && self.cache_destroyed
            && self.cache_entries == 0
    }
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
