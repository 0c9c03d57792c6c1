//! Pipeline failure taxonomy carried by cycle reports and logs.
//!
//! None of these ever escape a scheduled tick; they are recorded and the
//! caller gets a (possibly lower-confidence or empty) result instead.

use serde::Serialize;

use crate::throttle::ThrottleError;
use crate::worker::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PipelineFailure {
    /// Capacity signal from the throttling engine; expected.
    #[error("throttled: {0}")]
    ThrottledRejection(String),
    #[error("worker dispatch failed: {0}")]
    WorkerDispatchFailure(String),
    #[error("worker unresponsive: {0}")]
    WorkerUnresponsive(String),
    #[error("generation cycle exceeded its deadline of {deadline_ms}ms")]
    GenerationTimeout { deadline_ms: u64 },
    #[error("retraining failed: {0}")]
    RetrainingFailure(String),
}

impl PipelineFailure {
    /// Expected outcomes are logged at debug, everything else at warn or above.
    pub fn is_expected(&self) -> bool {
        matches!(self, PipelineFailure::ThrottledRejection(_))
    }
}

impl From<&DispatchError> for PipelineFailure {
    fn from(e: &DispatchError) -> Self {
        match e {
            DispatchError::Unresponsive(_) => PipelineFailure::WorkerUnresponsive(e.to_string()),
            other => PipelineFailure::WorkerDispatchFailure(other.to_string()),
        }
    }
}

impl From<&ThrottleError> for PipelineFailure {
    fn from(e: &ThrottleError) -> Self {
        match e {
            ThrottleError::Dispatch(inner) => PipelineFailure::from(inner),
            other if other.is_throttled() => PipelineFailure::ThrottledRejection(other.to_string()),
            other => PipelineFailure::WorkerDispatchFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::RejectReason;
    use std::time::Duration;

    #[test]
    fn throttle_signals_map_to_expected_rejections() {
        let throttled = ThrottleError::Throttled {
            reason: RejectReason::QueueFull,
        };
        assert!(PipelineFailure::from(&throttled).is_expected());
        assert!(PipelineFailure::from(&ThrottleError::Timeout(Duration::from_secs(1))).is_expected());
    }

    #[test]
    fn worker_errors_keep_their_category() {
        let crashed = ThrottleError::Dispatch(DispatchError::WorkerCrashed);
        assert!(matches!(
            PipelineFailure::from(&crashed),
            PipelineFailure::WorkerDispatchFailure(_)
        ));
        let silent = DispatchError::Unresponsive(Duration::from_secs(9));
        assert!(matches!(
            PipelineFailure::from(&silent),
            PipelineFailure::WorkerUnresponsive(_)
        ));
    }

    #[test]
    fn serialises_with_kind_tag() {
        let json = serde_json::to_value(PipelineFailure::GenerationTimeout { deadline_ms: 30_000 }).unwrap();
        assert_eq!(json["kind"], "generation_timeout");
        assert_eq!(json["detail"]["deadline_ms"], 30_000);
    }
}
