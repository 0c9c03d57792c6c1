//! Cache → throttle → worker pool, with single-flight population and the
//! in-process fallback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use foresight_ai::{ForecastOutput, ForecastRequest, heuristic_forecast};
use foresight_core::PredictionType;

use crate::cache::{CacheKey, PredictionCache};
use crate::error::PipelineFailure;
use crate::throttle::{Priority, ThrottleError, ThrottleRequest, ThrottlingEngine};
use crate::worker::DispatchError;

/// Throttle priority for scheduled generation of each type.
pub fn priority_for(ptype: PredictionType) -> Priority {
    match ptype {
        PredictionType::Failure => Priority::High,
        PredictionType::Load => Priority::Medium,
        PredictionType::Behavior | PredictionType::Trend => Priority::Low,
    }
}

/// How one request was answered.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    CacheHit(ForecastOutput),
    Computed(ForecastOutput),
    /// Worker path unavailable; heuristic result, never cached.
    Fallback {
        output: ForecastOutput,
        failure: PipelineFailure,
    },
    /// No capacity; no result this time.
    Throttled(PipelineFailure),
}

type FlightLock = tokio::sync::Mutex<()>;

pub struct PredictionPipeline {
    cache: Arc<PredictionCache<ForecastOutput>>,
    throttle: Arc<ThrottlingEngine>,
    request_timeout: Duration,
    flights: Mutex<HashMap<CacheKey, Weak<FlightLock>>>,
}

impl PredictionPipeline {
    pub fn new(
        cache: Arc<PredictionCache<ForecastOutput>>,
        throttle: Arc<ThrottlingEngine>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            throttle,
            request_timeout,
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub async fn predict(&self, request: ForecastRequest, priority: Priority) -> PipelineOutcome {
        let key = match CacheKey::derive(request.ptype, &request.target, &request.history) {
            Ok(key) => key,
            Err(e) => {
                warn!(ptype = %request.ptype, target = %request.target, error = %e, "uncacheable request");
                return self.compute(request, priority, None).await;
            }
        };

        if let Some(hit) = self.cache.get(&key) {
            return PipelineOutcome::CacheHit(hit);
        }

        // identical requests wait here and re-check instead of dispatching again
        let flight = self.flight_lock(&key);
        let _flight = flight.lock().await;
        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %key, "filled by a concurrent request");
            return PipelineOutcome::CacheHit(hit);
        }
        self.compute(request, priority, Some(key)).await
    }

    /// Requests currently holding or waiting on a single-flight lock.
    pub fn flights_in_progress(&self) -> usize {
        self.flights
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    async fn compute(
        &self,
        request: ForecastRequest,
        priority: Priority,
        key: Option<CacheKey>,
    ) -> PipelineOutcome {
        let ptype = request.ptype;
        let admitted = ThrottleRequest::new(request.clone(), priority, self.request_timeout);
        match self.throttle.request_prediction(admitted).await {
            Ok(output) if output.payload.prediction_type() == ptype => {
                if let Some(key) = key {
                    self.cache.set(key, output.clone());
                }
                PipelineOutcome::Computed(output)
            }
            Ok(output) => {
                let failure = PipelineFailure::WorkerDispatchFailure(format!(
                    "worker returned a {} payload for a {ptype} request",
                    output.payload.prediction_type()
                ));
                self.fallback(&request, failure, false)
            }
            Err(e) if e.is_throttled() => {
                debug!(%ptype, target = %request.target, error = %e, "prediction throttled");
                PipelineOutcome::Throttled(PipelineFailure::from(&e))
            }
            Err(ThrottleError::Dispatch(DispatchError::CircuitOpen)) => {
                let failure = PipelineFailure::WorkerDispatchFailure("circuit open".into());
                self.fallback(&request, failure, true)
            }
            Err(e) => self.fallback(&request, PipelineFailure::from(&e), false),
        }
    }

    /// `short_circuit`: the breaker refused the dispatch, which is expected.
    fn fallback(
        &self,
        request: &ForecastRequest,
        failure: PipelineFailure,
        short_circuit: bool,
    ) -> PipelineOutcome {
        if short_circuit {
            debug!(ptype = %request.ptype, target = %request.target, "circuit open; using fallback forecast");
        } else {
            warn!(
                ptype = %request.ptype,
                target = %request.target,
                reason = %failure,
                "worker path unavailable; using fallback forecast"
            );
        }
        PipelineOutcome::Fallback {
            output: heuristic_forecast(request),
            failure,
        }
    }

    fn flight_lock(&self, key: &CacheKey) -> Arc<FlightLock> {
        let mut flights = self.flights.lock().unwrap();
        flights.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = flights.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(FlightLock::new(()));
        flights.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use foresight_ai::{FALLBACK_CONFIDENCE, ForecastError};
    use foresight_core::{
        DataSourceKind, HistoricalPoint, HistoricalSeries, ManualClock, PredictionPayload,
    };

    use crate::cache::CacheConfig;
    use crate::throttle::ThrottleConfig;
    use crate::worker::PredictionExecutor;

    struct Scripted {
        calls: AtomicUsize,
        delay: Duration,
        outcome: fn(&ForecastRequest) -> Result<ForecastOutput, DispatchError>,
    }

    #[async_trait]
    impl PredictionExecutor for Scripted {
        async fn execute(&self, request: ForecastRequest) -> Result<ForecastOutput, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.outcome)(&request)
        }
    }

    fn ok(request: &ForecastRequest) -> Result<ForecastOutput, DispatchError> {
        Ok(ForecastOutput::new(PredictionPayload::empty(request.ptype), 90.0))
    }

    fn pipeline(executor: Arc<Scripted>) -> PredictionPipeline {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = Arc::new(PredictionCache::new(CacheConfig::default(), clock));
        let throttle = Arc::new(ThrottlingEngine::new(ThrottleConfig::default(), executor));
        PredictionPipeline::new(cache, throttle, Duration::from_secs(5))
    }

    fn scripted(
        delay: Duration,
        outcome: fn(&ForecastRequest) -> Result<ForecastOutput, DispatchError>,
    ) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            delay,
            outcome,
        })
    }

    fn request() -> ForecastRequest {
        let now = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(365);
        let points = (0..5)
            .map(|i| HistoricalPoint::new(now - chrono::Duration::hours(5 - i), 40.0 + i as f64))
            .collect();
        ForecastRequest::new(
            PredictionType::Load,
            "api",
            HistoricalSeries::new(DataSourceKind::PerformanceMetrics, "api", points),
            now,
        )
    }

    #[tokio::test]
    async fn second_identical_request_hits_the_cache() {
        let executor = scripted(Duration::ZERO, ok);
        let p = pipeline(executor.clone());

        assert!(matches!(p.predict(request(), Priority::Medium).await, PipelineOutcome::Computed(_)));
        let mut again = request();
        // different reference instant, same history slice
        again.as_of += chrono::Duration::minutes(1);
        let outcome = p.predict(again, Priority::Medium).await;
        assert!(matches!(outcome, PipelineOutcome::CacheHit(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_dispatch_once() {
        let executor = scripted(Duration::from_millis(50), ok);
        let p = Arc::new(pipeline(executor.clone()));
        let r = request();

        let (a, b) = tokio::join!(
            p.predict(r.clone(), Priority::Medium),
            p.predict(r.clone(), Priority::Medium)
        );
        let hits = [&a, &b]
            .iter()
            .filter(|o| matches!(o, PipelineOutcome::CacheHit(_)))
            .count();
        assert_eq!(hits, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.flights_in_progress(), 0);
    }

    #[tokio::test]
    async fn worker_failure_falls_back_and_is_not_cached() {
        let executor = scripted(Duration::ZERO, |_| {
            Err(DispatchError::Forecast(ForecastError::InferenceFailed("boom".into())))
        });
        let p = pipeline(executor.clone());

        for _ in 0..2 {
            match p.predict(request(), Priority::Medium).await {
                PipelineOutcome::Fallback { output, failure } => {
                    assert!(output.confidence <= FALLBACK_CONFIDENCE);
                    assert!(matches!(failure, PipelineFailure::WorkerDispatchFailure(_)));
                }
                other => panic!("expected fallback, got {other:?}"),
            }
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn open_breaker_falls_back_quietly() {
        let executor = scripted(Duration::ZERO, |_| Err(DispatchError::CircuitOpen));
        let p = pipeline(executor);
        assert!(matches!(
            p.predict(request(), Priority::High).await,
            PipelineOutcome::Fallback { .. }
        ));
    }

    #[tokio::test]
    async fn mismatched_payload_is_treated_as_malformed() {
        let executor = scripted(Duration::ZERO, |_| {
            Ok(ForecastOutput::new(PredictionPayload::empty(PredictionType::Trend), 90.0))
        });
        let p = pipeline(executor);
        assert!(matches!(
            p.predict(request(), Priority::Medium).await,
            PipelineOutcome::Fallback {
                failure: PipelineFailure::WorkerDispatchFailure(_),
                ..
            }
        ));
    }

    #[test]
    fn failure_work_outranks_trend_work() {
        assert!(priority_for(PredictionType::Failure) > priority_for(PredictionType::Trend));
    }
}
