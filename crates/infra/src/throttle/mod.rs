//! Throttling / admission-control engine.
//!
//! Bounds how many forecasts run at once (`max_concurrent`) and how many may
//! wait (`max_queue`). Waiters are served strictly by priority, FIFO within a
//! priority. When the sampled load is above `cpu_threshold`, low and medium
//! priority arrivals are thinned out by credit accounting while high and
//! critical work keeps flowing.
//!
//! A rejection (`Throttled`, `Timeout`) is a capacity signal, never a worker
//! failure; worker failures surface as `Dispatch` and belong to the breaker.

mod load;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use foresight_ai::{ForecastOutput, ForecastRequest};

use crate::timers::{MIN_PERIOD, TimerRegistry};
use crate::worker::{DispatchError, PredictionExecutor};

pub use load::{LoadSampler, SysinfoLoadSampler};

const SAMPLER_TIMER: &str = "load-sampler";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fraction of arrivals admitted per priority while overloaded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmissionRatios {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for AdmissionRatios {
    fn default() -> Self {
        Self {
            low: 0.0,
            medium: 0.5,
            high: 1.0,
            critical: 1.0,
        }
    }
}

impl AdmissionRatios {
    fn for_priority(&self, priority: Priority) -> f64 {
        let ratio = match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        };
        ratio.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub max_queue: usize,
    pub max_concurrent: usize,
    /// Load percentage above which adaptive admission kicks in.
    pub cpu_threshold: f32,
    pub sample_interval: Duration,
    pub overload_admission: AdmissionRatios,
    pub default_timeout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_queue: 50,
            max_concurrent: 2,
            cpu_threshold: 80.0,
            sample_interval: Duration::from_secs(5),
            overload_admission: AdmissionRatios::default(),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl ThrottleConfig {
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_cpu_threshold(mut self, threshold: f32) -> Self {
        self.cpu_threshold = threshold;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(MIN_PERIOD);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout.max(MIN_PERIOD);
        self
    }
}

/// One forecast asking for admission.
#[derive(Debug, Clone)]
pub struct ThrottleRequest {
    pub request: ForecastRequest,
    pub priority: Priority,
    /// Covers queueing and execution together.
    pub timeout: Duration,
}

impl ThrottleRequest {
    pub fn new(request: ForecastRequest, priority: Priority, timeout: Duration) -> Self {
        Self {
            request,
            priority,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    QueueFull,
    /// Pushed out of a full queue by a higher-priority arrival.
    Evicted,
    Overloaded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::QueueFull => "queue full",
            RejectReason::Evicted => "evicted by higher priority work",
            RejectReason::Overloaded => "system overloaded",
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ThrottleError {
    #[error("throttled: {reason}")]
    Throttled { reason: RejectReason },
    #[error("not completed within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("throttling engine destroyed")]
    ShuttingDown,
}

impl ThrottleError {
    /// Capacity signal rather than a failure.
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            ThrottleError::Throttled { .. } | ThrottleError::Timeout(_)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThrottleStats {
    pub queued: usize,
    pub active: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub timed_out: u64,
    pub last_load: Option<f32>,
    pub overloaded: bool,
    pub destroyed: bool,
}

struct Waiter {
    seq: u64,
    go: oneshot::Sender<Result<(), ThrottleError>>,
}

#[derive(Default)]
struct QueueState {
    queues: [VecDeque<Waiter>; 4],
    active: usize,
    credits: [f64; 4],
    next_seq: u64,
}

impl QueueState {
    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn pop_next(&mut self) -> Option<Waiter> {
        self.queues.iter_mut().rev().find_map(VecDeque::pop_front)
    }

    fn lowest_queued(&self) -> Option<Priority> {
        Priority::ALL
            .into_iter()
            .find(|p| !self.queues[p.index()].is_empty())
    }
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    timed_out: AtomicU64,
}

struct Shared {
    config: ThrottleConfig,
    executor: Arc<dyn PredictionExecutor>,
    state: Mutex<QueueState>,
    counters: Counters,
    last_load: Mutex<Option<f32>>,
    overloaded: AtomicBool,
    destroyed: AtomicBool,
}

enum Admission {
    Slot,
    Queued(QueueTicket),
}

impl Shared {
    fn reject(&self, priority: Priority, reason: RejectReason) -> ThrottleError {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        debug!(%priority, %reason, "prediction request throttled");
        ThrottleError::Throttled { reason }
    }

    /// Credit gate applied while overloaded.
    fn admit_under_load(&self, priority: Priority) -> bool {
        if !self.overloaded.load(Ordering::Acquire) {
            return true;
        }
        let ratio = self.config.overload_admission.for_priority(priority);
        let mut state = self.state.lock().unwrap();
        let credit = &mut state.credits[priority.index()];
        *credit += ratio;
        if *credit >= 1.0 {
            *credit -= 1.0;
            true
        } else {
            false
        }
    }

    fn acquire(self: &Arc<Self>, priority: Priority) -> Result<Admission, ThrottleError> {
        let mut state = self.state.lock().unwrap();
        if state.active < self.config.max_concurrent {
            state.active += 1;
            return Ok(Admission::Slot);
        }

        if state.queued() >= self.config.max_queue {
            let lowest = state.lowest_queued();
            match lowest {
                Some(lowest) if lowest < priority => {
                    if let Some(evicted) = state.queues[lowest.index()].pop_back() {
                        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                        let _ = evicted.go.send(Err(ThrottleError::Throttled {
                            reason: RejectReason::Evicted,
                        }));
                        debug!(%priority, evicted = %lowest, "queued request evicted");
                    }
                }
                _ => {
                    drop(state);
                    return Err(self.reject(priority, RejectReason::QueueFull));
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let (go, rx) = oneshot::channel();
        state.queues[priority.index()].push_back(Waiter { seq, go });
        Ok(Admission::Queued(QueueTicket {
            shared: self.clone(),
            priority,
            seq,
            rx,
            granted: false,
        }))
    }

    /// Hand the slot to the next live waiter, or give it back.
    fn release_slot(&self) {
        let mut state = self.state.lock().unwrap();
        while let Some(waiter) = state.pop_next() {
            if waiter.go.send(Ok(())).is_ok() {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    fn remove_waiter(&self, priority: Priority, seq: u64) {
        let mut state = self.state.lock().unwrap();
        state.queues[priority.index()].retain(|w| w.seq != seq);
    }

    fn record_load(&self, load: f32) {
        *self.last_load.lock().unwrap() = Some(load);
        let over = load > self.config.cpu_threshold;
        let was = self.overloaded.swap(over, Ordering::AcqRel);
        if over && !was {
            warn!(load, threshold = self.config.cpu_threshold, "load above threshold; thinning low-priority admissions");
        } else if !over && was {
            self.state.lock().unwrap().credits = [0.0; 4];
            info!(load, "load back under threshold; admitting all priorities");
        }
    }
}

/// Occupied execution slot; dropping it passes the slot on.
struct SlotGuard {
    shared: Arc<Shared>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.shared.release_slot();
    }
}

/// A queued request. Dropping it without being granted withdraws the request
/// and returns a slot that was handed over in the meantime.
struct QueueTicket {
    shared: Arc<Shared>,
    priority: Priority,
    seq: u64,
    rx: oneshot::Receiver<Result<(), ThrottleError>>,
    granted: bool,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.shared.remove_waiter(self.priority, self.seq);
        self.rx.close();
        if let Ok(Ok(())) = self.rx.try_recv() {
            self.shared.release_slot();
        }
    }
}

/// Admission control in front of a `PredictionExecutor`.
pub struct ThrottlingEngine {
    shared: Arc<Shared>,
    timers: TimerRegistry,
}

impl fmt::Debug for ThrottlingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlingEngine")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ThrottlingEngine {
    pub fn new(config: ThrottleConfig, executor: Arc<dyn PredictionExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                executor,
                state: Mutex::new(QueueState::default()),
                counters: Counters::default(),
                last_load: Mutex::new(None),
                overloaded: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
            timers: TimerRegistry::new(),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    /// Admit, queue or reject `req`, then run it on the executor.
    pub async fn request_prediction(
        &self,
        req: ThrottleRequest,
    ) -> Result<ForecastOutput, ThrottleError> {
        let shared = &self.shared;
        if shared.destroyed.load(Ordering::Acquire) {
            return Err(ThrottleError::ShuttingDown);
        }
        let ThrottleRequest {
            request,
            priority,
            timeout,
        } = req;
        let deadline = Instant::now() + timeout;

        if !shared.admit_under_load(priority) {
            return Err(shared.reject(priority, RejectReason::Overloaded));
        }

        let _slot = match shared.acquire(priority)? {
            Admission::Slot => SlotGuard {
                shared: shared.clone(),
            },
            Admission::Queued(mut ticket) => {
                match tokio::time::timeout_at(deadline, &mut ticket.rx).await {
                    Ok(Ok(Ok(()))) => {
                        ticket.granted = true;
                        SlotGuard {
                            shared: shared.clone(),
                        }
                    }
                    Ok(Ok(Err(e))) => return Err(e),
                    Ok(Err(_)) => return Err(ThrottleError::ShuttingDown),
                    Err(_) => {
                        shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                        debug!(%priority, ?timeout, "timed out waiting in queue");
                        return Err(ThrottleError::Timeout(timeout));
                    }
                }
            }
        };
        shared.counters.admitted.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout_at(deadline, shared.executor.execute(request)).await {
            Ok(result) => result.map_err(ThrottleError::from),
            Err(_) => {
                shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                debug!(%priority, ?timeout, "timed out while executing");
                Err(ThrottleError::Timeout(timeout))
            }
        }
    }

    /// Feed one load reading (percent) into adaptive admission.
    pub fn record_load(&self, load: f32) {
        self.shared.record_load(load);
    }

    /// Sample `sampler` every `sample_interval` until destroyed.
    pub fn start_sampler(&self, mut sampler: Box<dyn LoadSampler>) {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return;
        }
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.sample_interval.max(MIN_PERIOD);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if let Some(load) = sampler.sample() {
                    shared.record_load(load);
                }
            }
        });
        self.timers.register(SAMPLER_TIMER, task);
    }

    pub fn is_overloaded(&self) -> bool {
        self.shared.overloaded.load(Ordering::Acquire)
    }

    /// Stop sampling and fail every queued request with `ShuttingDown`.
    /// Returns how many queued requests were cancelled. Idempotent.
    pub fn destroy(&self) -> usize {
        let first = !self.shared.destroyed.swap(true, Ordering::AcqRel);
        self.timers.cancel_all();
        let drained: Vec<Waiter> = {
            let mut state = self.shared.state.lock().unwrap();
            state.queues.iter_mut().flat_map(|q| q.drain(..)).collect()
        };
        let cancelled = drained.len();
        for waiter in drained {
            let _ = waiter.go.send(Err(ThrottleError::ShuttingDown));
        }
        if first {
            info!(cancelled, "throttling engine destroyed");
        }
        cancelled
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    pub fn stats(&self) -> ThrottleStats {
        let (queued, active) = {
            let state = self.shared.state.lock().unwrap();
            (state.queued(), state.active)
        };
        let c = &self.shared.counters;
        ThrottleStats {
            queued,
            active,
            admitted: c.admitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            last_load: *self.shared.last_load.lock().unwrap(),
            overloaded: self.is_overloaded(),
            destroyed: self.shared.destroyed.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use foresight_ai::ForecastError;
    use foresight_core::{DataSourceKind, HistoricalSeries, PredictionPayload, PredictionType};
    use tokio::sync::Notify;

    fn request(target: &str) -> ForecastRequest {
        ForecastRequest::new(
            PredictionType::Load,
            target,
            HistoricalSeries::new(DataSourceKind::PerformanceMetrics, target, Vec::new()),
            Utc::now(),
        )
    }

    fn req(target: &str, priority: Priority) -> ThrottleRequest {
        ThrottleRequest::new(request(target), priority, Duration::from_secs(5))
    }

    /// Executor that blocks until released, recording the order of targets.
    #[derive(Default)]
    struct Gate {
        release: Notify,
        order: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PredictionExecutor for Gate {
        async fn execute(&self, request: ForecastRequest) -> Result<ForecastOutput, DispatchError> {
            self.order.lock().unwrap().push(request.target.clone());
            self.release.notified().await;
            Ok(ForecastOutput::new(PredictionPayload::empty(request.ptype), 80.0))
        }
    }

    struct Failing;

    #[async_trait]
    impl PredictionExecutor for Failing {
        async fn execute(&self, _request: ForecastRequest) -> Result<ForecastOutput, DispatchError> {
            Err(DispatchError::Forecast(ForecastError::InferenceFailed("nope".into())))
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn immediate_admission_runs_the_executor() {
        let gate = Arc::new(Gate::default());
        let engine = Arc::new(ThrottlingEngine::new(ThrottleConfig::default(), gate.clone()));

        let run = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request_prediction(req("api", Priority::Low)).await })
        };
        settle().await;
        assert_eq!(engine.stats().active, 1);
        gate.release.notify_one();

        let output = run.await.unwrap().unwrap();
        assert_eq!(output.confidence, 80.0);
        let stats = engine.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.admitted, 1);
    }

    #[tokio::test]
    async fn queued_work_is_served_by_priority() {
        let gate = Arc::new(Gate::default());
        let config = ThrottleConfig::default().with_max_concurrent(1);
        let engine = Arc::new(ThrottlingEngine::new(config, gate.clone()));

        let mut runs = Vec::new();
        for (target, priority) in [
            ("first", Priority::Low),
            ("low", Priority::Low),
            ("medium", Priority::Medium),
            ("critical", Priority::Critical),
        ] {
            let engine = engine.clone();
            runs.push(tokio::spawn(async move {
                engine.request_prediction(req(target, priority)).await
            }));
            settle().await;
        }
        assert_eq!(engine.stats().queued, 3);

        for _ in 0..4 {
            settle().await;
            gate.release.notify_one();
        }
        for run in runs {
            run.await.unwrap().unwrap();
        }
        assert_eq!(
            *gate.order.lock().unwrap(),
            vec!["first", "critical", "medium", "low"]
        );
    }

    #[tokio::test]
    async fn full_queue_rejects_low_and_admits_critical() {
        let gate = Arc::new(Gate::default());
        let config = ThrottleConfig::default().with_max_concurrent(1);
        let engine = Arc::new(ThrottlingEngine::new(config, gate.clone()));

        let mut runs = Vec::new();
        for i in 0..51 {
            let engine = engine.clone();
            runs.push(tokio::spawn(async move {
                engine
                    .request_prediction(req(&format!("t{i}"), Priority::Low))
                    .await
            }));
        }
        settle().await;
        let stats = engine.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.queued, 50);

        let err = engine
            .request_prediction(req("late-low", Priority::Low))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ThrottleError::Throttled {
                reason: RejectReason::QueueFull
            }
        ));
        assert!(err.is_throttled());

        let critical = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .request_prediction(req("urgent", Priority::Critical))
                    .await
            })
        };
        settle().await;
        let stats = engine.stats();
        assert_eq!(stats.queued, 50);
        assert_eq!(stats.evicted, 1);

        // the most recently queued low request made room
        let evicted = runs.pop().unwrap().await.unwrap().unwrap_err();
        assert!(matches!(
            evicted,
            ThrottleError::Throttled {
                reason: RejectReason::Evicted
            }
        ));

        gate.release.notify_one();
        settle().await;
        assert_eq!(gate.order.lock().unwrap().last().map(String::as_str), Some("urgent"));

        engine.destroy();
        gate.release.notify_one();
        critical.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn overload_thins_low_and_medium_only() {
        let engine = ThrottlingEngine::new(ThrottleConfig::default(), Arc::new(Failing));
        engine.record_load(95.0);
        assert!(engine.is_overloaded());

        let outcomes = {
            let mut v = Vec::new();
            for priority in [Priority::Low, Priority::Medium, Priority::Medium, Priority::High, Priority::Critical] {
                v.push(engine.request_prediction(req("x", priority)).await);
            }
            v
        };
        assert!(matches!(
            outcomes[0],
            Err(ThrottleError::Throttled { reason: RejectReason::Overloaded })
        ));
        // medium: one of two admitted
        assert!(matches!(
            outcomes[1],
            Err(ThrottleError::Throttled { reason: RejectReason::Overloaded })
        ));
        assert!(matches!(outcomes[2], Err(ThrottleError::Dispatch(_))));
        assert!(matches!(outcomes[3], Err(ThrottleError::Dispatch(_))));
        assert!(matches!(outcomes[4], Err(ThrottleError::Dispatch(_))));
        assert!(!outcomes[3].as_ref().unwrap_err().is_throttled());

        engine.record_load(20.0);
        assert!(!engine.is_overloaded());
        assert!(matches!(
            engine.request_prediction(req("x", Priority::Low)).await,
            Err(ThrottleError::Dispatch(_))
        ));
        assert_eq!(engine.stats().last_load, Some(20.0));
    }

    #[tokio::test]
    async fn queue_timeout_is_a_throttle_signal_and_frees_its_place() {
        let gate = Arc::new(Gate::default());
        let config = ThrottleConfig::default().with_max_concurrent(1);
        let engine = Arc::new(ThrottlingEngine::new(config, gate.clone()));

        let busy = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request_prediction(req("busy", Priority::High)).await })
        };
        settle().await;

        let err = engine
            .request_prediction(ThrottleRequest::new(
                request("waiting"),
                Priority::High,
                Duration::from_millis(30),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ThrottleError::Timeout(_)));
        assert!(err.is_throttled());
        let stats = engine.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.timed_out, 1);

        gate.release.notify_one();
        busy.await.unwrap().unwrap();
        assert_eq!(engine.stats().active, 0);
    }

    #[tokio::test]
    async fn destroy_cancels_waiters_and_sampler() {
        let gate = Arc::new(Gate::default());
        let config = ThrottleConfig::default()
            .with_max_concurrent(1)
            .with_sample_interval(Duration::from_millis(10));
        let engine = Arc::new(ThrottlingEngine::new(config, gate.clone()));
        engine.start_sampler(Box::new(|| Some(90.0_f32)));

        let busy = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request_prediction(req("busy", Priority::Critical)).await })
        };
        settle().await;
        let waiting = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request_prediction(req("waiting", Priority::Critical)).await })
        };
        settle().await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(engine.is_overloaded());
        assert_eq!(engine.pending_timers(), 1);

        assert_eq!(engine.destroy(), 1);
        assert_eq!(engine.destroy(), 0);
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ThrottleError::ShuttingDown)
        ));
        settle().await;
        assert_eq!(engine.pending_timers(), 0);
        assert!(matches!(
            engine.request_prediction(req("late", Priority::Critical)).await,
            Err(ThrottleError::ShuttingDown)
        ));

        gate.release.notify_one();
        busy.await.unwrap().unwrap();
    }
}
