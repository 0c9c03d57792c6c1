//! Worker pool lifecycle, dispatch and health checks.
//!
//! The pool owns at most one `WorkerUnit` at a time. Every unit gets a fresh
//! generation number; the reply router and health loop of a unit carry that
//! number so stale tasks from a previous unit never touch the current one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use foresight_ai::{ForecastError, ForecastOutput, ForecastRequest};
use foresight_core::SharedClock;

use super::breaker::{BreakerConfig, BreakerTransition, CircuitBreaker, CircuitBreakerState};
use super::health::{HealthState, is_unresponsive};
use super::unit::{ForecasterFactory, WorkerMessage, WorkerReply, WorkerUnit};
use super::{DispatchError, PredictionExecutor};
use crate::timers::{MIN_PERIOD, TimerRegistry};

const HEALTH_TIMER: &str = "health-check";
const RESTART_TIMER: &str = "restart";

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    /// How long a fresh unit has to report online.
    pub online_timeout: Duration,
    /// Pause between stopping a unit and starting its replacement.
    pub restart_cooldown: Duration,
    pub dispatch_timeout: Duration,
    /// How long to wait for a stopped unit's thread before detaching it.
    pub terminate_timeout: Duration,
    pub breaker: BreakerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(3),
            online_timeout: Duration::from_secs(10),
            restart_cooldown: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(15),
            terminate_timeout: Duration::from_secs(2),
            breaker: BreakerConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_health_intervals(mut self, ping_interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = ping_interval.max(MIN_PERIOD);
        self.pong_timeout = pong_timeout.max(MIN_PERIOD);
        self
    }

    pub fn with_restart_cooldown(mut self, cooldown: Duration) -> Self {
        self.restart_cooldown = cooldown;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout.max(MIN_PERIOD);
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// Pool introspection, as reported in orchestrator status.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStatus {
    pub ready: bool,
    pub healthy: bool,
    pub generation: u64,
    pub restarts: u64,
    pub restarting: bool,
    pub terminated: bool,
    pub in_flight: usize,
    pub breaker: CircuitBreakerState,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<ForecastOutput, ForecastError>>>>>;

struct LiveUnit {
    unit: WorkerUnit,
    pending: Pending,
    router: JoinHandle<()>,
}

struct PoolInner {
    config: WorkerPoolConfig,
    factory: Arc<dyn ForecasterFactory>,
    breaker: CircuitBreaker,
    health: HealthState,
    live: Mutex<Option<LiveUnit>>,
    // serialises unit start/stop between initialize, restart and terminate
    lifecycle: tokio::sync::Mutex<()>,
    timers: TimerRegistry,
    generation: AtomicU64,
    next_request: AtomicU64,
    restarts: AtomicU64,
    restarting: AtomicBool,
    terminated: AtomicBool,
}

/// Cloneable handle to the worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("generation", &self.generation())
            .field("ready", &self.inner.health.is_ready())
            .field("breaker", &self.inner.breaker.snapshot())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        clock: SharedClock,
        factory: Arc<dyn ForecasterFactory>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone(), clock);
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                breaker,
                health: HealthState::new(),
                live: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                timers: TimerRegistry::new(),
                generation: AtomicU64::new(0),
                next_request: AtomicU64::new(1),
                restarts: AtomicU64::new(0),
                restarting: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Start a unit and wait for it to come online. No-op when one is running.
    pub async fn initialize(&self) -> Result<(), DispatchError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.live.lock().unwrap().is_some() {
            return Ok(());
        }
        self.start_unit().await
    }

    /// Send one forecast to the worker.
    ///
    /// Failures (other than breaker short-circuits and shutdown) count against
    /// the breaker; the failure that opens it schedules exactly one restart.
    pub async fn dispatch(&self, request: ForecastRequest) -> Result<ForecastOutput, DispatchError> {
        let inner = &self.inner;
        if inner.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        if !inner.breaker.allow() {
            debug!(ptype = %request.ptype, target = %request.target, "circuit open; dispatch short-circuited");
            return Err(DispatchError::CircuitOpen);
        }

        let request_id = inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let pending = match self.send_forecast(request_id, request, tx) {
            Ok(pending) => pending,
            Err(e) => {
                self.note_failure(&e);
                return Err(e);
            }
        };
        let _cleanup = PendingCleanup {
            pending,
            request_id,
        };

        let limit = inner.config.dispatch_timeout;
        let result = match tokio::time::timeout(limit, rx).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(DispatchError::Forecast(e)),
            Ok(Err(_)) => Err(DispatchError::WorkerCrashed),
            Err(_) => Err(DispatchError::Timeout(limit)),
        };

        match &result {
            Ok(_) => inner.breaker.record_success(),
            Err(e) if inner.terminated.load(Ordering::Acquire) => {
                debug!(request_id, error = %e, "dispatch ended by shutdown");
            }
            Err(e) => self.note_failure(e),
        }
        result
    }

    /// Stop the current unit, wait the restart cooldown and start a new one.
    ///
    /// A successful restart closes the breaker. A failed one is logged and not
    /// retried; the breaker then closes on its own cooldown.
    pub async fn restart(&self) -> Result<(), DispatchError> {
        if self.inner.restarting.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::RestartInProgress);
        }
        self.run_restart().await
    }

    /// Cancel health checks and stop the unit. Idempotent; returns whether a
    /// unit was actually stopped by this call.
    pub async fn terminate(&self) -> bool {
        let first = !self.inner.terminated.swap(true, Ordering::AcqRel);
        let cancelled = self.inner.timers.cancel_all();
        let _lifecycle = self.inner.lifecycle.lock().await;
        let stopped = self.stop_unit().await;
        if first {
            info!(stopped, timers = cancelled, "worker pool terminated");
        }
        stopped
    }

    /// Ready, breaker closed, and heard from recently.
    pub fn is_healthy(&self) -> bool {
        let inner = &self.inner;
        inner.health.is_ready()
            && !inner.breaker.is_open()
            && !is_unresponsive(
                Instant::now(),
                inner.health.last_pong(),
                inner.config.ping_interval,
                inner.config.pong_timeout,
            )
    }

    pub fn is_ready(&self) -> bool {
        self.inner.health.is_ready()
    }

    pub fn restart_count(&self) -> u64 {
        self.inner.restarts.load(Ordering::Acquire)
    }

    /// Generation of the most recently started unit; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn breaker_state(&self) -> CircuitBreakerState {
        self.inner.breaker.snapshot()
    }

    /// Health and restart tasks still running.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }

    pub fn status(&self) -> WorkerPoolStatus {
        let in_flight = self
            .inner
            .live
            .lock()
            .unwrap()
            .as_ref()
            .map(|live| live.pending.lock().unwrap().len())
            .unwrap_or(0);
        WorkerPoolStatus {
            ready: self.is_ready(),
            healthy: self.is_healthy(),
            generation: self.generation(),
            restarts: self.restart_count(),
            restarting: self.inner.restarting.load(Ordering::Acquire),
            terminated: self.inner.terminated.load(Ordering::Acquire),
            in_flight,
            breaker: self.breaker_state(),
        }
    }

    async fn start_unit(&self) -> Result<(), DispatchError> {
        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (reply_tx, mut reply_rx) = unbounded_channel();
        let unit = WorkerUnit::spawn(generation, inner.factory.clone(), reply_tx)
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        let online_timeout = inner.config.online_timeout;
        let failure = match tokio::time::timeout(online_timeout, reply_rx.recv()).await {
            Ok(Some(WorkerReply::Online)) => None,
            Ok(Some(WorkerReply::Failed(reason))) => Some(reason),
            Ok(Some(other)) => Some(format!("unexpected first reply {other:?}")),
            Ok(None) => Some("worker exited before coming online".to_string()),
            Err(_) => Some(format!("no online signal within {online_timeout:?}")),
        };
        if let Some(reason) = failure {
            warn!(generation, %reason, "forecast worker failed to start");
            self.join_unit(generation, unit.stop()).await;
            return Err(DispatchError::Spawn(reason));
        }

        inner.health.mark_online();
        let pending: Pending = Arc::default();
        let router = tokio::spawn(route_replies(
            Arc::downgrade(inner),
            generation,
            reply_rx,
            pending.clone(),
        ));
        *inner.live.lock().unwrap() = Some(LiveUnit {
            unit,
            pending,
            router,
        });
        inner.timers.register(
            HEALTH_TIMER,
            tokio::spawn(health_loop(Arc::downgrade(inner), generation)),
        );
        info!(generation, "forecast worker online");
        Ok(())
    }

    /// Take the current unit out of the slot and stop it.
    async fn stop_unit(&self) -> bool {
        let taken = self.inner.live.lock().unwrap().take();
        let Some(live) = taken else {
            return false;
        };
        self.inner.health.mark_exited();
        let generation = live.unit.generation;
        live.router.abort();
        // dropping the senders fails the waiting dispatches
        live.pending.lock().unwrap().clear();
        self.join_unit(generation, live.unit.stop()).await;
        true
    }

    async fn join_unit(&self, generation: u64, join: Option<thread::JoinHandle<()>>) {
        let Some(join) = join else {
            return;
        };
        let limit = self.inner.config.terminate_timeout;
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(move || join.join())).await {
            Ok(Ok(Ok(()))) => debug!(generation, "forecast worker joined"),
            Ok(Ok(Err(_))) => warn!(generation, "forecast worker thread had panicked"),
            Ok(Err(e)) => warn!(generation, error = %e, "forecast worker join task failed"),
            Err(_) => warn!(generation, ?limit, "forecast worker did not stop in time; detached"),
        }
    }

    fn send_forecast(
        &self,
        request_id: u64,
        request: ForecastRequest,
        tx: oneshot::Sender<Result<ForecastOutput, ForecastError>>,
    ) -> Result<Pending, DispatchError> {
        let slot = self.inner.live.lock().unwrap();
        let live = match slot.as_ref() {
            Some(live) if self.inner.health.is_ready() => live,
            _ => return Err(DispatchError::WorkerUnavailable),
        };
        live.pending.lock().unwrap().insert(request_id, tx);
        let msg = WorkerMessage::Forecast {
            request_id,
            request: Box::new(request),
        };
        if live.unit.send(msg).is_err() {
            live.pending.lock().unwrap().remove(&request_id);
            return Err(DispatchError::WorkerCrashed);
        }
        Ok(live.pending.clone())
    }

    fn send_ping(&self, generation: u64, seq: u64) -> bool {
        let slot = self.inner.live.lock().unwrap();
        match slot.as_ref() {
            Some(live) if live.unit.generation == generation => {
                live.unit.send(WorkerMessage::Ping { seq }).is_ok()
            }
            _ => false,
        }
    }

    fn note_failure(&self, error: &DispatchError) {
        if self.inner.breaker.record_failure(&error.to_string()) == BreakerTransition::Opened {
            self.schedule_restart();
        }
    }

    fn schedule_restart(&self) {
        if self.inner.terminated.load(Ordering::Acquire) {
            return;
        }
        if self.inner.restarting.swap(true, Ordering::AcqRel) {
            debug!("worker restart already in progress");
            return;
        }
        let pool = self.clone();
        let task = tokio::spawn(async move {
            let _ = pool.run_restart().await;
        });
        self.inner.timers.register(RESTART_TIMER, task);
    }

    async fn run_restart(&self) -> Result<(), DispatchError> {
        let inner = &self.inner;
        info!(generation = self.generation(), "restarting forecast worker");
        inner.timers.cancel(HEALTH_TIMER);
        {
            let _lifecycle = inner.lifecycle.lock().await;
            self.stop_unit().await;
        }
        tokio::time::sleep(inner.config.restart_cooldown).await;

        let result = {
            let _lifecycle = inner.lifecycle.lock().await;
            // terminate() may have run while we waited for the lock
            if inner.terminated.load(Ordering::Acquire) {
                Err(DispatchError::ShuttingDown)
            } else {
                self.start_unit().await
            }
        };
        match &result {
            Ok(()) => {
                inner.breaker.reset();
                let restarts = inner.restarts.fetch_add(1, Ordering::AcqRel) + 1;
                info!(generation = self.generation(), restarts, "forecast worker restarted; circuit closed");
            }
            Err(e) => error!(error = %e, "forecast worker restart failed"),
        }
        inner.restarting.store(false, Ordering::Release);
        result
    }

    fn report_unresponsive(&self, generation: u64, silent: Duration) {
        warn!(
            generation,
            silent_ms = silent.as_millis() as u64,
            "forecast worker unresponsive"
        );
        self.note_failure(&DispatchError::Unresponsive(silent));
    }
}

#[async_trait]
impl PredictionExecutor for WorkerPool {
    async fn execute(&self, request: ForecastRequest) -> Result<ForecastOutput, DispatchError> {
        self.dispatch(request).await
    }
}

/// Removes an abandoned request (timeout, cancelled caller) from the table.
struct PendingCleanup {
    pending: Pending,
    request_id: u64,
}

impl Drop for PendingCleanup {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(&self.request_id);
    }
}

async fn route_replies(
    pool: Weak<PoolInner>,
    generation: u64,
    mut replies: UnboundedReceiver<WorkerReply>,
    pending: Pending,
) {
    while let Some(reply) = replies.recv().await {
        match reply {
            WorkerReply::Pong { seq } => {
                if let Some(inner) = pool.upgrade() {
                    inner.health.record_pong();
                }
                debug!(generation, seq, "pong");
            }
            WorkerReply::Completed {
                request_id,
                outcome,
            } => {
                if let Some(tx) = pending.lock().unwrap().remove(&request_id) {
                    let _ = tx.send(outcome);
                }
            }
            WorkerReply::Online | WorkerReply::Failed(_) => {}
        }
    }

    // reply channel closed: the thread is gone
    pending.lock().unwrap().clear();
    let Some(inner) = pool.upgrade() else {
        return;
    };
    let current = inner
        .live
        .lock()
        .unwrap()
        .as_ref()
        .map(|live| live.unit.generation);
    if current == Some(generation) {
        inner.health.mark_exited();
        inner.timers.cancel(HEALTH_TIMER);
        warn!(generation, "forecast worker exited unexpectedly");
    }
}

/// Pings the unit every `ping_interval` and reports it once its silence
/// exceeds `ping_interval + pong_timeout`, then again on every ping while the
/// silence lasts. Ends when the unit stops being ready.
async fn health_loop(pool: Weak<PoolInner>, generation: u64) {
    let Some((ping_interval, pong_timeout)) = pool
        .upgrade()
        .map(|inner| (inner.config.ping_interval.max(MIN_PERIOD), inner.config.pong_timeout))
    else {
        return;
    };
    let limit = ping_interval + pong_timeout;
    let mut next_ping = Instant::now() + ping_interval;
    let mut reported_since: Option<Instant> = None;
    let mut seq = 0u64;

    loop {
        let last_pong = match pool.upgrade() {
            Some(inner) => inner.health.last_pong(),
            None => return,
        };
        let deadline = last_pong + limit + Duration::from_millis(1);
        let wake = if reported_since == Some(last_pong) || deadline >= next_ping {
            next_ping
        } else {
            deadline
        };
        tokio::time::sleep_until(wake).await;

        let Some(inner) = pool.upgrade() else {
            return;
        };
        let pool_handle = WorkerPool { inner };
        if !pool_handle.inner.health.is_ready() {
            debug!(generation, "worker not ready; health checks stopped");
            return;
        }

        let now = Instant::now();
        let last_pong = pool_handle.inner.health.last_pong();
        if is_unresponsive(now, last_pong, ping_interval, pong_timeout) {
            reported_since = Some(last_pong);
            pool_handle.report_unresponsive(generation, now.saturating_duration_since(last_pong));
        }

        if now >= next_ping {
            if !pool_handle.send_ping(generation, seq) {
                debug!(generation, "worker gone; health checks stopped");
                return;
            }
            seq += 1;
            while next_ping <= now {
                next_ping += ping_interval;
            }
        }
    }
}
