//! Prediction orchestrator.
//!
//! Owns the model registry and the prediction history, and drives three
//! periodic routines against the pipeline:
//!
//! - **generation**: every eligible model gets a forecast through
//!   cache → throttle → worker pool (or the fallback), bounded by a per-cycle
//!   deadline. Can also be triggered on demand; triggers coalesce.
//! - **validation**: predictions older than the validation window are scored
//!   against what was observed afterwards, once each.
//! - **retraining**: model confidence is recomputed from validated outcomes
//!   and cache entries whose source data changed are invalidated.
//!
//! Nothing here ever propagates an error out of a scheduled routine; failures
//! land in the routine's report and the logs.

mod pipeline;
mod registry;
mod report;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use foresight_ai::{ForecastOutput, ForecastRequest, accuracy};
use foresight_core::{
    CycleId, DataSourceKind, DomainResult, ModelId, Prediction, PredictionId, PredictionModel,
    PredictionType, SharedClock, SystemClock,
};

use crate::cache::PredictionCache;
use crate::config::PipelineConfig;
use crate::error::PipelineFailure;
use crate::publish::{PredictionPublisher, publish_key};
use crate::source::HistoricalDataSource;
use crate::throttle::{LoadSampler, ThrottlingEngine};
use crate::timers::{MIN_PERIOD, TimerRegistry};
use crate::worker::{DispatchError, ForecasterFactory, PredictionExecutor, WorkerPool};

pub use pipeline::{PipelineOutcome, PredictionPipeline, priority_for};
pub use registry::{DEFAULT_MODELS, ModelSpec, default_models};
pub use report::{
    GenerationReport, MetricsSnapshot, ModelOutcome, ModelSummary, OrchestratorStatus,
    PredictionStats, RetrainingReport, ShutdownReport, ShutdownStatus, ShutdownStep, TypeStats,
    ValidationReport,
};

const GENERATION_TIMER: &str = "generation";
const VALIDATION_TIMER: &str = "validation";
const RETRAINING_TIMER: &str = "retraining";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub generation_interval: Duration,
    /// Generation work still outstanding after this is abandoned.
    pub tick_deadline: Duration,
    pub validation_interval: Duration,
    /// Minimum prediction age before it is scored.
    pub validation_window: Duration,
    pub retraining_interval: Duration,
    /// Queue wait plus execution budget for one model's forecast.
    pub request_timeout: Duration,
    /// How far back generation reads historical data.
    pub lookback: Duration,
    pub history_cap: usize,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub initial_confidence: f64,
    /// Validated outcomes kept per model.
    pub accuracy_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            generation_interval: Duration::from_secs(300),
            tick_deadline: Duration::from_secs(30),
            validation_interval: Duration::from_secs(3_600),
            validation_window: Duration::from_secs(86_400),
            retraining_interval: Duration::from_secs(86_400),
            request_timeout: Duration::from_secs(20),
            lookback: Duration::from_secs(7 * 86_400),
            history_cap: 1_000,
            min_confidence: 60.0,
            max_confidence: 95.0,
            initial_confidence: 75.0,
            accuracy_window: 20,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_generation_interval(mut self, interval: Duration) -> Self {
        self.generation_interval = interval.max(MIN_PERIOD);
        self
    }

    pub fn with_tick_deadline(mut self, deadline: Duration) -> Self {
        self.tick_deadline = deadline.max(MIN_PERIOD);
        self
    }

    pub fn with_validation(mut self, interval: Duration, window: Duration) -> Self {
        self.validation_interval = interval.max(MIN_PERIOD);
        self.validation_window = window;
        self
    }

    pub fn with_retraining_interval(mut self, interval: Duration) -> Self {
        self.retraining_interval = interval.max(MIN_PERIOD);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.max(MIN_PERIOD);
        self
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    pub fn with_confidence_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_confidence = min;
        self.max_confidence = max;
        self
    }

    fn lookback_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.lookback).unwrap_or(TimeDelta::days(7))
    }
}

/// External collaborators the orchestrator reads from and writes to.
pub struct Collaborators {
    pub source: Arc<dyn HistoricalDataSource>,
    pub publisher: Arc<dyn PredictionPublisher>,
    pub forecasters: Arc<dyn ForecasterFactory>,
}

pub struct OrchestratorBuilder {
    config: PipelineConfig,
    collaborators: Collaborators,
    clock: SharedClock,
    models: Option<Vec<PredictionModel>>,
    load_sampler: Option<Box<dyn LoadSampler>>,
}

impl OrchestratorBuilder {
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default registry.
    pub fn with_models(mut self, models: Vec<PredictionModel>) -> Self {
        self.models = Some(models);
        self
    }

    /// Sampler started with the orchestrator; without one the throttle only
    /// sees loads recorded by hand.
    pub fn with_load_sampler(mut self, sampler: Box<dyn LoadSampler>) -> Self {
        self.load_sampler = Some(sampler);
        self
    }

    pub fn build(self) -> DomainResult<PredictionOrchestrator> {
        let PipelineConfig {
            cache,
            throttle,
            worker,
            orchestrator,
        } = self.config;
        let clock = self.clock;

        let models = match self.models {
            Some(models) => models,
            None => default_models(orchestrator.initial_confidence, clock.now())?,
        };
        let models = models.into_iter().map(|m| (m.id.clone(), m)).collect();

        let pool = WorkerPool::new(worker, clock.clone(), self.collaborators.forecasters);
        let executor: Arc<dyn PredictionExecutor> = Arc::new(pool.clone());
        let cache = Arc::new(PredictionCache::new(cache, clock.clone()));
        let throttle = Arc::new(ThrottlingEngine::new(throttle, executor));
        let pipeline =
            PredictionPipeline::new(cache.clone(), throttle.clone(), orchestrator.request_timeout);

        Ok(PredictionOrchestrator {
            inner: Arc::new(Inner {
                config: orchestrator,
                clock,
                source: self.collaborators.source,
                publisher: self.collaborators.publisher,
                cache,
                throttle,
                pool,
                pipeline,
                models: RwLock::new(models),
                history: Mutex::new(VecDeque::new()),
                revisions: Mutex::new(HashMap::new()),
                timers: TimerRegistry::new(),
                trigger: Mutex::new(None),
                load_sampler: Mutex::new(self.load_sampler),
                metrics: Metrics::default(),
                running: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                shutdown: tokio::sync::Mutex::new(None),
            }),
        })
    }
}

#[derive(Default)]
struct Metrics {
    cycles: AtomicU64,
    abandoned_cycles: AtomicU64,
    computed: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
    throttled: AtomicU64,
    skipped: AtomicU64,
    validated: AtomicU64,
    retraining_passes: AtomicU64,
    retraining_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            cycles: get(&self.cycles),
            abandoned_cycles: get(&self.abandoned_cycles),
            computed: get(&self.computed),
            cache_hits: get(&self.cache_hits),
            fallbacks: get(&self.fallbacks),
            throttled: get(&self.throttled),
            skipped: get(&self.skipped),
            validated: get(&self.validated),
            retraining_passes: get(&self.retraining_passes),
            retraining_failures: get(&self.retraining_failures),
        }
    }
}

struct Inner {
    config: OrchestratorConfig,
    clock: SharedClock,
    source: Arc<dyn HistoricalDataSource>,
    publisher: Arc<dyn PredictionPublisher>,
    cache: Arc<PredictionCache<ForecastOutput>>,
    throttle: Arc<ThrottlingEngine>,
    pool: WorkerPool,
    pipeline: PredictionPipeline,
    models: RwLock<BTreeMap<ModelId, PredictionModel>>,
    history: Mutex<VecDeque<Prediction>>,
    revisions: Mutex<HashMap<DataSourceKind, u64>>,
    timers: TimerRegistry,
    trigger: Mutex<Option<mpsc::Sender<()>>>,
    load_sampler: Mutex<Option<Box<dyn LoadSampler>>>,
    metrics: Metrics,
    running: AtomicBool,
    shut_down: AtomicBool,
    shutdown: tokio::sync::Mutex<Option<ShutdownReport>>,
}

#[derive(Clone)]
pub struct PredictionOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PredictionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionOrchestrator")
            .field("config", &self.inner.config)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl PredictionOrchestrator {
    pub fn builder(config: PipelineConfig, collaborators: Collaborators) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            collaborators,
            clock: SystemClock::shared(),
            models: None,
            load_sampler: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &PredictionCache<ForecastOutput> {
        &self.inner.cache
    }

    pub fn throttle(&self) -> &ThrottlingEngine {
        &self.inner.throttle
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Start the worker and the periodic routines.
    ///
    /// A worker that fails to come up is logged and generation runs on the
    /// fallback path; the only error is calling this after `shutdown`.
    pub async fn start(&self) -> Result<(), DispatchError> {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        if inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = inner.pool.initialize().await {
            error!(error = %e, "worker pool failed to start; predictions will use the fallback path");
        }
        let sampler = inner.load_sampler.lock().unwrap().take();
        if let Some(sampler) = sampler {
            inner.throttle.start_sampler(sampler);
        }
        self.snapshot_revisions().await;

        let (tx, rx) = mpsc::channel(1);
        *inner.trigger.lock().unwrap() = Some(tx);

        let weak = Arc::downgrade(inner);
        inner.timers.register(
            GENERATION_TIMER,
            tokio::spawn(generation_loop(weak.clone(), rx, inner.config.generation_interval)),
        );
        inner.timers.register(
            VALIDATION_TIMER,
            tokio::spawn(pass_loop(weak.clone(), Pass::Validation, inner.config.validation_interval)),
        );
        inner.timers.register(
            RETRAINING_TIMER,
            tokio::spawn(pass_loop(weak, Pass::Retraining, inner.config.retraining_interval)),
        );

        info!(
            models = inner.models.read().unwrap().len(),
            generation_interval_ms = inner.config.generation_interval.as_millis() as u64,
            "prediction orchestrator started"
        );
        Ok(())
    }

    /// Ask for a generation cycle now. Returns false if one is already
    /// pending or the orchestrator is not running.
    pub fn trigger_generation(&self) -> bool {
        self.inner
            .trigger
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.try_send(()).is_ok())
    }

    /// Source data behind `ptype` was refreshed; drop its cached results.
    pub fn notify_data_refreshed(&self, ptype: PredictionType) -> usize {
        let dropped = self.inner.cache.invalidate(Some(ptype), None);
        debug!(%ptype, dropped, "cache invalidated after data refresh");
        dropped
    }

    /// One generation cycle over every registered model.
    pub async fn run_generation_cycle(&self) -> GenerationReport {
        let inner = &self.inner;
        let cycle_id = CycleId::new();
        let started_at = inner.clock.now();
        let started = Instant::now();
        bump(&inner.metrics.cycles);

        let purged = inner.cache.purge_expired();
        if purged > 0 {
            debug!(cycle = %cycle_id, purged, "expired cache entries swept");
        }

        let min = inner.config.min_confidence;
        let (eligible, skipped): (Vec<_>, Vec<_>) = inner
            .models
            .read()
            .unwrap()
            .values()
            .cloned()
            .partition(|m| m.is_eligible(min));

        let mut outcomes = BTreeMap::new();
        for model in skipped {
            debug!(cycle = %cycle_id, model = %model.id, confidence = model.confidence, "below minimum confidence; skipped");
            bump(&inner.metrics.skipped);
            outcomes.insert(
                model.id.clone(),
                ModelOutcome::Skipped {
                    confidence: model.confidence,
                },
            );
        }

        let mut tasks = JoinSet::new();
        for model in eligible {
            let this = self.clone();
            tasks.spawn(async move {
                let outcome = this.generate_for_model(&model).await;
                (model.id, outcome)
            });
        }

        let deadline = inner.config.tick_deadline;
        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, outcome)) => {
                        outcomes.insert(id, outcome);
                    }
                    Err(e) => error!(cycle = %cycle_id, error = %e, "generation task failed"),
                }
            }
        })
        .await;

        let abandoned = drained.is_err();
        let failure = if abandoned {
            let outstanding = tasks.len();
            tasks.abort_all();
            bump(&inner.metrics.abandoned_cycles);
            let failure = PipelineFailure::GenerationTimeout {
                deadline_ms: deadline.as_millis() as u64,
            };
            warn!(cycle = %cycle_id, outstanding, error = %failure, "generation cycle abandoned");
            Some(failure)
        } else {
            None
        };

        let report = GenerationReport {
            cycle_id,
            started_at,
            finished_at: inner.clock.now(),
            outcomes,
            abandoned,
            failure,
        };
        info!(
            cycle = %cycle_id,
            recorded = report.recorded(),
            models = report.outcomes.len(),
            abandoned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation cycle finished"
        );
        report
    }

    async fn generate_for_model(&self, model: &PredictionModel) -> ModelOutcome {
        let inner = &self.inner;
        let now = inner.clock.now();
        let since = now - inner.config.lookback_delta();
        let history = match inner
            .source
            .fetch(model.ptype.data_source(), &model.target, Some(since))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(model = %model.id, error = %e, "historical data unavailable");
                return ModelOutcome::NoData {
                    reason: e.to_string(),
                };
            }
        };

        let request = ForecastRequest::new(model.ptype, model.target.clone(), history, now);
        match inner.pipeline.predict(request, priority_for(model.ptype)).await {
            PipelineOutcome::Throttled(failure) => {
                bump(&inner.metrics.throttled);
                ModelOutcome::Throttled { failure }
            }
            PipelineOutcome::CacheHit(output) => {
                bump(&inner.metrics.cache_hits);
                self.recorded(model, output, |prediction_id| ModelOutcome::CacheHit { prediction_id })
                    .await
            }
            PipelineOutcome::Computed(output) => {
                bump(&inner.metrics.computed);
                self.recorded(model, output, |prediction_id| ModelOutcome::Computed { prediction_id })
                    .await
            }
            PipelineOutcome::Fallback { output, failure } => {
                bump(&inner.metrics.fallbacks);
                self.recorded(model, output, move |prediction_id| ModelOutcome::Fallback {
                    prediction_id,
                    failure,
                })
                .await
            }
        }
    }

    async fn recorded(
        &self,
        model: &PredictionModel,
        output: ForecastOutput,
        outcome: impl FnOnce(PredictionId) -> ModelOutcome,
    ) -> ModelOutcome {
        match self.record(model, output).await {
            Ok(id) => outcome(id),
            Err(e) => {
                error!(model = %model.id, error = %e, "prediction rejected");
                ModelOutcome::NoData {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Append to the bounded history and publish for consumers.
    async fn record(&self, model: &PredictionModel, output: ForecastOutput) -> DomainResult<PredictionId> {
        let inner = &self.inner;
        let confidence = output.confidence.min(model.confidence);
        let prediction = Prediction::new(
            model.id.clone(),
            model.target.clone(),
            output.payload,
            confidence,
            inner.clock.now(),
        )?;
        let id = prediction.id;
        let encoded = serde_json::to_value(&prediction);

        {
            let mut history = inner.history.lock().unwrap();
            history.push_back(prediction);
            while history.len() > inner.config.history_cap.max(1) {
                history.pop_front();
            }
        }

        let key = publish_key(model.ptype, &model.target);
        let ttl = inner.cache.config().ttl_for(model.ptype);
        match encoded {
            Ok(value) => {
                if let Err(e) = inner.publisher.publish(&key, value, ttl).await {
                    warn!(%key, error = %e, "publishing prediction failed");
                }
            }
            Err(e) => warn!(%key, error = %e, "prediction could not be encoded for publishing"),
        }
        Ok(id)
    }

    /// Score every unvalidated prediction older than the validation window.
    pub async fn run_validation_pass(&self) -> ValidationReport {
        let inner = &self.inner;
        let now = inner.clock.now();
        let window = TimeDelta::from_std(inner.config.validation_window).unwrap_or(TimeDelta::MAX);

        let due: Vec<Prediction> = inner
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !p.is_validated() && now.signed_duration_since(p.created_at) >= window)
            .cloned()
            .collect();
        let mut report = ValidationReport {
            due: due.len(),
            ..ValidationReport::default()
        };

        for prediction in due {
            let kind = prediction.prediction_type().data_source();
            let observed = match inner
                .source
                .fetch(kind, &prediction.target, Some(prediction.created_at))
                .await
            {
                Ok(observed) => observed,
                Err(e) => {
                    report.errors += 1;
                    warn!(prediction = %prediction.id, error = %e, "observed data unavailable");
                    continue;
                }
            };
            let Some(score) = accuracy::score(&prediction.payload, &observed) else {
                report.inconclusive += 1;
                continue;
            };

            let stamped = {
                let mut history = inner.history.lock().unwrap();
                history
                    .iter_mut()
                    .find(|p| p.id == prediction.id)
                    .map(|p| p.record_accuracy(score))
            };
            match stamped {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    report.errors += 1;
                    warn!(prediction = %prediction.id, error = %e, "accuracy not recorded");
                    continue;
                }
                None => {
                    debug!(prediction = %prediction.id, "rotated out of history before validation");
                    continue;
                }
            }

            let folded = {
                let mut models = inner.models.write().unwrap();
                models.get_mut(&prediction.model_id).map(|m| {
                    m.record_outcome(score, inner.config.accuracy_window, inner.config.max_confidence)
                })
            };
            if let Some(Err(e)) = folded {
                warn!(model = %prediction.model_id, error = %e, "outcome not folded into model");
            }
            report.validated += 1;
            bump(&inner.metrics.validated);
        }

        info!(
            due = report.due,
            validated = report.validated,
            inconclusive = report.inconclusive,
            errors = report.errors,
            "validation pass finished"
        );
        report
    }

    /// Recompute model confidence and drop cache entries whose data changed.
    ///
    /// A model whose data cannot be read keeps its current confidence.
    pub async fn run_retraining_pass(&self) -> RetrainingReport {
        let inner = &self.inner;
        bump(&inner.metrics.retraining_passes);
        let now = inner.clock.now();
        let models: Vec<PredictionModel> = inner.models.read().unwrap().values().cloned().collect();
        let mut report = RetrainingReport::default();

        let kinds: BTreeSet<DataSourceKind> = models.iter().map(|m| m.ptype.data_source()).collect();
        let mut unavailable: HashMap<DataSourceKind, String> = HashMap::new();
        for kind in kinds {
            match inner.source.revision(kind).await {
                Ok(revision) => {
                    let previous = inner.revisions.lock().unwrap().insert(kind, revision);
                    if previous == Some(revision) {
                        continue;
                    }
                    for ptype in PredictionType::ALL.into_iter().filter(|t| t.data_source() == kind) {
                        report.changed_types.push(ptype);
                        report.invalidated_entries += inner.cache.invalidate(Some(ptype), None);
                    }
                }
                Err(e) => {
                    unavailable.insert(kind, e.to_string());
                }
            }
        }

        let since = now - inner.config.lookback_delta();
        for model in models {
            let kind = model.ptype.data_source();
            let problem = match unavailable.get(&kind) {
                Some(reason) => Some(reason.clone()),
                None => inner
                    .source
                    .fetch(kind, &model.target, Some(since))
                    .await
                    .err()
                    .map(|e| e.to_string()),
            };
            if let Some(reason) = problem {
                bump(&inner.metrics.retraining_failures);
                let failure = PipelineFailure::RetrainingFailure(reason);
                error!(model = %model.id, error = %failure, "retraining failed; confidence unchanged");
                report.failures.insert(model.id, failure);
                continue;
            }

            let changed = {
                let mut models = inner.models.write().unwrap();
                models
                    .get_mut(&model.id)
                    .map(|m| (m.retrain(inner.config.max_confidence, now), m.confidence))
            };
            if let Some((changed, confidence)) = changed {
                debug!(model = %model.id, changed, confidence, "model retrained");
                report.retrained.push(model.id);
            }
        }

        info!(
            retrained = report.retrained.len(),
            failures = report.failures.len(),
            invalidated = report.invalidated_entries,
            "retraining pass finished"
        );
        report
    }

    async fn snapshot_revisions(&self) {
        let inner = &self.inner;
        let kinds: BTreeSet<DataSourceKind> = inner
            .models
            .read()
            .unwrap()
            .values()
            .map(|m| m.ptype.data_source())
            .collect();
        for kind in kinds {
            match inner.source.revision(kind).await {
                Ok(revision) => {
                    inner.revisions.lock().unwrap().insert(kind, revision);
                }
                Err(e) => debug!(%kind, error = %e, "no initial revision"),
            }
        }
    }

    pub fn get_status(&self) -> OrchestratorStatus {
        let inner = &self.inner;
        let worker = inner.pool.status();
        let running = inner.running.load(Ordering::Acquire) && !inner.shut_down.load(Ordering::Acquire);
        let min = inner.config.min_confidence;
        let models = inner
            .models
            .read()
            .unwrap()
            .values()
            .map(|m| ModelSummary::of(m, min))
            .collect();
        OrchestratorStatus {
            healthy: running && worker.healthy,
            running,
            worker,
            cache: inner.cache.stats(),
            throttle: inner.throttle.stats(),
            models,
            metrics: inner.metrics.snapshot(),
            history_len: inner.history.lock().unwrap().len(),
            last_prediction_at: self.last_prediction_at(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn models(&self) -> Vec<PredictionModel> {
        self.inner.models.read().unwrap().values().cloned().collect()
    }

    pub fn get_prediction_stats(&self) -> PredictionStats {
        let guard = self.inner.history.lock().unwrap();
        let history: &VecDeque<Prediction> = &guard;
        let mut by_type: BTreeMap<PredictionType, TypeStats> = BTreeMap::new();
        for ptype in PredictionType::ALL {
            let of_type = move || history.iter().filter(move |p| p.prediction_type() == ptype);
            let count = of_type().count();
            if count == 0 {
                continue;
            }
            by_type.insert(
                ptype,
                TypeStats {
                    count,
                    validated: of_type().filter(|p| p.is_validated()).count(),
                    average_accuracy: report::mean(of_type().filter_map(|p| p.accuracy)),
                    average_confidence: report::mean(of_type().map(|p| p.confidence)),
                },
            );
        }
        PredictionStats {
            total: history.len(),
            validated: history.iter().filter(|p| p.is_validated()).count(),
            average_accuracy: report::mean(history.iter().filter_map(|p| p.accuracy)),
            by_type,
        }
    }

    /// Recorded predictions of `ptype`, oldest first, limited to models that
    /// are currently eligible.
    pub fn get_predictions_by_type(&self, ptype: PredictionType) -> Vec<Prediction> {
        let min = self.inner.config.min_confidence;
        let eligible: BTreeSet<ModelId> = self
            .inner
            .models
            .read()
            .unwrap()
            .values()
            .filter(|m| m.ptype == ptype && m.is_eligible(min))
            .map(|m| m.id.clone())
            .collect();
        self.inner
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.prediction_type() == ptype && eligible.contains(&p.model_id))
            .cloned()
            .collect()
    }

    /// Stop everything, in order. Safe to call more than once; later calls
    /// return the first report marked `repeated`.
    pub async fn shutdown(&self) -> ShutdownReport {
        let inner = &self.inner;
        let mut slot = inner.shutdown.lock().await;
        if let Some(done) = slot.as_ref() {
            let mut again = done.clone();
            again.repeated = true;
            return again;
        }
        inner.shut_down.store(true, Ordering::Release);
        info!("shutting down prediction orchestrator");

        let mut steps = Vec::with_capacity(6);

        inner.trigger.lock().unwrap().take();
        let cancelled = inner.timers.cancel(GENERATION_TIMER);
        steps.push(step(
            "cancel_generation_timer",
            true,
            if cancelled { "cancelled" } else { "not scheduled" },
        ));

        let cancelled = inner.timers.cancel(RETRAINING_TIMER);
        steps.push(step(
            "cancel_retraining_timer",
            true,
            if cancelled { "cancelled" } else { "not scheduled" },
        ));

        let stopped = inner.pool.terminate().await;
        steps.push(step(
            "terminate_worker_pool",
            !inner.pool.is_ready() && inner.pool.pending_timers() == 0,
            if stopped { "worker stopped" } else { "already stopped" },
        ));

        let cancelled = inner.throttle.destroy();
        steps.push(step(
            "destroy_throttling_engine",
            inner.throttle.pending_timers() == 0,
            format!("{cancelled} queued requests cancelled"),
        ));

        let dropped = inner.cache.destroy();
        steps.push(step(
            "destroy_cache",
            inner.cache.is_empty(),
            format!("{dropped} entries dropped"),
        ));

        let leftover = inner.timers.names();
        let remaining = inner.timers.cancel_all();
        if !leftover.is_empty() {
            debug!(timers = ?leftover, "cancelling remaining scheduled tasks");
        }
        steps.push(step(
            "clear_pending_operations",
            inner.timers.pending() == 0,
            format!("{remaining} scheduled tasks cancelled"),
        ));

        inner.running.store(false, Ordering::Release);
        let report = ShutdownReport {
            steps,
            repeated: false,
        };
        if report.all_completed() {
            info!("prediction orchestrator shut down");
        } else {
            warn!(steps = ?report.steps, "prediction orchestrator shut down with incomplete steps");
        }
        *slot = Some(report.clone());
        report
    }

    pub fn get_shutdown_status(&self) -> ShutdownStatus {
        let inner = &self.inner;
        ShutdownStatus {
            shut_down: inner.shut_down.load(Ordering::Acquire),
            pending_timers: inner.timers.pending()
                + inner.pool.pending_timers()
                + inner.throttle.pending_timers(),
            worker_ready: inner.pool.is_ready(),
            throttle_destroyed: inner.throttle.stats().destroyed,
            cache_destroyed: inner.cache.is_destroyed(),
            cache_entries: inner.cache.len(),
            report: inner.shutdown.try_lock().ok().and_then(|slot| slot.clone()),
        }
    }

    /// Timestamp of the most recent recorded prediction.
    pub fn last_prediction_at(&self) -> Option<DateTime<Utc>> {
        self.inner.history.lock().unwrap().back().map(|p| p.created_at)
    }
}

fn step(name: &'static str, completed: bool, detail: impl Into<String>) -> ShutdownStep {
    ShutdownStep {
        name,
        completed,
        detail: detail.into(),
    }
}

/// First scheduled cycle runs one period after start; `trigger_generation`
/// gets one sooner.
async fn generation_loop(inner: Weak<Inner>, mut trigger: mpsc::Receiver<()>, period: Duration) {
    let period = period.max(MIN_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            received = trigger.recv() => {
                if received.is_none() {
                    break;
                }
                debug!("generation triggered");
            }
        }
        let Some(inner) = inner.upgrade() else { break };
        PredictionOrchestrator { inner }.run_generation_cycle().await;
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Validation,
    Retraining,
}

async fn pass_loop(inner: Weak<Inner>, pass: Pass, period: Duration) {
    let period = period.max(MIN_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        let orchestrator = PredictionOrchestrator { inner };
        match pass {
            Pass::Validation => {
                orchestrator.run_validation_pass().await;
            }
            Pass::Retraining => {
                orchestrator.run_retraining_pass().await;
            }
        }
    }
}
