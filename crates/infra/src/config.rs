//! Configuration loading and representation.
//!
//! Every section has working defaults; `from_env` overlays `FORESIGHT_*`
//! variables on top. Durations are given in milliseconds. A value that does
//! not parse, or a zero interval or timeout, is reported with `warn!` and the
//! default is kept.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use foresight_core::PredictionType;

use crate::cache::CacheConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::throttle::ThrottleConfig;
use crate::worker::WorkerPoolConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub throttle: ThrottleConfig,
    pub worker: WorkerPoolConfig,
    pub orchestrator: OrchestratorConfig,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` knows about.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overlay { lookup };
        let mut cfg = Self::default();

        env.usize("FORESIGHT_CACHE_MAX_ENTRIES", &mut cfg.cache.max_entries);
        for ptype in PredictionType::ALL {
            let key = format!("FORESIGHT_CACHE_TTL_{}_MS", ptype.as_str().to_uppercase());
            if let Some(ttl) = env.parse::<u64>(&key) {
                cfg.cache.ttls.insert(ptype, Duration::from_millis(ttl));
            }
        }

        env.usize("FORESIGHT_THROTTLE_MAX_QUEUE", &mut cfg.throttle.max_queue);
        env.usize("FORESIGHT_THROTTLE_MAX_CONCURRENT", &mut cfg.throttle.max_concurrent);
        cfg.throttle.max_concurrent = cfg.throttle.max_concurrent.max(1);
        if let Some(threshold) = env.parse::<f32>("FORESIGHT_THROTTLE_CPU_THRESHOLD") {
            cfg.throttle.cpu_threshold = threshold;
        }
        env.period("FORESIGHT_THROTTLE_SAMPLE_INTERVAL_MS", &mut cfg.throttle.sample_interval);
        env.period("FORESIGHT_THROTTLE_TIMEOUT_MS", &mut cfg.throttle.default_timeout);

        env.period("FORESIGHT_WORKER_PING_INTERVAL_MS", &mut cfg.worker.ping_interval);
        env.period("FORESIGHT_WORKER_PONG_TIMEOUT_MS", &mut cfg.worker.pong_timeout);
        env.millis("FORESIGHT_WORKER_RESTART_COOLDOWN_MS", &mut cfg.worker.restart_cooldown);
        env.period("FORESIGHT_WORKER_DISPATCH_TIMEOUT_MS", &mut cfg.worker.dispatch_timeout);
        if let Some(threshold) = env.parse::<u32>("FORESIGHT_BREAKER_FAILURE_THRESHOLD") {
            cfg.worker.breaker.failure_threshold = threshold.max(1);
        }
        env.millis("FORESIGHT_BREAKER_COOLDOWN_MS", &mut cfg.worker.breaker.cooldown);

        let o = &mut cfg.orchestrator;
        env.period("FORESIGHT_GENERATION_INTERVAL_MS", &mut o.generation_interval);
        env.period("FORESIGHT_TICK_DEADLINE_MS", &mut o.tick_deadline);
        env.period("FORESIGHT_VALIDATION_INTERVAL_MS", &mut o.validation_interval);
        env.millis("FORESIGHT_VALIDATION_WINDOW_MS", &mut o.validation_window);
        env.period("FORESIGHT_RETRAINING_INTERVAL_MS", &mut o.retraining_interval);
        env.period("FORESIGHT_REQUEST_TIMEOUT_MS", &mut o.request_timeout);
        env.usize("FORESIGHT_HISTORY_CAP", &mut o.history_cap);
        if let Some(min) = env.parse::<f64>("FORESIGHT_MIN_CONFIDENCE") {
            o.min_confidence = min;
        }
        if let Some(max) = env.parse::<f64>("FORESIGHT_MAX_CONFIDENCE") {
            o.max_confidence = max;
        }

        cfg
    }
}

struct Overlay<F> {
    lookup: F,
}

impl<F> Overlay<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = (self.lookup)(key)?;
        match raw.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable configuration value");
                None
            }
        }
    }

    fn usize(&self, key: &str, slot: &mut usize) {
        if let Some(v) = self.parse(key) {
            *slot = v;
        }
    }

    fn millis(&self, key: &str, slot: &mut Duration) {
        if let Some(ms) = self.parse::<u64>(key) {
            *slot = Duration::from_millis(ms);
        }
    }

    /// Like `millis`, but zero is rejected.
    fn period(&self, key: &str, slot: &mut Duration) {
        match self.parse::<u64>(key) {
            Some(0) => warn!(key, "ignoring zero interval or timeout"),
            Some(ms) => *slot = Duration::from_millis(ms),
            None => {}
        }
    }
}
