//! Consecutive-failure circuit breaker guarding the forecast worker.
//!
//! Closed → Open after `failure_threshold` consecutive failures. Open → Closed
//! purely on time: the first check at or after `opened_at + cooldown` resets
//! the counters. There is no half-open probe, so a still-broken worker
//! reopens the breaker on its next failure.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use foresight_core::SharedClock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Snapshot of the breaker, as reported in status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    /// Consecutive failures since the last success or close.
    pub failure_count: u32,
    pub is_open: bool,
    pub opened_at: Option<DateTime<Utc>>,
    /// Lifetime number of Closed → Open transitions.
    pub times_opened: u64,
}

/// What a recorded failure did to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Unchanged,
    /// This failure opened the breaker; the caller owns the restart.
    Opened,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: SharedClock,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CircuitBreakerState::default()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether a dispatch may reach the worker.
    ///
    /// An open breaker whose cooldown has elapsed closes here.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return true;
        }
        let cooldown = TimeDelta::from_std(self.config.cooldown).unwrap_or(TimeDelta::MAX);
        let elapsed = state
            .opened_at
            .map(|at| self.clock.now().signed_duration_since(at))
            .unwrap_or(TimeDelta::MAX);
        if elapsed >= cooldown {
            state.is_open = false;
            state.failure_count = 0;
            state.opened_at = None;
            info!("circuit breaker cooldown elapsed; closing");
            true
        } else {
            false
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.failure_count = 0;
    }

    pub fn record_failure(&self, reason: &str) -> BreakerTransition {
        let mut state = self.state.lock().unwrap();
        state.failure_count = state.failure_count.saturating_add(1);
        if state.is_open || state.failure_count < self.config.failure_threshold {
            return BreakerTransition::Unchanged;
        }
        state.is_open = true;
        state.opened_at = Some(self.clock.now());
        state.times_opened += 1;
        warn!(
            failures = state.failure_count,
            threshold = self.config.failure_threshold,
            reason,
            "circuit breaker opened"
        );
        BreakerTransition::Opened
    }

    /// Force Closed with zero failures (after a successful worker restart).
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.failure_count = 0;
        state.is_open = false;
        state.opened_at = None;
    }

    /// Current open flag; unlike `allow` this never applies the cooldown.
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_open
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use foresight_core::ManualClock;
    use proptest::prelude::*;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::default(), clock)
    }

    #[test]
    fn opens_on_the_threshold_failure_only() {
        let b = breaker(Arc::new(ManualClock::at_epoch()));
        for _ in 0..4 {
            assert_eq!(b.record_failure("boom"), BreakerTransition::Unchanged);
        }
        assert!(b.allow());
        assert_eq!(b.record_failure("boom"), BreakerTransition::Opened);
        assert_eq!(b.record_failure("boom"), BreakerTransition::Unchanged);
        assert!(!b.allow());
        assert_eq!(b.snapshot().times_opened, 1);
    }

    #[test]
    fn success_resets_the_count() {
        let b = breaker(Arc::new(ManualClock::at_epoch()));
        for _ in 0..4 {
            b.record_failure("boom");
        }
        b.record_success();
        assert_eq!(b.snapshot().failure_count, 0);
        assert_eq!(b.record_failure("boom"), BreakerTransition::Unchanged);
    }

    #[test]
    fn closes_once_cooldown_elapses() {
        let clock = Arc::new(ManualClock::at_epoch());
        let b = breaker(clock.clone());
        for _ in 0..5 {
            b.record_failure("boom");
        }
        clock.advance_ms(59_999);
        assert!(!b.allow());

        clock.advance_ms(1);
        assert!(b.allow());
        let state = b.snapshot();
        assert!(!state.is_open);
        assert_eq!(state.failure_count, 0);

        // no probe: the next failures reopen it from scratch
        for _ in 0..4 {
            assert_eq!(b.record_failure("still broken"), BreakerTransition::Unchanged);
        }
        assert_eq!(b.record_failure("still broken"), BreakerTransition::Opened);
    }

    proptest! {
        /// Property: across any success/failure sequence, `Opened` is returned
        /// exactly once per Closed → Open transition.
        #[test]
        fn one_open_signal_per_transition(outcomes in prop::collection::vec(any::<bool>(), 0..200)) {
            let b = breaker(Arc::new(ManualClock::at_epoch()));
            let mut opened_signals = 0u64;
            let mut run = 0u32;
            let mut expected = 0u64;
            for ok in outcomes {
                if ok {
                    b.record_success();
                    run = 0;
                } else {
                    run += 1;
                    if run == 5 {
                        expected += 1;
                        run = 0;
                    }
                    if b.record_failure("x") == BreakerTransition::Opened {
                        opened_signals += 1;
                    }
                }
                // stand-in for a successful restart
                if b.is_open() {
                    b.reset();
                }
            }
            prop_assert_eq!(opened_signals, expected);
            prop_assert_eq!(opened_signals, b.snapshot().times_opened);
        }
    }
}
