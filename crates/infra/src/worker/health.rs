//! Liveness bookkeeping for the current worker unit.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Whether a unit that last answered at `last_pong` should be declared
/// unresponsive at `now`. The limit is exclusive: silence of exactly
/// `ping_interval + pong_timeout` is still healthy.
pub fn is_unresponsive(
    now: Instant,
    last_pong: Instant,
    ping_interval: Duration,
    pong_timeout: Duration,
) -> bool {
    now.saturating_duration_since(last_pong) > ping_interval + pong_timeout
}

#[derive(Debug)]
pub(crate) struct HealthState {
    ready: AtomicBool,
    last_pong: Mutex<Instant>,
}

impl HealthState {
    pub(crate) fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            last_pong: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn mark_online(&self) {
        *self.last_pong.lock().unwrap() = Instant::now();
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn mark_exited(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub(crate) fn record_pong(&self) {
        *self.last_pong.lock().unwrap() = Instant::now();
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn last_pong(&self) -> Instant {
        *self.last_pong.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_only_strictly_after_the_limit() {
        let ping = Duration::from_secs(5);
        let pong = Duration::from_secs(3);
        let last = Instant::now();

        assert!(!is_unresponsive(last + Duration::from_secs(7), last, ping, pong));
        assert!(!is_unresponsive(last + Duration::from_secs(8), last, ping, pong));
        assert!(is_unresponsive(
            last + Duration::from_millis(8_001),
            last,
            ping,
            pong
        ));
    }

    #[test]
    fn pong_before_now_is_never_negative_silence() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert!(!is_unresponsive(now, later, Duration::ZERO, Duration::ZERO));
    }
}
