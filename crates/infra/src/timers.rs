//! Ownership of every scheduled background task.
//!
//! Periodic loops (generation, validation, retraining, health checks, load
//! sampling) are spawned tasks registered here under a name. Cancelling
//! aborts the task and forgets it, so `pending()` is zero once everything
//! has been cancelled.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Shortest period or timeout any scheduled loop runs with. Zero periods
/// are raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: Mutex<BTreeMap<&'static str, JoinHandle<()>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` under `name`, aborting whatever was registered there before.
    pub fn register(&self, name: &'static str, handle: JoinHandle<()>) {
        if let Some(previous) = self.timers.lock().unwrap().insert(name, handle) {
            previous.abort();
            debug!(timer = name, "replaced running timer");
        }
    }

    /// Abort and forget one timer. Returns whether it was registered.
    pub fn cancel(&self, name: &'static str) -> bool {
        match self.timers.lock().unwrap().remove(name) {
            Some(handle) => {
                handle.abort();
                debug!(timer = name, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Abort and forget every timer; returns how many were live.
    pub fn cancel_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.timers.lock().unwrap());
        let mut live = 0;
        for (name, handle) in drained {
            if !handle.is_finished() {
                live += 1;
            }
            handle.abort();
            debug!(timer = name, "timer cancelled");
        }
        live
    }

    /// Registered timers whose task is still running.
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .unwrap()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.timers.lock().unwrap().keys().copied().collect()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            for handle in timers.values() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn forever() -> JoinHandle<()> {
        tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        })
    }

    #[tokio::test]
    async fn cancel_all_leaves_nothing_pending() {
        let timers = TimerRegistry::new();
        timers.register("a", forever());
        timers.register("b", forever());
        assert_eq!(timers.pending(), 2);

        assert_eq!(timers.cancel_all(), 2);
        assert_eq!(timers.pending(), 0);
        assert!(timers.names().is_empty());
    }

    #[tokio::test]
    async fn re_registering_aborts_the_previous_task() {
        let timers = TimerRegistry::new();
        let first = forever();
        let first_abort = first.abort_handle();
        timers.register("tick", first);
        timers.register("tick", forever());

        for _ in 0..10 {
            if first_abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(first_abort.is_finished());
        assert_eq!(timers.pending(), 1);
        assert_eq!(timers.names(), vec!["tick"]);
        assert!(timers.cancel("tick"));
        assert!(!timers.cancel("tick"));
    }
}
