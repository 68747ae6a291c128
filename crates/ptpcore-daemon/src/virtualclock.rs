//! A software clock for running the engine without timestamping hardware.
//!
//! [`VirtualClock`] implements the `ptpcore` clock boundaries:
//! - [`Clock`]: provides `now()`, and
//! - [`SynchronizableClock`]: supports stepping and fine tuning in ppb.
//!
//! The clock keeps a base timestamp captured at a start instant and a tuning value. Calling
//! `now()` returns `base + elapsed * (1 + ppb / 1e9)`. `step()` and `set_tuning()` rebase, so
//! subsequent reads continue from the current value.
//!
//! Elapsed time is measured with `tokio::time::Instant`, so tests running on a paused runtime
//! see deterministic clock readings.

use std::sync::{Mutex, MutexGuard};

use ptpcore::{
    clock::{Clock, SynchronizableClock},
    time::{TimeInterval, TimeStamp},
};
use tokio::time::Instant;

struct State {
    start: Instant,
    base: TimeStamp,
    tuning_ppb: f64,
}

impl State {
    fn now(&self) -> TimeStamp {
        let elapsed = self.start.elapsed().as_nanos() as f64;
        let scaled = elapsed * (1.0 + self.tuning_ppb / 1_000_000_000.0);
        self.base + TimeInterval::from_nanos(scaled as i64)
    }
}

/// A virtual clock with step and frequency tuning support.
pub struct VirtualClock {
    state: Mutex<State>,
}

impl VirtualClock {
    pub fn new(start: TimeStamp) -> Self {
        Self {
            state: Mutex::new(State {
                start: Instant::now(),
                base: start,
                tuning_ppb: 0.0,
            }),
        }
    }

    /// Start from the host's wall clock.
    pub fn from_system_time() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self::new(TimeStamp::new(
            since_epoch.as_secs(),
            since_epoch.subsec_nanos(),
        ))
    }

    /// Current frequency tuning in ppb.
    pub fn tuning_ppb(&self) -> f64 {
        self.lock().tuning_ppb
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> TimeStamp {
        self.lock().now()
    }
}

impl SynchronizableClock for VirtualClock {
    /// Discontinuously set the clock to `to`.
    fn step(&self, to: TimeStamp) {
        let mut state = self.lock();
        state.start = Instant::now();
        state.base = to;
    }

    /// Capture the current time as the new base, then apply the new rate so the clock does not
    /// jump across the adjustment.
    fn set_tuning(&self, ppb: f64) {
        let mut state = self.lock();
        let current = state.now();
        state.start = Instant::now();
        state.base = current;
        state.tuning_ppb = ppb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn virtual_clock_follows_elapsed_time() {
        let clock = VirtualClock::new(TimeStamp::new(10, 0));

        tokio::time::advance(Duration::from_millis(1500)).await;

        assert_eq!(clock.now(), TimeStamp::new(11, 500_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn positive_tuning_runs_fast() {
        let clock = VirtualClock::new(TimeStamp::new(0, 0));
        clock.set_tuning(1_000_000.0);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(clock.now(), TimeStamp::new(1, 1_000_000));
        assert_eq!(clock.tuning_ppb(), 1_000_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tuning_does_not_jump_the_clock() {
        let clock = VirtualClock::new(TimeStamp::new(5, 0));
        tokio::time::advance(Duration::from_millis(200)).await;

        let before = clock.now();
        clock.set_tuning(-500.0);
        let after = clock.now();

        assert_eq!(before, after);
    }

    #[tokio::test(start_paused = true)]
    async fn step_sets_the_base() {
        let clock = VirtualClock::new(TimeStamp::new(0, 0));
        tokio::time::advance(Duration::from_millis(300)).await;

        clock.step(TimeStamp::new(1_000, 0));
        tokio::time::advance(Duration::from_millis(250)).await;

        assert_eq!(clock.now(), TimeStamp::new(1_000, 250_000_000));
    }
}
