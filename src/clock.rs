//! Monotonic time for cooldowns and backoff.
//!
//! Every cooldown, interval, and backoff comparison in the engine goes
//! through a `Clock` instead of the wall clock, so NTP steps cannot stretch
//! or shrink a suppression window. `MonotonicClock` is the production
//! implementation; `ManualClock` lets tests drive time explicitly.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic clock seam.
///
/// `now()` is the elapsed time since an arbitrary fixed origin; only
/// differences between two `now()` readings are meaningful.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Production clock backed by `Instant`.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Test clock. `sleep` advances time instead of blocking, so backoff
/// sequences run instantly while remaining observable through `now()`.
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.sleep(Duration::from_secs(2));
        clock.advance(Duration::from_millis(500));

        assert_eq!(clock.now(), Duration::from_millis(2500));
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
