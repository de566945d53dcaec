//! Clock abstraction for dependency-injected time (C1).
//!
//! The engine must never call a wall-clock API directly; every instant it
//! needs comes from a [`ClockSource`]. Tests inject [`FakeClock`] and advance
//! it explicitly instead of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over the system clock for dependency injection.
///
/// Second-level precision, matching the `utc_expiry`/`utc_creation` columns
/// of the cache entry (seconds since the Unix epoch).
pub trait ClockSource: Send + Sync {
    /// Returns the current time as seconds since the Unix epoch.
    fn now_utc(&self) -> i64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_utc(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_secs() as i64
    }
}

/// Test clock that starts at a fixed instant and only moves when told to.
///
/// Allows deterministic assertions about expiry without sleeping real time.
#[derive(Debug)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    /// Creates a fake clock pinned at `start` (seconds since Unix epoch).
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Advances the clock by `seconds` and returns the new instant.
    pub fn advance(&self, seconds: i64) -> i64 {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, instant: i64) {
        self.now.store(instant, Ordering::SeqCst);
    }
}

impl ClockSource for FakeClock {
    fn now_utc(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_starts_at_given_instant() {
        let clock = FakeClock::new(1_577_836_800);
        assert_eq!(clock.now_utc(), 1_577_836_800);
    }

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new(0);
        assert_eq!(clock.advance(600), 600);
        assert_eq!(clock.now_utc(), 600);
        assert_eq!(clock.advance(60), 660);
    }

    #[test]
    fn fake_clock_set_jumps_to_instant() {
        let clock = FakeClock::new(0);
        clock.set(1_000);
        assert_eq!(clock.now_utc(), 1_000);
    }

    #[test]
    fn system_clock_is_plausible() {
        let clock = SystemClock;
        assert!(clock.now_utc() > 1_600_000_000);
    }
}
