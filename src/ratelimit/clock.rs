//! Time sources for token refill and idle tracking.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A source of monotonic instants.
///
/// Limiters read the current time through this trait so that refill and
/// eviction can be driven by simulated time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The process clock, backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Cloning yields a handle to the same underlying time, so a test can keep
/// one handle and give another to a limiter.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the present instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a clock frozen at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `by`.
    ///
    /// A step past the platform's instant range leaves the clock at its
    /// current reading.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        if let Some(later) = current.checked_add(by) {
            *current = later;
        }
    }

    /// Move the clock backward by `by`, saturating at the start of the
    /// platform's instant range.
    ///
    /// Used to exercise non-monotonic readings.
    pub fn rewind(&self, by: Duration) {
        let mut current = self.current.lock();
        if let Some(earlier) = current.checked_sub(by) {
            *current = earlier;
        }
    }

    /// Pin the clock to `instant`.
    pub fn set(&self, instant: Instant) {
        *self.current.lock() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_frozen() {
        let clock = ManualClock::new();
        let first = clock.now();
        assert_eq!(clock.now(), first);
    }

    #[test]
    fn test_manual_clock_advance_and_rewind() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - start, Duration::from_secs(3));

        clock.rewind(Duration::from_secs(1));
        assert_eq!(clock.now() - start, Duration::from_secs(2));
    }

    #[test]
    fn test_manual_clock_advance_out_of_range_does_not_panic() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now() - start, Duration::from_secs(1));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), handle.now());
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
