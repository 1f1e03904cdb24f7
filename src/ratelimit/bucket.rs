//! Token bucket implementation.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A single key's throttling state.
///
/// Holds up to `capacity` whole tokens and regains `rate` tokens per second.
/// Refill happens lazily inside [`TokenBucket::try_take`]; the whole
/// refill-and-take sequence runs under the bucket's own lock, so calls for
/// one key are linearizable and never spend the same token twice.
///
/// Fractional credit is not carried between calls: every call moves
/// `last_refill` to `now`, so time that did not add up to a whole token is
/// dropped.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum burst size
    capacity: u64,
    /// Tokens regained per second
    rate: u64,
    /// Mutable token accounting
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new(rate: u64, capacity: u64, now: Instant) -> Self {
        Self {
            capacity,
            rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Refill from the time elapsed since the last call, then try to spend
    /// one token.
    ///
    /// Returns `true` if a token was spent. A `now` earlier than the last
    /// refill counts as zero elapsed time and leaves the refill instant where
    /// it was.
    pub fn try_take(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        let refill = whole_tokens(elapsed, self.rate);
        state.tokens = state.tokens.saturating_add(refill).min(self.capacity);

        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens currently held, without refilling.
    pub fn tokens(&self) -> u64 {
        self.state.lock().tokens
    }

    /// The instant of the most recent refill.
    pub fn last_refill(&self) -> Instant {
        self.state.lock().last_refill
    }

    /// How long the bucket has gone untouched as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill())
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens regained per second.
    pub fn rate(&self) -> u64 {
        self.rate
    }
}

/// Whole tokens earned over `elapsed` at `rate` per second, rounded down.
///
/// Saturates at `u64::MAX`.
fn whole_tokens(elapsed: Duration, rate: u64) -> u64 {
    elapsed
        .as_nanos()
        .checked_mul(u128::from(rate))
        .map_or(u64::MAX, |scaled| {
            u64::try_from(scaled / NANOS_PER_SEC).unwrap_or(u64::MAX)
        })
}
