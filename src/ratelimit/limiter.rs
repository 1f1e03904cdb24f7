//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::AdmissionControl;
use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};
use super::store::BucketStore;

/// A fixed `(rate, capacity)` throttling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Tokens regained per second
    pub rate: u64,
    /// Maximum burst size
    pub capacity: u64,
}

impl Policy {
    /// Create a new policy.
    pub const fn new(rate: u64, capacity: u64) -> Self {
        Self { rate, capacity }
    }
}

/// A named token-bucket limiter.
///
/// Each distinct key gets its own bucket, created full on first use. The
/// policy is fixed at construction. This struct is thread-safe and is
/// normally shared behind an `Arc`.
pub struct Limiter {
    /// Name used in logs and rejection metadata
    name: String,
    /// Fixed policy applied to every bucket
    policy: Policy,
    /// Buckets indexed by key
    store: BucketStore,
    /// Source of refill time
    clock: Arc<dyn Clock>,
}

impl Limiter {
    /// Create a limiter on the system clock.
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self::with_clock(name, policy, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(name: impl Into<String>, policy: Policy, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            policy,
            store: BucketStore::new(),
            clock,
        }
    }

    /// Try to admit one unit of work under `key`.
    ///
    /// Returns `true` if admitted. A rejected call is final; nothing is
    /// queued.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();

        let (bucket, created) = self.store.get_or_create(key, || {
            TokenBucket::new(self.policy.rate, self.policy.capacity, now)
        });

        if created {
            debug!(
                limiter = %self.name,
                key = %key,
                rate = self.policy.rate,
                capacity = self.policy.capacity,
                "Creating new token bucket"
            );
        }

        let admitted = bucket.try_take(now);

        trace!(
            limiter = %self.name,
            key = %key,
            admitted = admitted,
            "Checked rate limit"
        );

        if !admitted {
            debug!(limiter = %self.name, key = %key, "Rate limit exceeded");
        }

        admitted
    }

    /// Drop the bucket for `key` so the next call starts from a full one.
    ///
    /// Resetting an unknown key is a no-op.
    pub fn reset(&self, key: &str) {
        if self.store.remove(key) {
            debug!(limiter = %self.name, key = %key, "Reset token bucket");
        }
    }

    /// Evict buckets idle for longer than `threshold`, using this limiter's
    /// clock. Returns the number evicted.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        let evicted = self.store.evict_idle(self.clock.now(), threshold);
        if evicted > 0 {
            debug!(limiter = %self.name, evicted = evicted, "Evicted idle token buckets");
        }
        evicted
    }

    /// Tokens currently held under `key`, or `None` if no bucket exists.
    ///
    /// Does not refill.
    pub fn tokens(&self, key: &str) -> Option<u64> {
        self.store.get(key).map(|b| b.tokens())
    }

    /// Whether a bucket exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// Remove all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// The limiter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The limiter's policy.
    pub fn policy(&self) -> Policy {
        self.policy
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("buckets", &self.store.len())
            .finish()
    }
}

impl AdmissionControl for Limiter {
    fn allow(&self, key: &str) -> bool {
        Limiter::allow(self, key)
    }

    fn reset(&self, key: &str) {
        Limiter::reset(self, key)
    }

    fn limit(&self) -> u64 {
        self.policy.capacity
    }

    fn name(&self) -> &str {
        &self.name
    }
}
