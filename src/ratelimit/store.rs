//! Keyed storage for token buckets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::bucket::TokenBucket;

/// The buckets belonging to one limiter, indexed by key.
///
/// Lookup-or-create goes through the map's entry API, which holds the shard
/// lock across the lookup and the insert, so concurrent first calls for the
/// same key all end up with the same bucket. Callers receive an `Arc` and
/// run the refill-and-take outside the map lock.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl BucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the bucket for `key`, creating it with `create` if absent.
    ///
    /// Returns the bucket and whether this call created it.
    pub fn get_or_create<F>(&self, key: &str, create: F) -> (Arc<TokenBucket>, bool)
    where
        F: FnOnce() -> TokenBucket,
    {
        if let Some(bucket) = self.buckets.get(key) {
            return (Arc::clone(bucket.value()), false);
        }

        let mut created = false;
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(create())
            })
            .value()
            .clone();

        (bucket, created)
    }

    /// Fetch the bucket for `key` without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<TokenBucket>> {
        self.buckets.get(key).map(|b| Arc::clone(b.value()))
    }

    /// Remove the bucket for `key`. Returns whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    /// Remove every bucket idle for longer than `threshold` as of `now`.
    ///
    /// Returns the number of buckets removed. A caller already holding an
    /// evicted bucket can still finish its take against it; the next lookup
    /// for that key builds a fresh one.
    pub fn evict_idle(&self, now: Instant, threshold: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) <= threshold);
        before.saturating_sub(self.buckets.len())
    }

    /// Whether a bucket exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the store holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Remove all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_get_or_create_creates_once() {
        let store = BucketStore::new();
        let now = Instant::now();

        let (first, created) = store.get_or_create("a", || TokenBucket::new(1, 5, now));
        assert!(created);

        let (second, created) = store.get_or_create("a", || TokenBucket::new(1, 5, now));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = BucketStore::new();
        let now = Instant::now();
        store.get_or_create("a", || TokenBucket::new(1, 5, now));

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_idle_only_removes_stale() {
        let store = BucketStore::new();
        let start = Instant::now();
        store.get_or_create("old", || TokenBucket::new(1, 5, start));
        store.get_or_create("new", || {
            TokenBucket::new(1, 5, start + Duration::from_secs(500))
        });

        let now = start + Duration::from_secs(601);
        let evicted = store.evict_idle(now, Duration::from_secs(600));

        assert_eq!(evicted, 1);
        assert!(!store.contains("old"));
        assert!(store.contains("new"));
    }

    #[test]
    fn test_evict_idle_keeps_bucket_at_threshold() {
        let store = BucketStore::new();
        let start = Instant::now();
        store.get_or_create("k", || TokenBucket::new(1, 5, start));

        let evicted = store.evict_idle(start + Duration::from_secs(600), Duration::from_secs(600));
        assert_eq!(evicted, 0);
        assert!(store.contains("k"));
    }

    #[test]
    fn test_orphaned_bucket_still_usable() {
        let store = BucketStore::new();
        let now = Instant::now();
        let (held, _) = store.get_or_create("k", || TokenBucket::new(1, 2, now));

        store.remove("k");
        assert!(held.try_take(now));

        let (fresh, created) = store.get_or_create("k", || TokenBucket::new(1, 2, now));
        assert!(created);
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert_eq!(fresh.tokens(), 2);
    }

    #[test]
    fn test_concurrent_first_access_yields_one_bucket() {
        let store = Arc::new(BucketStore::new());
        let barrier = Arc::new(Barrier::new(16));
        let now = Instant::now();
        let mut handles = vec![];

        for _ in 0..16 {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                store.get_or_create("k", || TokenBucket::new(1, 5, now))
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let creators = results.iter().filter(|(_, created)| *created).count();
        assert_eq!(creators, 1);
        assert!(results.iter().all(|(b, _)| Arc::ptr_eq(b, &results[0].0)));
        assert_eq!(store.len(), 1);
    }
}
