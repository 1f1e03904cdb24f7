//! Admission contract shared by limiter implementations.

/// Trait for per-key admission control.
///
/// This is the seam the request layer programs against: pick a limiter,
/// derive a key, call `allow`. Implementations must be safe to call from
/// many threads at once.
pub trait AdmissionControl: Send + Sync {
    /// Try to admit one unit of work under `key`.
    fn allow(&self, key: &str) -> bool;

    /// Forget all throttling history for `key`.
    fn reset(&self, key: &str);

    /// Advisory limit reported to rejected callers (the burst capacity).
    fn limit(&self) -> u64;

    /// Name used in logs and rejection metadata.
    fn name(&self) -> &str;
}
