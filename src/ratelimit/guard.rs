//! Request admission guard and rejection metadata.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::backend::AdmissionControl;
use super::key::{KeyStrategy, RequestContext};

/// Retry hint sent with every rejection unless configured otherwise.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// HTTP status code for "too many requests".
pub const TOO_MANY_REQUESTS: u16 = 429;

const REJECTION_MESSAGE: &str = "too many requests, please retry later";

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The unit of work may proceed.
    Admitted,
    /// The unit of work must be turned away.
    Rejected(Rejection),
}

impl Admission {
    /// Whether the unit of work was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// The rejection details, if rejected.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Admission::Admitted => None,
            Admission::Rejected(r) => Some(r),
        }
    }
}

/// Advisory metadata for a rejected unit of work.
///
/// The retry hint is a fixed delay; it does not track when the bucket will
/// next hold a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Limiter that rejected the request
    pub limiter: String,
    /// The limiter's burst capacity
    pub limit: u64,
    /// Always zero: the request was just rejected
    pub remaining: u64,
    /// How long the caller should wait before retrying
    pub retry_after: Duration,
}

impl Rejection {
    /// Response headers for a "too many requests" reply.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("Retry-After", self.retry_after.as_secs().to_string()),
        ]
    }

    /// Response body for a "too many requests" reply.
    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            code: TOO_MANY_REQUESTS,
            message: REJECTION_MESSAGE.to_string(),
            retry_after: self.retry_after.as_secs(),
        }
    }
}

/// Serializable body of a "too many requests" reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionBody {
    pub code: u16,
    pub message: String,
    pub retry_after: u64,
}

/// Binds a limiter to a key strategy.
///
/// This is what the request layer holds per route or middleware slot.
#[derive(Clone)]
pub struct Guard {
    limiter: Arc<dyn AdmissionControl>,
    keys: KeyStrategy,
    retry_after: Duration,
}

impl Guard {
    /// Create a guard with the default retry hint.
    pub fn new(limiter: Arc<dyn AdmissionControl>, keys: KeyStrategy) -> Self {
        Self {
            limiter,
            keys,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Override the retry hint sent with rejections.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Derive the key for `ctx` and check it against the limiter.
    pub fn check(&self, ctx: &RequestContext) -> Admission {
        let key = self.keys.derive(ctx);

        if self.limiter.allow(&key) {
            return Admission::Admitted;
        }

        debug!(
            limiter = %self.limiter.name(),
            key = %key,
            request = %ctx,
            "Rejecting request"
        );

        Admission::Rejected(Rejection {
            limiter: self.limiter.name().to_string(),
            limit: self.limiter.limit(),
            remaining: 0,
            retry_after: self.retry_after,
        })
    }

    /// Clear the throttling history for the key `ctx` maps to.
    pub fn reset(&self, ctx: &RequestContext) {
        self.limiter.reset(&self.keys.derive(ctx));
    }

    /// The key strategy in use.
    pub fn keys(&self) -> &KeyStrategy {
        &self.keys
    }

    /// The guarded limiter.
    pub fn limiter(&self) -> &Arc<dyn AdmissionControl> {
        &self.limiter
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("limiter", &self.limiter.name())
            .field("keys", &self.keys)
            .field("retry_after", &self.retry_after)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::limiter::{Limiter, Policy};

    fn guard(capacity: u64, keys: KeyStrategy) -> Guard {
        let limiter = Limiter::with_clock("upload", Policy::new(1, capacity), Arc::new(ManualClock::new()));
        Guard::new(Arc::new(limiter), keys)
    }

    #[test]
    fn test_guard_admits_then_rejects() {
        let guard = guard(2, KeyStrategy::ClientAddress);
        let ctx = RequestContext::new("1.2.3.4", "GET", "/");

        assert!(guard.check(&ctx).is_admitted());
        assert!(guard.check(&ctx).is_admitted());

        let admission = guard.check(&ctx);
        let rejection = admission.rejection().unwrap();
        assert_eq!(rejection.limiter, "upload");
        assert_eq!(rejection.limit, 2);
        assert_eq!(rejection.remaining, 0);
        assert_eq!(rejection.retry_after, DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn test_guard_uses_key_strategy() {
        let guard = guard(1, KeyStrategy::Upload);
        let anon = RequestContext::new("1.2.3.4", "POST", "/upload");
        let user = anon.clone().with_user(9);

        assert!(guard.check(&anon).is_admitted());
        assert!(!guard.check(&anon).is_admitted());

        // Same address, but the authenticated key is separate
        assert!(guard.check(&user).is_admitted());
    }

    #[test]
    fn test_guard_reset() {
        let guard = guard(1, KeyStrategy::Login);
        let ctx = RequestContext::new("1.2.3.4", "POST", "/login");

        assert!(guard.check(&ctx).is_admitted());
        assert!(!guard.check(&ctx).is_admitted());
        guard.reset(&ctx);
        assert!(guard.check(&ctx).is_admitted());
    }

    #[test]
    fn test_rejection_headers_and_body() {
        let rejection = Rejection {
            limiter: "login".to_string(),
            limit: 10,
            remaining: 0,
            retry_after: Duration::from_secs(60),
        };

        let headers = rejection.headers();
        assert_eq!(headers[0], ("X-RateLimit-Limit", "10".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "0".to_string()));
        assert_eq!(headers[2], ("Retry-After", "60".to_string()));

        let body = serde_json::to_value(rejection.body()).unwrap();
        assert_eq!(body["code"], 429);
        assert_eq!(body["retry_after"], 60);
    }

    #[test]
    fn test_custom_retry_after() {
        let guard = guard(0, KeyStrategy::ClientAddress).with_retry_after(Duration::from_secs(5));
        let ctx = RequestContext::new("1.2.3.4", "GET", "/");

        let admission = guard.check(&ctx);
        assert_eq!(admission.rejection().unwrap().retry_after, Duration::from_secs(5));
    }
}
