//! Named limiters and factories for feature-specific guards.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use super::backend::AdmissionControl;
use super::clock::{Clock, SystemClock};
use super::guard::{Guard, DEFAULT_RETRY_AFTER};
use super::key::KeyStrategy;
use super::limiter::{Limiter, Policy};
use crate::config::LimitsConfig;

pub const GLOBAL: &str = "global";
pub const API: &str = "api";
pub const LOGIN: &str = "login";
pub const UPLOAD: &str = "upload";

/// The process-wide set of limiters.
///
/// Built once during startup and handed out as `Arc<Registry>`; every
/// named limiter exists as soon as construction returns. Ad-hoc limiters
/// built through the factories belong to their caller, but can be handed
/// back with [`Registry::register`] so the reaper sweeps them too.
pub struct Registry {
    global: Arc<Limiter>,
    api: Arc<Limiter>,
    login: Arc<Limiter>,
    upload: Arc<Limiter>,
    /// Ad-hoc limiters opted into reaping
    registered: RwLock<Vec<Arc<Limiter>>>,
    clock: Arc<dyn Clock>,
    retry_after: Duration,
}

impl Registry {
    /// Build the named limiters from `limits` on the system clock.
    pub fn new(limits: &LimitsConfig) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    /// Build the named limiters from `limits`, reading time from `clock`.
    pub fn with_clock(limits: &LimitsConfig, clock: Arc<dyn Clock>) -> Self {
        let build = |name: &str, policy: Policy| {
            Arc::new(Limiter::with_clock(name, policy, Arc::clone(&clock)))
        };

        let registry = Self {
            global: build(GLOBAL, limits.global),
            api: build(API, limits.api),
            login: build(LOGIN, limits.login),
            upload: build(UPLOAD, limits.upload),
            registered: RwLock::new(Vec::new()),
            clock: Arc::clone(&clock),
            retry_after: DEFAULT_RETRY_AFTER,
        };

        info!(
            global = ?limits.global,
            api = ?limits.api,
            login = ?limits.login,
            upload = ?limits.upload,
            "Limiter registry initialized"
        );

        registry
    }

    /// Use `retry_after` as the hint on every guard this registry builds.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn global(&self) -> &Arc<Limiter> {
        &self.global
    }

    pub fn api(&self) -> &Arc<Limiter> {
        &self.api
    }

    pub fn login(&self) -> &Arc<Limiter> {
        &self.login
    }

    pub fn upload(&self) -> &Arc<Limiter> {
        &self.upload
    }

    /// Look up a named or registered limiter.
    pub fn get(&self, name: &str) -> Option<Arc<Limiter>> {
        match name {
            GLOBAL => Some(Arc::clone(&self.global)),
            API => Some(Arc::clone(&self.api)),
            LOGIN => Some(Arc::clone(&self.login)),
            UPLOAD => Some(Arc::clone(&self.upload)),
            _ => self
                .registered
                .read()
                .iter()
                .find(|l| l.name() == name)
                .cloned(),
        }
    }

    /// Every limiter the reaper should sweep: the named four, then the
    /// registered ones.
    pub fn limiters(&self) -> Vec<Arc<Limiter>> {
        let mut all = vec![
            Arc::clone(&self.global),
            Arc::clone(&self.api),
            Arc::clone(&self.login),
            Arc::clone(&self.upload),
        ];
        all.extend(self.registered.read().iter().cloned());
        all
    }

    /// Opt an ad-hoc limiter into idle eviction.
    pub fn register(&self, limiter: Arc<Limiter>) {
        info!(limiter = %limiter.name(), policy = ?limiter.policy(), "Registering limiter");
        self.registered.write().push(limiter);
    }

    /// Guard for all traffic, keyed by client address.
    pub fn global_guard(&self) -> Guard {
        self.guard(&self.global, KeyStrategy::ClientAddress)
    }

    /// Guard for API traffic, keyed by client address and route.
    pub fn api_guard(&self) -> Guard {
        self.guard(&self.api, KeyStrategy::ClientRoute)
    }

    /// Guard for authentication attempts.
    pub fn login_guard(&self) -> Guard {
        self.guard(&self.login, KeyStrategy::Login)
    }

    /// Guard for uploads, keyed by user when authenticated.
    pub fn upload_guard(&self) -> Guard {
        self.guard(&self.upload, KeyStrategy::Upload)
    }

    /// A fresh limiter keyed by authenticated user, falling back to address.
    pub fn per_user(&self, rate: u64, capacity: u64) -> Guard {
        self.custom("per-user", Policy::new(rate, capacity), KeyStrategy::User)
    }

    /// A fresh limiter keyed by client address.
    pub fn per_ip(&self, rate: u64, capacity: u64) -> Guard {
        self.custom("per-ip", Policy::new(rate, capacity), KeyStrategy::ClientAddress)
    }

    /// A fresh limiter keyed by method and path, shared by all clients.
    pub fn per_endpoint(&self, rate: u64, capacity: u64) -> Guard {
        self.custom("per-endpoint", Policy::new(rate, capacity), KeyStrategy::Endpoint)
    }

    /// A fresh limiter with any policy and key strategy.
    ///
    /// The limiter is not registered and is dropped with the guard.
    pub fn custom(&self, name: &str, policy: Policy, keys: KeyStrategy) -> Guard {
        let limiter = self.limiter(name, policy);
        self.guard(&limiter, keys)
    }

    /// A fresh, unregistered limiter on this registry's clock.
    ///
    /// Pass it to [`Registry::register`] to have idle buckets reaped, and
    /// to [`Registry::guard`] to bind a key strategy.
    pub fn limiter(&self, name: &str, policy: Policy) -> Arc<Limiter> {
        Arc::new(Limiter::with_clock(name, policy, Arc::clone(&self.clock)))
    }

    /// Bind `limiter` to `keys` with this registry's retry hint.
    pub fn guard(&self, limiter: &Arc<Limiter>, keys: KeyStrategy) -> Guard {
        Guard::new(Arc::clone(limiter) as Arc<dyn AdmissionControl>, keys)
            .with_retry_after(self.retry_after)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("global", &self.global)
            .field("api", &self.api)
            .field("login", &self.login)
            .field("upload", &self.upload)
            .field("registered", &self.registered.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::key::RequestContext;

    fn registry() -> (Registry, ManualClock) {
        let clock = ManualClock::new();
        let registry = Registry::with_clock(&LimitsConfig::default(), Arc::new(clock.clone()));
        (registry, clock)
    }

    #[test]
    fn test_named_limiters_use_default_policies() {
        let (registry, _) = registry();
        assert_eq!(registry.global().policy(), Policy::new(100, 200));
        assert_eq!(registry.api().policy(), Policy::new(50, 100));
        assert_eq!(registry.login().policy(), Policy::new(5, 10));
        assert_eq!(registry.upload().policy(), Policy::new(10, 20));
    }

    #[test]
    fn test_get_by_name() {
        let (registry, _) = registry();
        assert!(Arc::ptr_eq(&registry.get("login").unwrap(), registry.login()));
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_register_makes_limiter_visible() {
        let (registry, _) = registry();
        assert_eq!(registry.limiters().len(), 4);

        let custom = registry.limiter("reports", Policy::new(1, 1));
        registry.register(Arc::clone(&custom));

        assert_eq!(registry.limiters().len(), 5);
        assert!(Arc::ptr_eq(&registry.get("reports").unwrap(), &custom));

        let guard = registry.guard(&custom, KeyStrategy::User);
        let ctx = RequestContext::new("1.2.3.4", "GET", "/reports").with_user(3);
        assert!(guard.check(&ctx).is_admitted());
        assert_eq!(custom.tokens("user:3"), Some(0));
    }

    #[test]
    fn test_login_guard_exhausts_after_capacity() {
        let (registry, _) = registry();
        let guard = registry.login_guard();
        let ctx = RequestContext::new("1.2.3.4", "POST", "/api/login");

        for _ in 0..10 {
            assert!(guard.check(&ctx).is_admitted());
        }
        let admission = guard.check(&ctx);
        assert_eq!(admission.rejection().unwrap().limit, 10);
        assert_eq!(registry.login().tokens("login:1.2.3.4"), Some(0));
    }

    #[test]
    fn test_guards_share_named_limiter_state() {
        let (registry, _) = registry();
        let ctx = RequestContext::new("1.2.3.4", "GET", "/");

        registry.global_guard().check(&ctx);
        registry.global_guard().check(&ctx);
        assert_eq!(registry.global().tokens("1.2.3.4"), Some(198));
    }

    #[test]
    fn test_api_guard_keys_by_route() {
        let (registry, _) = registry();
        let guard = registry.api_guard();

        guard.check(&RequestContext::new("1.2.3.4", "GET", "/a"));
        guard.check(&RequestContext::new("1.2.3.4", "GET", "/b"));
        assert_eq!(registry.api().bucket_count(), 2);
    }

    #[test]
    fn test_factories_build_independent_limiters() {
        let (registry, _) = registry();
        let first = registry.per_endpoint(1, 1);
        let second = registry.per_endpoint(1, 1);
        let ctx = RequestContext::new("1.2.3.4", "GET", "/export");

        assert!(first.check(&ctx).is_admitted());
        assert!(!first.check(&ctx).is_admitted());
        assert!(second.check(&ctx).is_admitted());

        // Endpoint keys ignore the client
        let other = RequestContext::new("5.6.7.8", "GET", "/export");
        assert!(!first.check(&other).is_admitted());
    }

    #[test]
    fn test_per_user_and_per_ip() {
        let (registry, _) = registry();
        let per_user = registry.per_user(1, 1);
        let per_ip = registry.per_ip(1, 1);

        let alice = RequestContext::new("1.2.3.4", "GET", "/").with_user(1);
        let bob = RequestContext::new("1.2.3.4", "GET", "/").with_user(2);

        assert!(per_user.check(&alice).is_admitted());
        assert!(per_user.check(&bob).is_admitted());

        assert!(per_ip.check(&alice).is_admitted());
        assert!(!per_ip.check(&bob).is_admitted());
    }

    #[test]
    fn test_retry_after_propagates_to_guards() {
        let (registry, _) = registry();
        let registry = registry.with_retry_after(Duration::from_secs(15));
        let guard = registry.per_ip(1, 1);
        let ctx = RequestContext::new("1.2.3.4", "GET", "/");

        guard.check(&ctx);
        let admission = guard.check(&ctx);
        assert_eq!(admission.rejection().unwrap().retry_after, Duration::from_secs(15));
    }
}
