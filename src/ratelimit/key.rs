//! Limiter key derivation from request context.

use std::fmt;
use std::sync::Arc;

/// What the request layer knows about an inbound unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestContext {
    /// Client address as seen by the request layer
    pub client_addr: String,
    /// Authenticated user, if any
    pub user_id: Option<u64>,
    /// HTTP method
    pub method: String,
    /// Route path
    pub path: String,
}

impl RequestContext {
    /// Create a context for an unauthenticated client.
    pub fn new(
        client_addr: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client_addr: client_addr.into(),
            user_id: None,
            method: method.into(),
            path: path.into(),
        }
    }

    /// Attach an authenticated user.
    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} from {}", self.method, self.path, self.client_addr)?;
        if let Some(user) = self.user_id {
            write!(f, " (user {})", user)?;
        }
        Ok(())
    }
}

/// A caller-supplied key function.
pub type KeyFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// How to compute the limiter key for a request.
#[derive(Clone)]
pub enum KeyStrategy {
    /// `{client_addr}`
    ClientAddress,
    /// `{client_addr}:{path}`
    ClientRoute,
    /// `login:{client_addr}`
    Login,
    /// `upload:user:{id}`, or `upload:ip:{client_addr}` when anonymous
    Upload,
    /// `user:{id}`, or `ip:{client_addr}` when anonymous
    User,
    /// `{method}:{path}`
    Endpoint,
    /// Any other derivation
    Custom(KeyFn),
}

impl KeyStrategy {
    /// Wrap a closure as a key strategy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        KeyStrategy::Custom(Arc::new(f))
    }

    /// Compute the key for `ctx`.
    pub fn derive(&self, ctx: &RequestContext) -> String {
        match self {
            KeyStrategy::ClientAddress => ctx.client_addr.clone(),
            KeyStrategy::ClientRoute => format!("{}:{}", ctx.client_addr, ctx.path),
            KeyStrategy::Login => format!("login:{}", ctx.client_addr),
            KeyStrategy::Upload => match ctx.user_id {
                Some(id) => format!("upload:user:{}", id),
                None => format!("upload:ip:{}", ctx.client_addr),
            },
            KeyStrategy::User => match ctx.user_id {
                Some(id) => format!("user:{}", id),
                None => format!("ip:{}", ctx.client_addr),
            },
            KeyStrategy::Endpoint => format!("{}:{}", ctx.method, ctx.path),
            KeyStrategy::Custom(f) => f(ctx),
        }
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyStrategy::ClientAddress => "ClientAddress",
            KeyStrategy::ClientRoute => "ClientRoute",
            KeyStrategy::Login => "Login",
            KeyStrategy::Upload => "Upload",
            KeyStrategy::User => "User",
            KeyStrategy::Endpoint => "Endpoint",
            KeyStrategy::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymous() -> RequestContext {
        RequestContext::new("1.2.3.4", "POST", "/api/assets")
    }

    #[test]
    fn test_address_keys() {
        let ctx = anonymous();
        assert_eq!(KeyStrategy::ClientAddress.derive(&ctx), "1.2.3.4");
        assert_eq!(KeyStrategy::ClientRoute.derive(&ctx), "1.2.3.4:/api/assets");
        assert_eq!(KeyStrategy::Login.derive(&ctx), "login:1.2.3.4");
    }

    #[test]
    fn test_identity_keys_fall_back_to_address() {
        let ctx = anonymous();
        assert_eq!(KeyStrategy::Upload.derive(&ctx), "upload:ip:1.2.3.4");
        assert_eq!(KeyStrategy::User.derive(&ctx), "ip:1.2.3.4");

        let ctx = ctx.with_user(42);
        assert_eq!(KeyStrategy::Upload.derive(&ctx), "upload:user:42");
        assert_eq!(KeyStrategy::User.derive(&ctx), "user:42");
    }

    #[test]
    fn test_endpoint_key_ignores_client() {
        let a = RequestContext::new("1.1.1.1", "GET", "/health");
        let b = RequestContext::new("2.2.2.2", "GET", "/health");
        assert_eq!(KeyStrategy::Endpoint.derive(&a), "GET:/health");
        assert_eq!(KeyStrategy::Endpoint.derive(&a), KeyStrategy::Endpoint.derive(&b));
    }

    #[test]
    fn test_custom_key() {
        let strategy = KeyStrategy::custom(|ctx| format!("tenant:{}", ctx.path.len()));
        assert_eq!(strategy.derive(&anonymous()), "tenant:11");
        assert_eq!(format!("{:?}", strategy), "Custom");
    }

    #[test]
    fn test_context_display() {
        let ctx = anonymous().with_user(7);
        assert_eq!(ctx.to_string(), "POST /api/assets from 1.2.3.4 (user 7)");
    }
}
