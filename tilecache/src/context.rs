//! Per-request context threaded through the engine.
//!
//! Carries the handles an operation needs (parsed configuration, connection
//! pool) plus the inbound request environment. Cloning is cheap: sub-work
//! spawned for one request clones the context and drops it independently.

use crate::config::Configuration;
use crate::pool::ConnectionPool;
use std::collections::HashMap;
use std::sync::Arc;

/// Request-scoped view of the engine.
#[derive(Clone)]
pub struct RequestContext {
    config: Arc<Configuration>,
    pool: Arc<ConnectionPool>,
    headers_in: Arc<HashMap<String, String>>,
    supports_redirects: bool,
}

impl RequestContext {
    pub fn new(config: Arc<Configuration>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            config,
            pool,
            headers_in: Arc::new(HashMap::new()),
            supports_redirects: false,
        }
    }

    /// Attach the inbound request headers. Header names are lowercased so
    /// lookups are case-insensitive.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers_in = Arc::new(
            headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        );
        self
    }

    pub fn with_redirect_support(mut self, supported: bool) -> Self {
        self.supports_redirects = supported;
        self
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Case-insensitive inbound header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers_in
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn supports_redirects(&self) -> bool {
        self.supports_redirects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RequestContext {
        RequestContext::new(
            Arc::new(Configuration::new()),
            Arc::new(ConnectionPool::with_defaults()),
        )
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("If-Modified-Since".to_string(), "x".to_string());
        let ctx = context().with_headers(headers);

        assert_eq!(ctx.header("if-modified-since"), Some("x"));
        assert_eq!(ctx.header("IF-MODIFIED-SINCE"), Some("x"));
        assert_eq!(ctx.header("host"), None);
    }

    #[test]
    fn test_clone_shares_configuration() {
        let ctx = context();
        let child = ctx.clone();
        assert!(Arc::ptr_eq(ctx.config(), child.config()));
        assert!(Arc::ptr_eq(ctx.pool(), child.pool()));
    }

    #[test]
    fn test_redirect_support_flag() {
        let ctx = context();
        assert!(!ctx.supports_redirects());
        let ctx = ctx.with_redirect_support(true);
        assert!(ctx.supports_redirects());
    }
}
