//! Alias routing and host-level options.
//!
//! A host registers `(endpoint, configuration)` pairs; inbound URIs are
//! matched against the endpoints in registration order, and the matched
//! suffix becomes the request's path-info. Connection pools are created
//! per worker after the host forks, either shared across all aliases or
//! one per alias.

use crate::config::Configuration;
use crate::pool::{ConnectionPool, PoolConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// An option that knows whether it was explicitly set, so vhost-over-default
/// merging keeps explicit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOption<T> {
    value: T,
    is_set: bool,
}

impl<T: Copy> HostOption<T> {
    fn new(default: T) -> Self {
        Self {
            value: default,
            is_set: false,
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.is_set = true;
    }

    pub fn get(&self) -> T {
        self.value
    }

    pub fn is_set(&self) -> bool {
        self.is_set
    }

    /// Explicit overlay value wins over this one.
    fn merged_with(self, overlay: Self) -> Self {
        if overlay.is_set {
            overlay
        } else {
            self
        }
    }
}

/// Per-host pool sizing and sharing directives.
#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    pub pool_min: HostOption<usize>,
    pub pool_smax: HostOption<usize>,
    pub pool_hmax: HostOption<usize>,
    /// Idle TTL in seconds.
    pub pool_ttl: HostOption<u64>,
    pub pool_sharing: HostOption<bool>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            pool_min: HostOption::new(1),
            pool_smax: HostOption::new(5),
            pool_hmax: HostOption::new(200),
            pool_ttl: HostOption::new(60),
            pool_sharing: HostOption::new(false),
        }
    }
}

impl HostOptions {
    /// Merge virtual-host options over base options: every explicitly-set
    /// vhost value wins, everything else falls back to the base.
    pub fn merged_over(base: &HostOptions, vhost: &HostOptions) -> HostOptions {
        HostOptions {
            pool_min: base.pool_min.merged_with(vhost.pool_min),
            pool_smax: base.pool_smax.merged_with(vhost.pool_smax),
            pool_hmax: base.pool_hmax.merged_with(vhost.pool_hmax),
            pool_ttl: base.pool_ttl.merged_with(vhost.pool_ttl),
            pool_sharing: base.pool_sharing.merged_with(vhost.pool_sharing),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(
            self.pool_min.get(),
            self.pool_smax.get(),
            self.pool_hmax.get(),
            Duration::from_secs(self.pool_ttl.get()),
        )
    }
}

/// One endpoint bound to a parsed configuration.
pub struct AliasEntry {
    pub endpoint: String,
    pub config_file: PathBuf,
    pub config: Arc<Configuration>,
    /// Created by [`HostRouter::init_worker`]; `None` before worker init.
    pub pool: Option<Arc<ConnectionPool>>,
}

/// Ordered alias table plus host options.
#[derive(Default)]
pub struct HostRouter {
    aliases: Vec<AliasEntry>,
    pub options: HostOptions,
}

impl HostRouter {
    pub fn new(options: HostOptions) -> Self {
        Self {
            aliases: Vec::new(),
            options,
        }
    }

    /// Register an alias. Order matters: the first registered match wins.
    pub fn add_alias(
        &mut self,
        endpoint: impl Into<String>,
        config_file: impl Into<PathBuf>,
        config: Arc<Configuration>,
    ) {
        let endpoint = endpoint.into();
        let config_file = config_file.into();
        info!(endpoint = %endpoint, config = %config_file.display(),
            "loaded configuration on endpoint");
        self.aliases.push(AliasEntry {
            endpoint,
            config_file,
            config,
            pool: None,
        });
    }

    pub fn aliases(&self) -> &[AliasEntry] {
        &self.aliases
    }

    /// Per-worker initialization: build the connection pool(s) after the
    /// host forks, one shared pool or one per alias.
    pub fn init_worker(&mut self) {
        let pool_config = self.options.pool_config();
        let sharing = self.options.pool_sharing.get();
        let mut shared: Option<Arc<ConnectionPool>> = None;
        for alias in &mut self.aliases {
            let pool = match shared.clone() {
                Some(pool) if sharing => {
                    debug!(endpoint = %alias.endpoint, "sharing worker connection pool");
                    pool
                }
                _ => {
                    debug!(endpoint = %alias.endpoint,
                        min = pool_config.min, smax = pool_config.smax,
                        hmax = pool_config.hmax,
                        "creating worker connection pool");
                    let pool = Arc::new(ConnectionPool::new(pool_config));
                    if sharing {
                        shared = Some(pool.clone());
                    }
                    pool
                }
            };
            alias.pool = Some(pool);
        }
    }

    /// Find the first alias matching `uri`; returns the entry and the
    /// path-info suffix.
    pub fn route<'a, 'u>(&'a self, uri: &'u str) -> Option<(&'a AliasEntry, &'u str)> {
        if !uri.starts_with('/') {
            return None;
        }
        for alias in &self.aliases {
            if let Some(matched) = alias_matches(uri, &alias.endpoint) {
                return Some((alias, &uri[matched..]));
            }
        }
        None
    }
}

/// Longest-prefix alias match with `/`-run folding.
///
/// Any run of slashes in the alias matches any run in the URI (but at
/// least one), other characters match literally, and an alias that does
/// not end in `/` must stop at a segment boundary. Returns the number of
/// URI characters consumed.
pub fn alias_matches(uri: &str, alias: &str) -> Option<usize> {
    let uri_bytes = uri.as_bytes();
    let alias_bytes = alias.as_bytes();
    let mut u = 0;
    let mut a = 0;

    while a < alias_bytes.len() {
        if alias_bytes[a] == b'/' {
            if u >= uri_bytes.len() || uri_bytes[u] != b'/' {
                return None;
            }
            while a < alias_bytes.len() && alias_bytes[a] == b'/' {
                a += 1;
            }
            while u < uri_bytes.len() && uri_bytes[u] == b'/' {
                u += 1;
            }
        } else {
            if u >= uri_bytes.len() || uri_bytes[u] != alias_bytes[a] {
                return None;
            }
            u += 1;
            a += 1;
        }
    }

    // A non-slash-terminated alias must end on a segment boundary.
    if alias_bytes.last() != Some(&b'/') && u < uri_bytes.len() && uri_bytes[u] != b'/' {
        return None;
    }

    Some(u)
}
