//! Parsed per-alias configuration.

use crate::cache::TileStore;
use crate::grid::Grid;
use crate::locker::{DiskLocker, Locker};
use crate::proxy::ProxyRule;
use crate::service::Service;
use crate::source::TileSource;
use crate::tileset::Tileset;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered service front-end and whether requests may reach it.
pub struct ServiceEntry {
    pub service: Arc<dyn Service>,
    pub enabled: bool,
}

/// Everything one alias serves: grids, caches, sources, tilesets, service
/// front-ends, forwarding rules, and the locker that serializes renders.
///
/// Built once at boot by the configuration parser and read-only afterwards.
pub struct Configuration {
    pub grids: HashMap<String, Arc<Grid>>,
    pub caches: HashMap<String, Arc<dyn TileStore>>,
    pub sources: HashMap<String, Arc<dyn TileSource>>,
    pub tilesets: HashMap<String, Arc<Tileset>>,
    pub services: HashMap<String, ServiceEntry>,
    pub proxy_rules: Vec<Arc<ProxyRule>>,
    pub locker: Arc<dyn Locker>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration").finish_non_exhaustive()
    }
}

impl Configuration {
    /// An empty configuration carrying the built-in grids and a disk
    /// locker on the system temporary directory.
    pub fn new() -> Self {
        Self {
            grids: super::defaults::builtin_grids(),
            caches: HashMap::new(),
            sources: HashMap::new(),
            tilesets: HashMap::new(),
            services: HashMap::new(),
            proxy_rules: Vec::new(),
            locker: Arc::new(DiskLocker::new(std::env::temp_dir())),
        }
    }

    pub fn grid(&self, name: &str) -> Option<&Arc<Grid>> {
        self.grids.get(name)
    }

    pub fn cache(&self, name: &str) -> Option<&Arc<dyn TileStore>> {
        self.caches.get(name)
    }

    pub fn source(&self, name: &str) -> Option<&Arc<dyn TileSource>> {
        self.sources.get(name)
    }

    pub fn tileset(&self, name: &str) -> Option<&Arc<Tileset>> {
        self.tilesets.get(name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    pub fn proxy_rule(&self, name: &str) -> Option<&Arc<ProxyRule>> {
        self.proxy_rules.iter().find(|r| r.name() == name)
    }

    pub fn locker(&self) -> &Arc<dyn Locker> {
        &self.locker
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
