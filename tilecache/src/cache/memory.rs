//! In-memory tile store with size-bounded LRU eviction.
//!
//! Typically the top tier of a multi-tier stack: small, fast, and populated
//! mostly by read promotion.

use super::TileStore;
use crate::context::RequestContext;
use crate::error::Result;
use crate::tile::{StoredTile, TileData, TileId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

#[derive(Clone)]
struct Entry {
    data: TileData,
    mtime: SystemTime,
    last_accessed: Instant,
}

/// Counters exposed for diagnostics and the stats log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct MemoryStore {
    name: String,
    entries: Mutex<HashMap<TileId, Entry>>,
    max_size_bytes: usize,
    current_size_bytes: Mutex<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryStore {
    /// Default capacity: 256 MB.
    pub const DEFAULT_MAX_SIZE: usize = 256 * 1024 * 1024;

    pub fn new(name: impl Into<String>, max_size_bytes: usize) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            max_size_bytes,
            current_size_bytes: Mutex::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().expect("memory store poisoned").len()
    }

    pub fn size_bytes(&self) -> usize {
        *self
            .current_size_bytes
            .lock()
            .expect("memory store poisoned")
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().expect("memory store poisoned").clear();
        *self
            .current_size_bytes
            .lock()
            .expect("memory store poisoned") = 0;
    }

    /// Evict least-recently-used entries until `required` bytes fit.
    fn evict_for(&self, required: usize) {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        let mut size = self
            .current_size_bytes
            .lock()
            .expect("memory store poisoned");
        if *size + required <= self.max_size_bytes {
            return;
        }
        let target = self.max_size_bytes.saturating_sub(required);

        let mut by_age: Vec<(TileId, Instant, usize)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed, v.data.bytes.len()))
            .collect();
        by_age.sort_by_key(|(_, accessed, _)| *accessed);

        for (key, _, entry_size) in by_age {
            if *size <= target {
                break;
            }
            entries.remove(&key);
            *size = size.saturating_sub(entry_size);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait::async_trait]
impl TileStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, _ctx: &RequestContext, tile: &TileId) -> bool {
        self.entries
            .lock()
            .expect("memory store poisoned")
            .contains_key(tile)
    }

    async fn get(&self, _ctx: &RequestContext, tile: &TileId) -> Result<Option<StoredTile>> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        match entries.get_mut(tile) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(StoredTile::new(entry.data.clone(), entry.mtime)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, _ctx: &RequestContext, tile: &TileId, data: &TileData) -> Result<()> {
        self.evict_for(data.bytes.len());

        let mut entries = self.entries.lock().expect("memory store poisoned");
        let mut size = self
            .current_size_bytes
            .lock()
            .expect("memory store poisoned");
        if let Some(old) = entries.insert(
            tile.clone(),
            Entry {
                data: data.clone(),
                mtime: SystemTime::now(),
                last_accessed: Instant::now(),
            },
        ) {
            *size = size.saturating_sub(old.data.bytes.len());
        }
        *size += data.bytes.len();
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, tile: &TileId) -> Result<()> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        if let Some(old) = entries.remove(tile) {
            let mut size = self
                .current_size_bytes
                .lock()
                .expect("memory store poisoned");
            *size = size.saturating_sub(old.data.bytes.len());
        }
        Ok(())
    }
}
