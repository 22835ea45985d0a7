//! Memcached tile store.
//!
//! Tile payloads live under template-derived keys; connections are
//! borrowed from the request's connection pool under this cache's name and
//! recycled across requests. Transient command failures are retried on a
//! fresh connection, the broken one being invalidated rather than
//! returned to the pool.

use super::{blank, TileStore};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::memcached::{MemcachedClient, ServerAddr};
use crate::pool::{Connector, PooledConnection};
use crate::tile::{StoredTile, TileData, TileId};
use crate::util::tile_key;
use std::any::Any;
use std::time::SystemTime;
use tracing::warn;

const DEFAULT_KEY_TEMPLATE: &str = "{tileset}/{grid}{dim}/{z}/{x}/{y}";
const RETRIES: usize = 3;

struct MemcacheConnector {
    servers: Vec<ServerAddr>,
}

#[async_trait::async_trait]
impl Connector for MemcacheConnector {
    async fn connect(&self) -> Result<Box<dyn Any + Send>> {
        Ok(Box::new(MemcachedClient::connect(&self.servers).await?))
    }
}

pub struct MemcacheStore {
    name: String,
    key_template: String,
    /// Entry TTL in seconds; 0 keeps tiles until evicted.
    expires: u32,
    detect_blank: bool,
    connector: MemcacheConnector,
}

impl MemcacheStore {
    pub fn new(name: impl Into<String>, servers: Vec<ServerAddr>) -> Self {
        Self {
            name: name.into(),
            key_template: DEFAULT_KEY_TEMPLATE.to_string(),
            expires: 0,
            detect_blank: false,
            connector: MemcacheConnector { servers },
        }
    }

    pub fn with_key_template(mut self, template: impl Into<String>) -> Self {
        self.key_template = template.into();
        self
    }

    pub fn with_expires(mut self, seconds: u32) -> Self {
        self.expires = seconds;
        self
    }

    pub fn with_detect_blank(mut self, enabled: bool) -> Self {
        self.detect_blank = enabled;
        self
    }

    fn key(&self, tile: &TileId) -> String {
        tile_key(tile, &self.key_template, "")
    }

    async fn checkout(&self, ctx: &RequestContext) -> Result<PooledConnection> {
        ctx.pool().get(&self.name, &self.connector).await
    }

    fn client(pc: &mut PooledConnection) -> Result<&mut MemcachedClient> {
        pc.conn_mut::<MemcachedClient>().ok_or_else(|| {
            Error::Internal("memcache cache pooled a foreign connection type".into())
        })
    }

    fn tile_size(ctx: &RequestContext, tile: &TileId) -> (u32, u32) {
        ctx.config()
            .grid(&tile.grid)
            .map(|g| (g.tile_width, g.tile_height))
            .unwrap_or((256, 256))
    }
}

#[async_trait::async_trait]
impl TileStore for MemcacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, ctx: &RequestContext, tile: &TileId) -> bool {
        matches!(self.get(ctx, tile).await, Ok(Some(_)))
    }

    async fn get(&self, ctx: &RequestContext, tile: &TileId) -> Result<Option<StoredTile>> {
        let key = self.key(tile);
        for attempt in 1..=RETRIES {
            let mut pc = self.checkout(ctx).await?;
            match Self::client(&mut pc)?.get(&key).await {
                Ok(value) => {
                    ctx.pool().release(pc);
                    let Some(bytes) = value else { return Ok(None) };

                    if self.detect_blank {
                        if let Some(color) = blank::decode_sentinel(&bytes) {
                            let (w, h) = Self::tile_size(ctx, tile);
                            let mut stored = StoredTile::new(
                                blank::expand_sentinel(color, w, h)?,
                                SystemTime::now(),
                            );
                            stored.nodata = true;
                            return Ok(Some(stored));
                        }
                    }
                    // Entry mtime is not persisted; treat the read as fresh.
                    return Ok(Some(StoredTile::new(
                        TileData::new(bytes, "image/png"),
                        SystemTime::now(),
                    )));
                }
                Err(e) => {
                    warn!(cache = self.name, attempt, key = %key, error = %e,
                        "memcache get failed, retrying on a fresh connection");
                    ctx.pool().invalidate(pc);
                    if attempt == RETRIES {
                        return Err(Error::Internal(format!(
                            "memcache cache \"{}\" failed to get key {key}: {e}",
                            self.name
                        )));
                    }
                }
            }
        }
        unreachable!("retry loop returns before exhausting attempts")
    }

    async fn set(&self, ctx: &RequestContext, tile: &TileId, data: &TileData) -> Result<()> {
        let key = self.key(tile);
        let payload = if self.detect_blank {
            blank::encode_if_blank(data)
        } else {
            None
        };
        let payload = payload.as_ref().unwrap_or(data);

        for attempt in 1..=RETRIES {
            let mut pc = self.checkout(ctx).await?;
            match Self::client(&mut pc)?
                .set(&key, &payload.bytes, self.expires)
                .await
            {
                Ok(()) => {
                    ctx.pool().release(pc);
                    return Ok(());
                }
                Err(e) => {
                    warn!(cache = self.name, attempt, key = %key, error = %e,
                        "memcache set failed, retrying on a fresh connection");
                    ctx.pool().invalidate(pc);
                    if attempt == RETRIES {
                        return Err(Error::Internal(format!(
                            "memcache cache \"{}\" failed to store key {key}: {e}",
                            self.name
                        )));
                    }
                }
            }
        }
        unreachable!("retry loop returns before exhausting attempts")
    }

    async fn multi_set(&self, ctx: &RequestContext, tiles: &[(TileId, TileData)]) -> Result<()> {
        // One pooled connection serves the whole batch.
        let mut pc = self.checkout(ctx).await?;
        for (tile, data) in tiles {
            let key = self.key(tile);
            let payload = if self.detect_blank {
                blank::encode_if_blank(data)
            } else {
                None
            };
            let payload = payload.as_ref().unwrap_or(data);
            if let Err(e) = Self::client(&mut pc)?
                .set(&key, &payload.bytes, self.expires)
                .await
            {
                ctx.pool().invalidate(pc);
                return Err(Error::Internal(format!(
                    "memcache cache \"{}\" failed to store key {key}: {e}",
                    self.name
                )));
            }
        }
        ctx.pool().release(pc);
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, tile: &TileId) -> Result<()> {
        let key = self.key(tile);
        let mut pc = self.checkout(ctx).await?;
        match Self::client(&mut pc)?.delete(&key).await {
            Ok(_existed) => {
                ctx.pool().release(pc);
                Ok(())
            }
            Err(e) => {
                ctx.pool().invalidate(pc);
                Err(Error::Internal(format!(
                    "memcache cache \"{}\" failed to delete key {key}: {e}",
                    self.name
                )))
            }
        }
    }
}
