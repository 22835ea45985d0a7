//! Cache backends and the store abstraction they share.
//!
//! Every backend implements the same five operations over encoded tiles;
//! the [`MultiTierStore`] composes backends into a stack with read
//! promotion and a single writer tier.

mod blank;
mod disk;
mod memcache;
mod memory;
mod multitier;

pub use blank::{decode_sentinel, encode_if_blank, expand_sentinel, BLANK_TILE_MIME};
pub use disk::DiskStore;
pub use memcache::MemcacheStore;
pub use memory::MemoryStore;
pub use multitier::MultiTierStore;

use crate::context::RequestContext;
use crate::error::Result;
use crate::tile::{StoredTile, TileData, TileId};

/// Uniform contract over heterogeneous tile storage.
///
/// `get` distinguishes three outcomes: `Ok(Some(_))` is a hit, `Ok(None)`
/// means the tile is definitively absent (render it), and `Err(_)` means
/// the backend itself is unhealthy (surfaces as a 500).
#[async_trait::async_trait]
pub trait TileStore: Send + Sync {
    /// Configured backend name.
    fn name(&self) -> &str;

    /// Whether the tile is present, without fetching its payload.
    async fn exists(&self, ctx: &RequestContext, tile: &TileId) -> bool;

    /// Fetch a tile's encoded payload and modification time.
    async fn get(&self, ctx: &RequestContext, tile: &TileId) -> Result<Option<StoredTile>>;

    /// Store a tile's encoded payload.
    async fn set(&self, ctx: &RequestContext, tile: &TileId, data: &TileData) -> Result<()>;

    /// Store several tiles at once; the default just iterates [`Self::set`].
    async fn multi_set(&self, ctx: &RequestContext, tiles: &[(TileId, TileData)]) -> Result<()> {
        for (tile, data) in tiles {
            self.set(ctx, tile, data).await?;
        }
        Ok(())
    }

    /// Remove a tile. Removing an absent tile is not an error.
    async fn delete(&self, ctx: &RequestContext, tile: &TileId) -> Result<()>;
}
