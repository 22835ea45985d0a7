//! Stacked cache backends with read promotion.
//!
//! Reads walk the tiers nearest-to-client first; a hit in a lower tier is
//! copied back up into every tier above it so the next read stops earlier.
//! Writes go to exactly one configured writer tier; deletes broadcast.

use super::TileStore;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::tile::{StoredTile, TileData, TileId};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MultiTierStore {
    name: String,
    tiers: Vec<Arc<dyn TileStore>>,
    write_tier: usize,
}

impl std::fmt::Debug for MultiTierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTierStore")
            .field("name", &self.name)
            .field("write_tier", &self.write_tier)
            .finish_non_exhaustive()
    }
}

impl MultiTierStore {
    /// Compose `tiers` (nearest-to-client first), each with an optional
    /// explicit `write` flag.
    ///
    /// Exactly one tier may carry `write=true`. When none does, the last
    /// tier without an explicit `write=false` becomes the writer. An empty
    /// tier list, duplicate write flags, or no writable tier at all are
    /// configuration errors.
    pub fn new(
        name: impl Into<String>,
        tiers: Vec<(Arc<dyn TileStore>, Option<bool>)>,
    ) -> Result<Self> {
        let name = name.into();
        if tiers.is_empty() {
            return Err(Error::BadRequest(format!(
                "multitier cache \"{name}\" does not reference any child caches"
            )));
        }

        let mut explicit_writer: Option<usize> = None;
        let mut default_writer: Option<usize> = None;
        for (i, (_, write)) in tiers.iter().enumerate() {
            match write {
                Some(true) => {
                    if explicit_writer.is_some() {
                        return Err(Error::BadRequest(format!(
                            "multitier cache \"{name}\" has write set to true on more \
                             than one child cache"
                        )));
                    }
                    explicit_writer = Some(i);
                }
                None => default_writer = Some(i),
                Some(false) => {}
            }
        }

        let write_tier = explicit_writer.or(default_writer).ok_or_else(|| {
            Error::BadRequest(format!(
                "multitier cache \"{name}\" has no child cache configured as writable"
            ))
        })?;

        Ok(Self {
            name,
            tiers: tiers.into_iter().map(|(store, _)| store).collect(),
            write_tier,
        })
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn write_tier_index(&self) -> usize {
        self.write_tier
    }
}

#[async_trait::async_trait]
impl TileStore for MultiTierStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, ctx: &RequestContext, tile: &TileId) -> bool {
        for tier in &self.tiers {
            if tier.exists(ctx, tile).await {
                return true;
            }
        }
        false
    }

    async fn get(&self, ctx: &RequestContext, tile: &TileId) -> Result<Option<StoredTile>> {
        for (k, tier) in self.tiers.iter().enumerate() {
            match tier.get(ctx, tile).await? {
                Some(stored) => {
                    if k > 0 {
                        debug!(cache = self.name, tier = tier.name(), tile = ?tile,
                            "tile served from secondary tier");
                        // Copy into the tiers above, nearest-to-client last.
                        // A failed promotion only costs the next read a tier.
                        for upper in self.tiers[..k].iter().rev() {
                            if let Err(e) = upper.set(ctx, tile, &stored.data).await {
                                warn!(cache = self.name, tier = upper.name(), error = %e,
                                    "tile promotion failed");
                            } else {
                                debug!(cache = self.name, tier = upper.name(), tile = ?tile,
                                    "tile promoted");
                            }
                        }
                    }
                    return Ok(Some(stored));
                }
                None => continue,
            }
        }
        Ok(None)
    }

    async fn set(&self, ctx: &RequestContext, tile: &TileId, data: &TileData) -> Result<()> {
        self.tiers[self.write_tier].set(ctx, tile, data).await
    }

    async fn multi_set(&self, ctx: &RequestContext, tiles: &[(TileId, TileData)]) -> Result<()> {
        self.tiers[self.write_tier].multi_set(ctx, tiles).await
    }

    async fn delete(&self, ctx: &RequestContext, tile: &TileId) -> Result<()> {
        for tier in &self.tiers {
            if let Err(e) = tier.delete(ctx, tile).await {
                warn!(cache = self.name, tier = tier.name(), error = %e,
                    "tile delete failed in one tier");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::Configuration;
    use crate::pool::ConnectionPool;

    fn ctx() -> RequestContext {
        RequestContext::new(
            Arc::new(Configuration::new()),
            Arc::new(ConnectionPool::with_defaults()),
        )
    }

    fn tile() -> TileId {
        TileId::new("l", "g", 4, 5, 3)
    }

    fn data(tag: &[u8]) -> TileData {
        TileData::new(tag.to_vec(), "image/png")
    }

    /// Store whose every operation fails, for failure-path tests.
    struct BrokenStore;

    #[async_trait::async_trait]
    impl TileStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn exists(&self, _ctx: &RequestContext, _tile: &TileId) -> bool {
            false
        }
        async fn get(&self, _ctx: &RequestContext, _tile: &TileId) -> Result<Option<StoredTile>> {
            Err(Error::Internal("backend down".into()))
        }
        async fn set(&self, _ctx: &RequestContext, _tile: &TileId, _data: &TileData) -> Result<()> {
            Err(Error::Internal("backend down".into()))
        }
        async fn delete(&self, _ctx: &RequestContext, _tile: &TileId) -> Result<()> {
            Err(Error::Internal("backend down".into()))
        }
    }

    fn two_tier() -> (Arc<MemoryStore>, Arc<MemoryStore>, MultiTierStore) {
        let front = Arc::new(MemoryStore::new("front", 1 << 20));
        let back = Arc::new(MemoryStore::new("back", 1 << 20));
        let stack = MultiTierStore::new(
            "stack",
            vec![(front.clone() as _, Some(false)), (back.clone() as _, None)],
        )
        .unwrap();
        (front, back, stack)
    }

    #[test]
    fn test_empty_tier_list_is_rejected() {
        let err = MultiTierStore::new("m", Vec::new()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_two_explicit_writers_rejected() {
        let a = Arc::new(MemoryStore::new("a", 1024)) as Arc<dyn TileStore>;
        let b = Arc::new(MemoryStore::new("b", 1024)) as Arc<dyn TileStore>;
        let err = MultiTierStore::new("m", vec![(a, Some(true)), (b, Some(true))]).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_all_readonly_tiers_rejected() {
        let a = Arc::new(MemoryStore::new("a", 1024)) as Arc<dyn TileStore>;
        let err = MultiTierStore::new("m", vec![(a, Some(false))]).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_default_writer_is_last_writable() {
        let a = Arc::new(MemoryStore::new("a", 1024)) as Arc<dyn TileStore>;
        let b = Arc::new(MemoryStore::new("b", 1024)) as Arc<dyn TileStore>;
        let c = Arc::new(MemoryStore::new("c", 1024)) as Arc<dyn TileStore>;
        let stack = MultiTierStore::new("m", vec![(a, None), (b, None), (c, Some(false))]).unwrap();
        assert_eq!(stack.write_tier_index(), 1);
    }

    #[test]
    fn test_explicit_writer_wins() {
        let a = Arc::new(MemoryStore::new("a", 1024)) as Arc<dyn TileStore>;
        let b = Arc::new(MemoryStore::new("b", 1024)) as Arc<dyn TileStore>;
        let stack = MultiTierStore::new("m", vec![(a, Some(true)), (b, None)]).unwrap();
        assert_eq!(stack.write_tier_index(), 0);
    }

    #[tokio::test]
    async fn test_set_goes_to_writer_tier_only() {
        let (front, back, stack) = two_tier();
        let ctx = ctx();

        stack.set(&ctx, &tile(), &data(b"payload")).await.unwrap();
        assert!(!front.exists(&ctx, &tile()).await);
        assert!(back.exists(&ctx, &tile()).await);
    }

    #[tokio::test]
    async fn test_get_promotes_into_upper_tiers() {
        let (front, back, stack) = two_tier();
        let ctx = ctx();

        back.set(&ctx, &tile(), &data(b"payload")).await.unwrap();
        assert!(!front.exists(&ctx, &tile()).await);

        let stored = stack.get(&ctx, &tile()).await.unwrap().unwrap();
        assert_eq!(stored.data.bytes.as_ref(), b"payload");

        // The hit was copied into the front tier.
        let front_copy = front.get(&ctx, &tile()).await.unwrap().unwrap();
        assert_eq!(front_copy.data.bytes.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_front_hit_skips_lower_tiers() {
        let (front, back, stack) = two_tier();
        let ctx = ctx();

        front.set(&ctx, &tile(), &data(b"front")).await.unwrap();
        back.set(&ctx, &tile(), &data(b"back")).await.unwrap();

        let stored = stack.get(&ctx, &tile()).await.unwrap().unwrap();
        assert_eq!(stored.data.bytes.as_ref(), b"front");
    }

    #[tokio::test]
    async fn test_all_miss_is_none() {
        let (_, _, stack) = two_tier();
        assert!(stack.get(&ctx(), &tile()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tier_failure_surfaces() {
        let back = Arc::new(MemoryStore::new("back", 1024)) as Arc<dyn TileStore>;
        let stack =
            MultiTierStore::new("m", vec![(Arc::new(BrokenStore) as _, Some(false)), (back, None)])
                .unwrap();
        assert!(stack.get(&ctx(), &tile()).await.is_err());
    }

    #[tokio::test]
    async fn test_promotion_failure_is_swallowed() {
        let back = Arc::new(MemoryStore::new("back", 1024));
        let stack = MultiTierStore::new(
            "m",
            vec![
                (Arc::new(PromoteRejecting) as _, Some(false)),
                (back.clone() as _, None),
            ],
        )
        .unwrap();
        let ctx = ctx();

        back.set(&ctx, &tile(), &data(b"payload")).await.unwrap();
        // The front tier rejects the promotion write, but the read succeeds.
        let stored = stack.get(&ctx, &tile()).await.unwrap().unwrap();
        assert_eq!(stored.data.bytes.as_ref(), b"payload");
    }

    /// Misses on read, errors on write: exercises promotion failure.
    struct PromoteRejecting;

    #[async_trait::async_trait]
    impl TileStore for PromoteRejecting {
        fn name(&self) -> &str {
            "promote-rejecting"
        }
        async fn exists(&self, _ctx: &RequestContext, _tile: &TileId) -> bool {
            false
        }
        async fn get(&self, _ctx: &RequestContext, _tile: &TileId) -> Result<Option<StoredTile>> {
            Ok(None)
        }
        async fn set(&self, _ctx: &RequestContext, _tile: &TileId, _data: &TileData) -> Result<()> {
            Err(Error::Internal("no writes".into()))
        }
        async fn delete(&self, _ctx: &RequestContext, _tile: &TileId) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delete_broadcasts_and_swallows_errors() {
        let back = Arc::new(MemoryStore::new("back", 1024));
        let stack = MultiTierStore::new(
            "m",
            vec![
                (Arc::new(BrokenStore) as _, Some(false)),
                (back.clone() as _, None),
            ],
        )
        .unwrap();
        let ctx = ctx();

        back.set(&ctx, &tile(), &data(b"payload")).await.unwrap();
        stack.delete(&ctx, &tile()).await.unwrap();
        assert!(!back.exists(&ctx, &tile()).await);
    }

    #[tokio::test]
    async fn test_exists_any_tier() {
        let (front, back, stack) = two_tier();
        let ctx = ctx();

        assert!(!stack.exists(&ctx, &tile()).await);
        back.set(&ctx, &tile(), &data(b"x")).await.unwrap();
        assert!(stack.exists(&ctx, &tile()).await);
        front.set(&ctx, &tile(), &data(b"x")).await.unwrap();
        assert!(stack.exists(&ctx, &tile()).await);
    }

    #[tokio::test]
    async fn test_three_tier_promotion_fills_all_upper_tiers() {
        let t0 = Arc::new(MemoryStore::new("t0", 1 << 20));
        let t1 = Arc::new(MemoryStore::new("t1", 1 << 20));
        let t2 = Arc::new(MemoryStore::new("t2", 1 << 20));
        let stack = MultiTierStore::new(
            "m",
            vec![
                (t0.clone() as _, Some(false)),
                (t1.clone() as _, Some(false)),
                (t2.clone() as _, None),
            ],
        )
        .unwrap();
        let ctx = ctx();

        t2.set(&ctx, &tile(), &data(b"deep")).await.unwrap();
        stack.get(&ctx, &tile()).await.unwrap().unwrap();

        assert!(t0.exists(&ctx, &tile()).await);
        assert!(t1.exists(&ctx, &tile()).await);
    }
}
