//! Fetch-or-render pipeline.
//!
//! The read path is a single-writer-many-readers protocol: a cache miss
//! takes a named lock scoped to the whole metatile, so concurrent requests
//! for any tile of that block coalesce behind one render. Losing the lock
//! race means someone else rendered; the loser re-reads the cache instead
//! of rendering again.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::grid::GridOrigin;
use crate::image_ops;
use crate::locker::lock_or_wait;
use crate::source::RenderJob;
use crate::tile::{StoredTile, TileData, TileId};
use crate::tileset::Tileset;
use std::time::SystemTime;
use tracing::debug;

/// Lock resource name for the metatile containing `tile`.
///
/// All tiles of one metatile (and one dimension combination) map to the
/// same resource so their renders serialize onto a single worker.
pub fn lock_resource(tileset: &Tileset, tile: &TileId) -> String {
    let (meta_x, meta_y) = tile.metatile_origin(tileset.metatile.0, tileset.metatile.1);
    format!(
        "{}/{}/{}/{}/{}{}",
        tile.tileset,
        tile.grid,
        tile.z,
        meta_x,
        meta_y,
        tile.dimension_signature()
    )
}

/// Serve a tile from cache, rendering it (under the metatile lock) on miss.
pub async fn fetch_tile(
    ctx: &RequestContext,
    tileset: &Tileset,
    tile: &TileId,
) -> Result<StoredTile> {
    let Some(cache) = tileset.cache.as_ref() else {
        // No cache configured: render on every request.
        return render_metatile(ctx, tileset, tile, false).await;
    };

    if let Some(stored) = cache.get(ctx, tile).await? {
        return Ok(stored);
    }

    if tileset.read_only {
        return Err(Error::NotFound(format!(
            "tile ({},{},{}) not found in read-only tileset \"{}\"",
            tile.x, tile.y, tile.z, tileset.name
        )));
    }
    if tileset.source.is_none() {
        return Err(Error::NotFound(format!(
            "tileset \"{}\" has no source to render tile ({},{},{})",
            tileset.name, tile.x, tile.y, tile.z
        )));
    }

    let locker = ctx.config().locker();
    let resource = lock_resource(tileset, tile);
    match lock_or_wait(locker.as_ref(), &resource).await? {
        Some(token) => {
            let rendered = render_metatile(ctx, tileset, tile, true).await;
            if let Err(e) = locker.release(token).await {
                debug!(resource = %resource, error = %e, "lock release failed");
            }
            rendered
        }
        None => {
            // Another worker rendered while we waited; the coalescing read.
            if let Some(stored) = cache.get(ctx, tile).await? {
                return Ok(stored);
            }
            // Still missing (stale lock, or the winner failed). One
            // unprotected render is permitted.
            debug!(resource = %resource, "cache still empty after lock wait, rendering");
            render_metatile(ctx, tileset, tile, true).await
        }
    }
}

/// Render the metatile containing `tile`, optionally write every child tile
/// through the cache, and return the requested tile.
async fn render_metatile(
    ctx: &RequestContext,
    tileset: &Tileset,
    tile: &TileId,
    store: bool,
) -> Result<StoredTile> {
    let source = tileset.source.as_ref().ok_or_else(|| {
        Error::NotFound(format!("tileset \"{}\" has no source", tileset.name))
    })?;
    let link = tileset.grid_link(Some(tile.grid.as_str()))?;
    let grid = &link.grid;
    let level = grid.level(tile.z)?;

    let (meta_w, meta_h) = tileset.metatile;
    let (meta_x, meta_y) = tile.metatile_origin(meta_w, meta_h);
    // Clip the block at the grid edge so we never render phantom tiles.
    let tiles_x = meta_w.min(level.max_x.saturating_sub(meta_x));
    let tiles_y = meta_h.min(level.max_y.saturating_sub(meta_y));
    if tiles_x == 0 || tiles_y == 0 {
        return Err(Error::NotFound(format!(
            "tile ({},{},{}) is outside grid \"{}\"",
            tile.x, tile.y, tile.z, grid.name
        )));
    }

    let buffer = tileset.metabuffer;
    let extent = grid.metatile_extent(meta_x, meta_y, tile.z, meta_w, meta_h, buffer)?;
    let job = RenderJob {
        extent,
        srs: grid.srs.clone(),
        width: tiles_x * grid.tile_width + 2 * buffer,
        height: tiles_y * grid.tile_height + 2 * buffer,
        format: tileset.format,
        dimensions: tile.dimensions.clone(),
    };

    debug!(tileset = %tileset.name, z = tile.z, meta_x, meta_y, tiles_x, tiles_y,
        "rendering metatile");
    let rendered = source.render(ctx, &job).await?;
    let meta_img = image_ops::decode(&rendered.bytes)?;
    let parts = image_ops::split_metatile(
        &meta_img,
        tiles_x,
        tiles_y,
        grid.tile_width,
        grid.tile_height,
        buffer,
        grid.origin == GridOrigin::BottomLeft,
    )?;

    let mut batch: Vec<(TileId, TileData)> = Vec::with_capacity(parts.len());
    let mut requested: Option<TileData> = None;
    for ((dx, dy), mut img) in parts {
        if let Some(watermark) = &tileset.watermark {
            image_ops::overlay_watermark(&mut img, watermark);
        }
        let data = image_ops::encode(&img, tileset.format)?;
        let id = TileId {
            tileset: tile.tileset.clone(),
            grid: tile.grid.clone(),
            x: meta_x + dx,
            y: meta_y + dy,
            z: tile.z,
            dimensions: tile.dimensions.clone(),
        };
        if id == *tile {
            requested = Some(data.clone());
        }
        batch.push((id, data));
    }

    if store {
        if let Some(cache) = tileset.cache.as_ref() {
            cache.multi_set(ctx, &batch).await?;
        }
    }

    let data = requested.ok_or_else(|| {
        Error::Internal(format!(
            "rendered metatile at ({meta_x},{meta_y}) does not cover tile ({},{})",
            tile.x, tile.y
        ))
    })?;
    Ok(StoredTile::new(data, SystemTime::now()))
}
