//! Purge cached tiles for a tileset.

use super::{open, parse_extent_arg, resolve, tile_range};
use crate::error::CliError;
use tilecache::tile::TileId;
use tracing::{info, warn};

pub struct CleanArgs {
    pub config: String,
    pub tileset: String,
    pub grid: Option<String>,
    pub min_zoom: usize,
    pub max_zoom: usize,
    pub extent: Option<String>,
}

pub async fn run(args: CleanArgs) -> Result<(), CliError> {
    if args.min_zoom > args.max_zoom {
        return Err(CliError::Usage(
            "--min-zoom must not exceed --max-zoom".into(),
        ));
    }
    let (configuration, ctx) = open(&args.config)?;
    let (tileset, grid) = resolve(&configuration, &args.tileset, args.grid.as_deref())?;
    let cache = tileset.cache.as_ref().ok_or_else(|| {
        CliError::Usage(format!("tileset \"{}\" has no cache to clean", tileset.name))
    })?;
    let extent = args.extent.as_deref().map(parse_extent_arg).transpose()?;
    let dimensions = tileset.resolve_dimensions(&[]).map_err(CliError::Engine)?;

    let mut deleted = 0u64;
    for z in args.min_zoom..=args.max_zoom {
        let (xs, ys) = tile_range(&grid, z, extent.as_ref())?;
        info!(tileset = %tileset.name, z, "cleaning level");
        for y in ys {
            for x in xs.clone() {
                let mut tile = TileId::new(tileset.name.clone(), grid.name.clone(), x, y, z);
                tile.dimensions = dimensions.clone();
                // Deletion is broadcast by multitier caches; per-tile
                // failures are logged and the walk continues.
                if let Err(e) = cache.delete(&ctx, &tile).await {
                    warn!(tile = ?tile, error = %e, "failed to delete tile");
                } else {
                    deleted += 1;
                }
            }
        }
    }

    info!(deleted, "cleaning finished");
    Ok(())
}
