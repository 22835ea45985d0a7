//! Pre-populate a tileset's cache by walking the tile pyramid.

use super::{open, parse_extent_arg, resolve, tile_range};
use crate::error::CliError;
use std::sync::Arc;
use tilecache::pipeline;
use tilecache::tile::TileId;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct SeedArgs {
    pub config: String,
    pub tileset: String,
    pub grid: Option<String>,
    pub min_zoom: usize,
    pub max_zoom: usize,
    pub extent: Option<String>,
    pub parallel: usize,
}

pub async fn run(args: SeedArgs) -> Result<(), CliError> {
    if args.min_zoom > args.max_zoom {
        return Err(CliError::Usage(
            "--min-zoom must not exceed --max-zoom".into(),
        ));
    }
    let (configuration, ctx) = open(&args.config)?;
    let (tileset, grid) = resolve(&configuration, &args.tileset, args.grid.as_deref())?;
    if tileset.read_only {
        return Err(CliError::Usage(format!(
            "tileset \"{}\" is read-only and cannot be seeded",
            tileset.name
        )));
    }
    let extent = args.extent.as_deref().map(parse_extent_arg).transpose()?;
    let parallel = args.parallel.max(1);
    let dimensions = tileset.resolve_dimensions(&[]).map_err(CliError::Engine)?;

    let mut seeded = 0u64;
    let mut failed = 0u64;
    for z in args.min_zoom..=args.max_zoom {
        let (xs, ys) = tile_range(&grid, z, extent.as_ref())?;
        info!(
            tileset = %tileset.name,
            z,
            tiles = (xs.end() - xs.start() + 1) as u64 * (ys.end() - ys.start() + 1) as u64,
            "seeding level"
        );

        let mut workers: JoinSet<Result<(), (TileId, tilecache::Error)>> = JoinSet::new();
        for y in ys.clone() {
            for x in xs.clone() {
                let mut tile = TileId::new(tileset.name.clone(), grid.name.clone(), x, y, z);
                tile.dimensions = dimensions.clone();
                let ctx = ctx.clone();
                let tileset = Arc::clone(tileset);

                while workers.len() >= parallel {
                    join_one(&mut workers, &mut seeded, &mut failed).await;
                }
                workers.spawn(async move {
                    pipeline::fetch_tile(&ctx, &tileset, &tile)
                        .await
                        .map(|_| ())
                        .map_err(|e| (tile, e))
                });
            }
        }
        while !workers.is_empty() {
            join_one(&mut workers, &mut seeded, &mut failed).await;
        }
    }

    info!(seeded, failed, "seeding finished");
    if failed > 0 {
        return Err(CliError::Engine(tilecache::Error::Internal(format!(
            "{failed} tiles failed to seed"
        ))));
    }
    Ok(())
}

async fn join_one(
    workers: &mut JoinSet<Result<(), (TileId, tilecache::Error)>>,
    seeded: &mut u64,
    failed: &mut u64,
) {
    match workers.join_next().await {
        Some(Ok(Ok(()))) => *seeded += 1,
        Some(Ok(Err((tile, e)))) => {
            warn!(tile = ?tile, error = %e, "tile failed to seed");
            *failed += 1;
        }
        Some(Err(join_err)) => {
            warn!(error = %join_err, "seed worker panicked");
            *failed += 1;
        }
        None => {}
    }
}
