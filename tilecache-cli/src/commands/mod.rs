//! Command implementations.

pub mod check;
pub mod clean;
pub mod seed;

use crate::error::CliError;
use std::sync::Arc;
use tilecache::config::{self, Configuration};
use tilecache::context::RequestContext;
use tilecache::grid::{Extent, Grid};
use tilecache::pool::ConnectionPool;
use tilecache::tileset::Tileset;

/// Load a configuration file and build a request context for batch work.
pub fn open(config_path: &str) -> Result<(Arc<Configuration>, RequestContext), CliError> {
    let configuration = Arc::new(
        config::load(std::path::Path::new(config_path))
            .map_err(|e| CliError::Config(e.to_string()))?,
    );
    let ctx = RequestContext::new(
        configuration.clone(),
        Arc::new(ConnectionPool::with_defaults()),
    );
    Ok((configuration, ctx))
}

/// Resolve a tileset plus the grid to walk.
pub fn resolve<'c>(
    configuration: &'c Configuration,
    tileset: &str,
    grid: Option<&str>,
) -> Result<(&'c Arc<Tileset>, Arc<Grid>), CliError> {
    let tileset = configuration
        .tileset(tileset)
        .ok_or_else(|| CliError::Usage(format!("unknown tileset \"{tileset}\"")))?;
    let link = tileset
        .grid_link(grid)
        .map_err(|e| CliError::Usage(e.to_string()))?;
    Ok((tileset, link.grid.clone()))
}

/// Tile columns and rows covering `extent` at zoom `z` (whole level when
/// no extent is given).
pub fn tile_range(
    grid: &Grid,
    z: usize,
    extent: Option<&Extent>,
) -> Result<(std::ops::RangeInclusive<u32>, std::ops::RangeInclusive<u32>), CliError> {
    let level = grid
        .level(z)
        .map_err(|e| CliError::Usage(e.to_string()))?;
    let Some(extent) = extent else {
        return Ok((0..=level.max_x - 1, 0..=level.max_y - 1));
    };

    let res = level.resolution;
    let tw = res * grid.tile_width as f64;
    let th = res * grid.tile_height as f64;
    let clamp_x = |v: f64| (v.max(0.0) as u32).min(level.max_x - 1);
    let clamp_y = |v: f64| (v.max(0.0) as u32).min(level.max_y - 1);

    let x0 = clamp_x(((extent.minx - grid.extent.minx) / tw).floor());
    let x1 = clamp_x(((extent.maxx - grid.extent.minx) / tw).ceil() - 1.0);
    let y0 = clamp_y(((extent.miny - grid.extent.miny) / th).floor());
    let y1 = clamp_y(((extent.maxy - grid.extent.miny) / th).ceil() - 1.0);
    Ok((x0..=x1, y0..=y1))
}

/// Parse a `minx,miny,maxx,maxy` argument.
pub fn parse_extent_arg(value: &str) -> Result<Extent, CliError> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| CliError::Usage(format!("invalid extent \"{value}\"")))?;
    match parts.as_slice() {
        [minx, miny, maxx, maxy] if minx < maxx && miny < maxy => {
            Ok(Extent::new(*minx, *miny, *maxx, *maxy))
        }
        _ => Err(CliError::Usage(format!("invalid extent \"{value}\""))),
    }
}
