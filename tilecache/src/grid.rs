//! Tile grid geometry: projections, zoom levels, and extent math.
//!
//! A [`Grid`] describes a pyramid of fixed-size tiles over a projected
//! extent. A [`GridLink`] binds a tileset to a grid, optionally restricting
//! the usable extent and zoom range.

use crate::error::{Error, Result};
use std::sync::Arc;

/// A rectangular extent in grid units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Extent {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    /// Whether `other` is fully contained in this extent.
    pub fn contains(&self, other: &Extent) -> bool {
        other.minx >= self.minx
            && other.miny >= self.miny
            && other.maxx <= self.maxx
            && other.maxy <= self.maxy
    }

    /// Whether the two extents overlap.
    pub fn intersects(&self, other: &Extent) -> bool {
        other.minx < self.maxx
            && other.maxx > self.minx
            && other.miny < self.maxy
            && other.maxy > self.miny
    }
}

/// Where tile (0, 0) sits in the grid extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridOrigin {
    BottomLeft,
    TopLeft,
}

/// One zoom level of a grid pyramid.
#[derive(Debug, Clone)]
pub struct GridLevel {
    /// Ground units per pixel at this level.
    pub resolution: f64,
    /// Number of tile columns.
    pub max_x: u32,
    /// Number of tile rows.
    pub max_y: u32,
}

/// A tile pyramid definition.
#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    /// Spatial reference identifier, e.g. `EPSG:3857`.
    pub srs: String,
    pub extent: Extent,
    pub tile_width: u32,
    pub tile_height: u32,
    pub origin: GridOrigin,
    pub levels: Vec<GridLevel>,
}

impl Grid {
    /// Build a grid from a resolution list, deriving per-level tile counts
    /// from the extent and tile size.
    pub fn from_resolutions(
        name: impl Into<String>,
        srs: impl Into<String>,
        extent: Extent,
        tile_width: u32,
        tile_height: u32,
        origin: GridOrigin,
        resolutions: &[f64],
    ) -> Result<Self> {
        let name = name.into();
        if resolutions.is_empty() {
            return Err(Error::BadRequest(format!(
                "grid \"{name}\" has no resolutions"
            )));
        }
        let width = extent.maxx - extent.minx;
        let height = extent.maxy - extent.miny;
        let levels = resolutions
            .iter()
            .map(|&res| {
                if res <= 0.0 {
                    return Err(Error::BadRequest(format!(
                        "grid \"{name}\" has a non-positive resolution"
                    )));
                }
                Ok(GridLevel {
                    resolution: res,
                    max_x: (width / (res * tile_width as f64)).ceil() as u32,
                    max_y: (height / (res * tile_height as f64)).ceil() as u32,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name,
            srs: srs.into(),
            extent,
            tile_width,
            tile_height,
            origin,
            levels,
        })
    }

    /// The built-in spherical-mercator grid (EPSG:3857, 19 levels).
    pub fn web_mercator() -> Self {
        const M: f64 = 20037508.342789244;
        let mut resolutions = Vec::with_capacity(19);
        let mut res = 2.0 * M / 256.0;
        for _ in 0..19 {
            resolutions.push(res);
            res /= 2.0;
        }
        Self::from_resolutions(
            "webmercator",
            "EPSG:3857",
            Extent::new(-M, -M, M, M),
            256,
            256,
            GridOrigin::BottomLeft,
            &resolutions,
        )
        .expect("builtin grid is valid")
    }

    /// The built-in geodetic grid (EPSG:4326, 18 levels, 2x1 top pyramid).
    pub fn wgs84() -> Self {
        let mut resolutions = Vec::with_capacity(18);
        let mut res = 180.0 / 256.0;
        for _ in 0..18 {
            resolutions.push(res);
            res /= 2.0;
        }
        Self::from_resolutions(
            "wgs84",
            "EPSG:4326",
            Extent::new(-180.0, -90.0, 180.0, 90.0),
            256,
            256,
            GridOrigin::BottomLeft,
            &resolutions,
        )
        .expect("builtin grid is valid")
    }

    /// Zoom level accessor with range validation.
    pub fn level(&self, z: usize) -> Result<&GridLevel> {
        self.levels.get(z).ok_or_else(|| {
            Error::BadRequest(format!(
                "grid \"{}\" has no zoom level {z} (max {})",
                self.name,
                self.levels.len().saturating_sub(1)
            ))
        })
    }

    /// Whether (x, y) addresses a tile inside the level bounds.
    pub fn contains_tile(&self, x: u32, y: u32, z: usize) -> bool {
        match self.levels.get(z) {
            Some(level) => x < level.max_x && y < level.max_y,
            None => false,
        }
    }

    /// Compute the ground extent of one tile.
    pub fn tile_extent(&self, x: u32, y: u32, z: usize) -> Result<Extent> {
        let level = self.level(z)?;
        let res = level.resolution;
        let (x, y) = (x as f64, y as f64);
        let (tw, th) = (self.tile_width as f64, self.tile_height as f64);
        Ok(match self.origin {
            GridOrigin::BottomLeft => Extent {
                minx: self.extent.minx + res * x * tw,
                miny: self.extent.miny + res * y * th,
                maxx: self.extent.minx + res * (x + 1.0) * tw,
                maxy: self.extent.miny + res * (y + 1.0) * th,
            },
            GridOrigin::TopLeft => Extent {
                minx: self.extent.minx + res * x * tw,
                miny: self.extent.maxy - res * (y + 1.0) * th,
                maxx: self.extent.minx + res * (x + 1.0) * tw,
                maxy: self.extent.maxy - res * y * th,
            },
        })
    }

    /// Compute the ground extent of a metatile block.
    ///
    /// `(meta_x, meta_y)` is the lower-left tile of the block; the block is
    /// clipped to the level bounds so edge metatiles do not extend past the
    /// grid, and grown by `buffer` pixels on every side.
    pub fn metatile_extent(
        &self,
        meta_x: u32,
        meta_y: u32,
        z: usize,
        meta_width: u32,
        meta_height: u32,
        buffer: u32,
    ) -> Result<Extent> {
        let level = self.level(z)?;
        let res = level.resolution;
        let clipped_w = meta_width.min(level.max_x.saturating_sub(meta_x));
        let clipped_h = meta_height.min(level.max_y.saturating_sub(meta_y));
        let gbuffer_x = res * buffer as f64;
        let gbuffer_y = res * buffer as f64;
        let gwidth = res * clipped_w as f64 * self.tile_width as f64;
        let gheight = res * clipped_h as f64 * self.tile_height as f64;

        let ll = self.tile_extent(meta_x, meta_y, z)?;
        Ok(match self.origin {
            GridOrigin::BottomLeft => Extent {
                minx: ll.minx - gbuffer_x,
                miny: ll.miny - gbuffer_y,
                maxx: ll.minx + gwidth + gbuffer_x,
                maxy: ll.miny + gheight + gbuffer_y,
            },
            GridOrigin::TopLeft => Extent {
                minx: ll.minx - gbuffer_x,
                maxy: ll.maxy + gbuffer_y,
                maxx: ll.minx + gwidth + gbuffer_x,
                miny: ll.maxy - gheight - gbuffer_y,
            },
        })
    }
}

/// Binding of a tileset to a grid, with optional restrictions.
#[derive(Debug, Clone)]
pub struct GridLink {
    pub grid: Arc<Grid>,
    /// If set, tiles fully outside this extent are not served.
    pub restricted_extent: Option<Extent>,
    pub min_zoom: usize,
    /// Inclusive upper zoom bound.
    pub max_zoom: usize,
}

impl GridLink {
    pub fn new(grid: Arc<Grid>) -> Self {
        let max_zoom = grid.levels.len().saturating_sub(1);
        Self {
            grid,
            restricted_extent: None,
            min_zoom: 0,
            max_zoom,
        }
    }

    /// Whether the given tile is addressable through this link.
    pub fn allows(&self, x: u32, y: u32, z: usize) -> bool {
        if z < self.min_zoom || z > self.max_zoom || !self.grid.contains_tile(x, y, z) {
            return false;
        }
        match (&self.restricted_extent, self.grid.tile_extent(x, y, z)) {
            (Some(restriction), Ok(tile_extent)) => restriction.intersects(&tile_extent),
            (None, _) => true,
            (_, Err(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_mercator_levels() {
        let grid = Grid::web_mercator();
        assert_eq!(grid.levels.len(), 19);
        assert_eq!(grid.levels[0].max_x, 1);
        assert_eq!(grid.levels[0].max_y, 1);
        assert_eq!(grid.levels[3].max_x, 8);
        assert_eq!(grid.levels[3].max_y, 8);
    }

    #[test]
    fn test_wgs84_top_level_is_two_by_one() {
        let grid = Grid::wgs84();
        assert_eq!(grid.levels[0].max_x, 2);
        assert_eq!(grid.levels[0].max_y, 1);
    }

    #[test]
    fn test_tile_extent_bottom_left() {
        let grid = Grid::web_mercator();
        let e = grid.tile_extent(0, 0, 0).unwrap();
        assert!((e.minx - grid.extent.minx).abs() < 1e-6);
        assert!((e.maxx - grid.extent.maxx).abs() < 1e-6);
    }

    #[test]
    fn test_tile_extent_quadrant() {
        let grid = Grid::web_mercator();
        // At z=1 the grid is 2x2; tile (1,1) is the north-east quadrant.
        let e = grid.tile_extent(1, 1, 1).unwrap();
        assert!(e.minx.abs() < 1e-6);
        assert!(e.miny.abs() < 1e-6);
        assert!((e.maxx - grid.extent.maxx).abs() < 1e-6);
        assert!((e.maxy - grid.extent.maxy).abs() < 1e-6);
    }

    #[test]
    fn test_tile_extent_rejects_bad_level() {
        let grid = Grid::web_mercator();
        assert!(grid.tile_extent(0, 0, 99).is_err());
    }

    #[test]
    fn test_metatile_extent_covers_block() {
        let grid = Grid::web_mercator();
        let meta = grid.metatile_extent(0, 0, 3, 2, 2, 0).unwrap();
        let t00 = grid.tile_extent(0, 0, 3).unwrap();
        let t11 = grid.tile_extent(1, 1, 3).unwrap();
        assert!((meta.minx - t00.minx).abs() < 1e-6);
        assert!((meta.maxx - t11.maxx).abs() < 1e-6);
        assert!((meta.maxy - t11.maxy).abs() < 1e-6);
    }

    #[test]
    fn test_metatile_extent_clips_at_grid_edge() {
        let grid = Grid::web_mercator();
        // z=1 has 2x2 tiles; a 5x5 metatile at the origin must clip to 2x2.
        let meta = grid.metatile_extent(0, 0, 1, 5, 5, 0).unwrap();
        assert!((meta.maxx - grid.extent.maxx).abs() < 1e-6);
        assert!((meta.maxy - grid.extent.maxy).abs() < 1e-6);
    }

    #[test]
    fn test_metatile_extent_buffer() {
        let grid = Grid::web_mercator();
        let plain = grid.metatile_extent(0, 0, 3, 2, 2, 0).unwrap();
        let buffered = grid.metatile_extent(0, 0, 3, 2, 2, 10).unwrap();
        let res = grid.levels[3].resolution;
        assert!((plain.minx - buffered.minx - 10.0 * res).abs() < 1e-6);
        assert!((buffered.maxx - plain.maxx - 10.0 * res).abs() < 1e-6);
    }

    #[test]
    fn test_contains_tile() {
        let grid = Grid::web_mercator();
        assert!(grid.contains_tile(7, 7, 3));
        assert!(!grid.contains_tile(8, 0, 3));
        assert!(!grid.contains_tile(0, 0, 99));
    }

    #[test]
    fn test_grid_link_zoom_bounds() {
        let grid = Arc::new(Grid::web_mercator());
        let mut link = GridLink::new(grid);
        link.min_zoom = 2;
        link.max_zoom = 10;
        assert!(!link.allows(0, 0, 1));
        assert!(link.allows(0, 0, 2));
        assert!(link.allows(0, 0, 10));
        assert!(!link.allows(0, 0, 11));
    }

    #[test]
    fn test_grid_link_restricted_extent() {
        let grid = Arc::new(Grid::web_mercator());
        let mut link = GridLink::new(grid.clone());
        // Restrict to the north-east quadrant.
        link.restricted_extent = Some(Extent::new(0.0, 0.0, grid.extent.maxx, grid.extent.maxy));
        assert!(link.allows(1, 1, 1));
        assert!(!link.allows(0, 0, 1));
    }

    #[test]
    fn test_from_resolutions_rejects_empty() {
        let err = Grid::from_resolutions(
            "g",
            "EPSG:3857",
            Extent::new(0.0, 0.0, 1.0, 1.0),
            256,
            256,
            GridOrigin::BottomLeft,
            &[],
        );
        assert!(err.is_err());
    }
}
