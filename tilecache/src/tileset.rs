//! Tileset: a named logical layer binding a source, a cache, and grids.

use crate::cache::TileStore;
use crate::error::{Error, Result};
use crate::grid::GridLink;
use crate::source::TileSource;
use crate::tile::TileFormat;
use image::RgbaImage;
use std::sync::Arc;

/// How GetMap requests against this tileset are satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStrategy {
    /// Pull tiles from the cache and composite them.
    Assemble,
    /// Forward the request to the upstream source untouched.
    Forward,
}

/// A dimension a tileset exposes (e.g. TIME), with its default value.
#[derive(Debug, Clone)]
pub struct DimensionDef {
    pub name: String,
    pub default: String,
}

/// Immutable description of one servable layer.
pub struct Tileset {
    pub name: String,
    pub source: Option<Arc<dyn TileSource>>,
    pub cache: Option<Arc<dyn TileStore>>,
    pub grid_links: Vec<GridLink>,
    pub format: TileFormat,
    /// Metatile block size in tiles (width, height).
    pub metatile: (u32, u32),
    /// Extra pixels rendered around the metatile to avoid edge artifacts.
    pub metabuffer: u32,
    /// `Cache-Control: max-age` seconds for served tiles.
    pub expires: Option<u32>,
    /// Read-only tilesets never render; a cache miss is a 404.
    pub read_only: bool,
    /// Overlay composited onto every rendered tile.
    pub watermark: Option<RgbaImage>,
    pub dimensions: Vec<DimensionDef>,
    pub map_strategy: MapStrategy,
}

impl Tileset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            cache: None,
            grid_links: Vec::new(),
            format: TileFormat::Png,
            metatile: (1, 1),
            metabuffer: 0,
            expires: None,
            read_only: false,
            watermark: None,
            dimensions: Vec::new(),
            map_strategy: MapStrategy::Assemble,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn TileSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn TileStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_grid_link(mut self, link: GridLink) -> Self {
        self.grid_links.push(link);
        self
    }

    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_metatile(mut self, width: u32, height: u32) -> Self {
        self.metatile = (width.max(1), height.max(1));
        self
    }

    pub fn with_metabuffer(mut self, pixels: u32) -> Self {
        self.metabuffer = pixels;
        self
    }

    pub fn with_expires(mut self, seconds: u32) -> Self {
        self.expires = Some(seconds);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_watermark(mut self, watermark: RgbaImage) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn with_dimension(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.dimensions.push(DimensionDef {
            name: name.into(),
            default: default.into(),
        });
        self
    }

    pub fn with_map_strategy(mut self, strategy: MapStrategy) -> Self {
        self.map_strategy = strategy;
        self
    }

    /// Resolve a grid link by grid name, or the first link when unnamed.
    pub fn grid_link(&self, grid: Option<&str>) -> Result<&GridLink> {
        match grid {
            None => self.grid_links.first().ok_or_else(|| {
                Error::BadRequest(format!("tileset \"{}\" has no grids", self.name))
            }),
            Some(name) => self
                .grid_links
                .iter()
                .find(|l| l.grid.name == name)
                .ok_or_else(|| {
                    Error::BadRequest(format!(
                        "tileset \"{}\" does not support grid \"{name}\"",
                        self.name
                    ))
                }),
        }
    }

    /// Build the ordered dimension list for a request, falling back to the
    /// configured defaults and rejecting unknown dimension names.
    pub fn resolve_dimensions(
        &self,
        requested: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        for (name, _) in requested {
            if !self
                .dimensions
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(name))
            {
                return Err(Error::BadRequest(format!(
                    "tileset \"{}\" has no dimension \"{name}\"",
                    self.name
                )));
            }
        }
        Ok(self
            .dimensions
            .iter()
            .map(|d| {
                let value = requested
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&d.name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| d.default.clone());
                (d.name.clone(), value)
            })
            .collect())
    }
}
