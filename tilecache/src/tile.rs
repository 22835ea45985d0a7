//! Tile identity and payload types.

use bytes::Bytes;
use std::time::SystemTime;

/// Encoded image formats a tileset can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Png,
    Jpeg,
}

impl TileFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
            TileFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpg",
        }
    }

    /// Parse from a file extension or format name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Some(TileFormat::Png),
            "jpg" | "jpeg" => Some(TileFormat::Jpeg),
            _ => None,
        }
    }
}

/// Immutable identity of a tile.
///
/// Dimensions are an ordered list of (name, value) pairs; order is part of
/// the identity because it is baked into cache keys and lock resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileId {
    pub tileset: String,
    pub grid: String,
    pub x: u32,
    pub y: u32,
    pub z: usize,
    pub dimensions: Vec<(String, String)>,
}

impl TileId {
    pub fn new(
        tileset: impl Into<String>,
        grid: impl Into<String>,
        x: u32,
        y: u32,
        z: usize,
    ) -> Self {
        Self {
            tileset: tileset.into(),
            grid: grid.into(),
            x,
            y,
            z,
            dimensions: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.push((name.into(), value.into()));
        self
    }

    /// Signature string for the dimension list, empty when there are none.
    ///
    /// Each pair contributes `/name=value`; callers sanitize the result
    /// before persisting it.
    pub fn dimension_signature(&self) -> String {
        let mut sig = String::new();
        for (name, value) in &self.dimensions {
            sig.push('/');
            sig.push_str(name);
            sig.push('=');
            sig.push_str(value);
        }
        sig
    }

    /// Lower-left tile of the metatile block this tile belongs to.
    pub fn metatile_origin(&self, meta_width: u32, meta_height: u32) -> (u32, u32) {
        (
            self.x - self.x % meta_width.max(1),
            self.y - self.y % meta_height.max(1),
        )
    }
}

/// Encoded tile payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileData {
    pub bytes: Bytes,
    pub mime: String,
}

impl TileData {
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }
}

/// A tile as read back from a cache backend.
#[derive(Debug, Clone)]
pub struct StoredTile {
    pub data: TileData,
    /// Last-modified wall clock of the stored entry.
    pub mtime: SystemTime,
    /// True when the payload was reconstructed from a blank-tile sentinel.
    pub nodata: bool,
}

impl StoredTile {
    pub fn new(data: TileData, mtime: SystemTime) -> Self {
        Self {
            data,
            mtime,
            nodata: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_roundtrip() {
        assert_eq!(TileFormat::from_name("png"), Some(TileFormat::Png));
        assert_eq!(TileFormat::from_name("JPEG"), Some(TileFormat::Jpeg));
        assert_eq!(TileFormat::from_name("jpg"), Some(TileFormat::Jpeg));
        assert_eq!(TileFormat::from_name("webp"), None);
        assert_eq!(TileFormat::Png.mime(), "image/png");
        assert_eq!(TileFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn test_tile_id_equality_includes_dimensions() {
        let plain = TileId::new("l", "g", 1, 2, 3);
        let timed = TileId::new("l", "g", 1, 2, 3).with_dimension("TIME", "t1");
        assert_ne!(plain, timed);
        assert_eq!(
            timed,
            TileId::new("l", "g", 1, 2, 3).with_dimension("TIME", "t1")
        );
    }

    #[test]
    fn test_dimension_signature() {
        let t = TileId::new("l", "g", 0, 0, 0);
        assert_eq!(t.dimension_signature(), "");

        let t = t
            .with_dimension("TIME", "2024-06-01")
            .with_dimension("ELEVATION", "500");
        assert_eq!(t.dimension_signature(), "/TIME=2024-06-01/ELEVATION=500");
    }

    #[test]
    fn test_metatile_origin() {
        let t = TileId::new("l", "g", 13, 7, 4);
        assert_eq!(t.metatile_origin(5, 5), (10, 5));
        assert_eq!(t.metatile_origin(1, 1), (13, 7));
        // Degenerate zero size behaves like 1x1
        assert_eq!(t.metatile_origin(0, 0), (13, 7));
    }

    #[test]
    fn test_metatile_origin_at_origin() {
        let t = TileId::new("l", "g", 0, 0, 0);
        assert_eq!(t.metatile_origin(8, 8), (0, 0));
    }
}
