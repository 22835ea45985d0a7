//! Blank-tile compression.
//!
//! Oceans, deserts and empty sky render as a single uniform color. Backends
//! with `detect_blank` enabled store such tiles as a five-byte sentinel
//! (`#` followed by the RGBA color) instead of a full encoded image, and
//! re-expand the sentinel on read.

use crate::error::{Error, Result};
use crate::tile::TileData;
use image::{Rgba, RgbaImage};
use std::io::Cursor;

/// MIME type tagging a stored blank-tile sentinel.
pub const BLANK_TILE_MIME: &str = "image/tilecache-rgba";

const SENTINEL_MARKER: u8 = b'#';

/// If the encoded tile decodes to a single uniform color, return the
/// five-byte sentinel payload that replaces it.
///
/// Returns `None` for multi-color tiles and for payloads that do not decode
/// as an image (corrupt data is stored verbatim rather than rejected here).
pub fn encode_if_blank(data: &TileData) -> Option<TileData> {
    let decoded = image::load_from_memory(&data.bytes).ok()?;
    let rgba = decoded.to_rgba8();
    let mut pixels = rgba.pixels();
    let first = *pixels.next()?;
    if pixels.all(|p| *p == first) {
        let Rgba([r, g, b, a]) = first;
        Some(TileData::new(
            vec![SENTINEL_MARKER, r, g, b, a],
            BLANK_TILE_MIME,
        ))
    } else {
        None
    }
}

/// Recognize a stored sentinel, returning its RGBA color.
pub fn decode_sentinel(bytes: &[u8]) -> Option<[u8; 4]> {
    match bytes {
        [SENTINEL_MARKER, r, g, b, a] => Some([*r, *g, *b, *a]),
        _ => None,
    }
}

/// Expand a sentinel color back into a full encoded PNG tile.
pub fn expand_sentinel(color: [u8; 4], width: u32, height: u32) -> Result<TileData> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("failed to encode blank tile: {e}")))?;
    Ok(TileData::new(out.into_inner(), "image/png"))
}
