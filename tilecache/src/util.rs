//! Small shared helpers: resource-name canonicalization, tile key
//! templates, and human-readable size parsing.

use crate::error::{Error, Result};
use crate::tile::TileId;

/// Characters that may not appear in persisted lock or cache key names.
///
/// Covers path separators and every control character that confuses
/// shells, memcached keys, or filesystem listings.
const UNSAFE_KEY_CHARS: &[char] = &[
    ' ', '/', '~', '.', '\r', '\n', '\t', '\x0c', '\x1b', '\x07', '\x08',
];

/// Replace unsafe characters in a resource name with `#`.
///
/// The result is safe to embed in a lock file name, a memcached key, or a
/// single path segment.
pub fn sanitize_resource(resource: &str) -> String {
    resource
        .chars()
        .map(|c| if UNSAFE_KEY_CHARS.contains(&c) { '#' } else { c })
        .collect()
}

/// Expand a storage key template for a tile.
///
/// Recognized placeholders: `{tileset}`, `{grid}`, `{dim}`, `{z}`, `{x}`,
/// `{y}`, `{ext}`. `{dim}` expands to the sanitized dimension signature
/// (empty when the tile carries no dimensions). Literal characters,
/// including `/`, pass through untouched so templates can describe
/// directory layouts.
pub fn tile_key(tile: &TileId, template: &str, ext: &str) -> String {
    template
        .replace("{tileset}", &sanitize_resource(&tile.tileset))
        .replace("{grid}", &sanitize_resource(&tile.grid))
        .replace("{dim}", &sanitize_resource(&tile.dimension_signature()))
        .replace("{z}", &tile.z.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
        .replace("{ext}", ext)
}

/// Parse a human-readable size string into bytes.
///
/// Accepts bare byte counts and `KB`/`K`, `MB`/`M`, `GB`/`G` suffixes,
/// case-insensitive, whitespace tolerant.
pub fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::BadRequest("empty size value".into()));
    }

    let upper = s.to_uppercase();
    let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024usize * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024usize * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024usize)
    } else if let Some(n) = upper.strip_suffix('G') {
        (n, 1024usize * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1024usize * 1024)
    } else if let Some(n) = upper.strip_suffix('K') {
        (n, 1024usize)
    } else {
        (upper.as_str(), 1usize)
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| Error::BadRequest(format!("invalid size \"{s}\"")))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::BadRequest(format!("size \"{s}\" overflows")))
}

/// Format a byte count as a human-readable string.
pub fn format_size(bytes: usize) -> String {
    const GB: usize = 1024 * 1024 * 1024;
    const MB: usize = 1024 * 1024;
    const KB: usize = 1024;

    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}", bytes)
    }
}
