//! Raster helpers: metatile splitting, map assembly, watermarking.

use crate::error::{Error, Result};
use crate::tile::{TileData, TileFormat};
use image::{imageops, DynamicImage, GenericImageView, RgbaImage};
use std::io::Cursor;

/// Decode an encoded tile payload into RGBA pixels.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)
        .map_err(|e| Error::Internal(format!("failed to decode image: {e}")))?
        .to_rgba8())
}

/// Encode pixels in the given tile format.
pub fn encode(img: &RgbaImage, format: TileFormat) -> Result<TileData> {
    let mut out = Cursor::new(Vec::new());
    match format {
        TileFormat::Png => img
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| Error::Internal(format!("failed to encode png: {e}")))?,
        TileFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            rgb.write_to(&mut out, image::ImageFormat::Jpeg)
                .map_err(|e| Error::Internal(format!("failed to encode jpeg: {e}")))?;
        }
    }
    Ok(TileData::new(out.into_inner(), format.mime()))
}

/// Cut a rendered metatile into its component tiles.
///
/// The metatile image must be `tiles_x * tile_w + 2 * buffer` pixels wide
/// and `tiles_y * tile_h + 2 * buffer` high. Returned offsets `(dx, dy)`
/// are tile positions relative to the metatile origin; when `flip_y` is
/// set (bottom-left grid origin) `dy` counts up from the bottom of the
/// image.
pub fn split_metatile(
    meta: &RgbaImage,
    tiles_x: u32,
    tiles_y: u32,
    tile_w: u32,
    tile_h: u32,
    buffer: u32,
    flip_y: bool,
) -> Result<Vec<((u32, u32), RgbaImage)>> {
    let expect_w = tiles_x * tile_w + 2 * buffer;
    let expect_h = tiles_y * tile_h + 2 * buffer;
    if meta.width() != expect_w || meta.height() != expect_h {
        return Err(Error::Internal(format!(
            "rendered metatile is {}x{}, expected {expect_w}x{expect_h}",
            meta.width(),
            meta.height()
        )));
    }

    let mut tiles = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for dy in 0..tiles_y {
        for dx in 0..tiles_x {
            let px = buffer + dx * tile_w;
            let py = if flip_y {
                buffer + (tiles_y - 1 - dy) * tile_h
            } else {
                buffer + dy * tile_h
            };
            let view = meta.view(px, py, tile_w, tile_h).to_image();
            tiles.push(((dx, dy), view));
        }
    }
    Ok(tiles)
}

/// Composite a watermark over a tile, anchored at the top-left corner.
pub fn overlay_watermark(tile: &mut RgbaImage, watermark: &RgbaImage) {
    imageops::overlay(tile, watermark, 0, 0);
}

/// Paste decoded tiles into a mosaic. Offsets are pixel positions of each
/// tile's top-left corner within the mosaic.
pub fn assemble(
    width: u32,
    height: u32,
    tiles: Vec<((i64, i64), RgbaImage)>,
) -> RgbaImage {
    let mut mosaic = RgbaImage::new(width, height);
    for ((px, py), tile) in tiles {
        imageops::overlay(&mut mosaic, &tile, px, py);
    }
    mosaic
}

/// Extract a window from a mosaic and scale it to the requested size.
pub fn extract_scaled(
    mosaic: &RgbaImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    out_w: u32,
    out_h: u32,
) -> Result<RgbaImage> {
    if x + w > mosaic.width() || y + h > mosaic.height() || w == 0 || h == 0 {
        return Err(Error::Internal(format!(
            "assembly window {w}x{h}+{x}+{y} exceeds mosaic {}x{}",
            mosaic.width(),
            mosaic.height()
        )));
    }
    let window = mosaic.view(x, y, w, h).to_image();
    if (w, h) == (out_w, out_h) {
        return Ok(window);
    }
    Ok(imageops::resize(
        &window,
        out_w,
        out_h,
        imageops::FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(tiles_x: u32, tiles_y: u32, tile: u32, buffer: u32) -> RgbaImage {
        // Each tile cell gets a distinct solid color keyed by (dx, dy).
        let mut img = RgbaImage::from_pixel(
            tiles_x * tile + 2 * buffer,
            tiles_y * tile + 2 * buffer,
            Rgba([255, 0, 255, 255]), // buffer ring color
        );
        for cy in 0..tiles_y {
            for cx in 0..tiles_x {
                let color = Rgba([cx as u8 * 10, cy as u8 * 10, 0, 255]);
                for py in 0..tile {
                    for px in 0..tile {
                        img.put_pixel(buffer + cx * tile + px, buffer + cy * tile + py, color);
                    }
                }
            }
        }
        img
    }

    #[test]
    fn test_split_metatile_top_left() {
        let meta = checker(2, 2, 8, 0);
        let tiles = split_metatile(&meta, 2, 2, 8, 8, 0, false).unwrap();
        assert_eq!(tiles.len(), 4);

        // In a top-left grid, (dx=0, dy=0) is the top-left image cell.
        let (_, img) = tiles.iter().find(|((dx, dy), _)| (*dx, *dy) == (0, 0)).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        let (_, img) = tiles.iter().find(|((dx, dy), _)| (*dx, *dy) == (1, 1)).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([10, 10, 0, 255]));
    }

    #[test]
    fn test_split_metatile_flip_y() {
        let meta = checker(2, 2, 8, 0);
        let tiles = split_metatile(&meta, 2, 2, 8, 8, 0, true).unwrap();

        // With a bottom-left origin, (dx=0, dy=0) is the bottom-left image
        // cell, which the checker painted as row cy=1.
        let (_, img) = tiles.iter().find(|((dx, dy), _)| (*dx, *dy) == (0, 0)).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 10, 0, 255]));
    }

    #[test]
    fn test_split_metatile_trims_buffer() {
        let meta = checker(2, 1, 8, 4);
        let tiles = split_metatile(&meta, 2, 1, 8, 8, 4, false).unwrap();
        for (_, img) in &tiles {
            assert_eq!(img.dimensions(), (8, 8));
            // No buffer-ring pixels survive in any tile.
            assert!(img.pixels().all(|p| *p != Rgba([255, 0, 255, 255])));
        }
    }

    #[test]
    fn test_split_metatile_size_mismatch() {
        let meta = checker(2, 2, 8, 0);
        assert!(split_metatile(&meta, 3, 2, 8, 8, 0, false).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip_png() {
        let img = checker(1, 1, 4, 0);
        let data = encode(&img, TileFormat::Png).unwrap();
        assert_eq!(data.mime, "image/png");
        let back = decode(&data.bytes).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_encode_jpeg_drops_alpha() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128]));
        let data = encode(&img, TileFormat::Jpeg).unwrap();
        assert_eq!(data.mime, "image/jpeg");
        assert!(decode(&data.bytes).is_ok());
    }

    #[test]
    fn test_overlay_watermark() {
        let mut tile = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let wm = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        overlay_watermark(&mut tile, &wm);
        assert_eq!(*tile.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*tile.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_assemble_and_extract() {
        let a = RgbaImage::from_pixel(4, 4, Rgba([1, 0, 0, 255]));
        let b = RgbaImage::from_pixel(4, 4, Rgba([2, 0, 0, 255]));
        let mosaic = assemble(8, 4, vec![((0, 0), a), ((4, 0), b)]);

        let left = extract_scaled(&mosaic, 0, 0, 4, 4, 4, 4).unwrap();
        assert_eq!(*left.get_pixel(0, 0), Rgba([1, 0, 0, 255]));
        let right = extract_scaled(&mosaic, 4, 0, 4, 4, 4, 4).unwrap();
        assert_eq!(*right.get_pixel(0, 0), Rgba([2, 0, 0, 255]));
    }

    #[test]
    fn test_extract_scaled_resizes() {
        let mosaic = RgbaImage::from_pixel(8, 8, Rgba([5, 5, 5, 255]));
        let out = extract_scaled(&mosaic, 0, 0, 8, 8, 4, 4).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn test_extract_scaled_rejects_out_of_bounds() {
        let mosaic = RgbaImage::new(8, 8);
        assert!(extract_scaled(&mosaic, 4, 4, 8, 8, 8, 8).is_err());
    }
}
