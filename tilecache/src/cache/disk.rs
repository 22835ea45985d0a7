//! Filesystem tile store.
//!
//! Tiles live under a root directory in a template-driven layout, by
//! default `{tileset}/{grid}{dim}/{z}/{x}/{y}.{ext}`. The file modification
//! time doubles as the tile's `Last-Modified`.

use super::{blank, TileStore};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::tile::{StoredTile, TileData, TileId};
use crate::util::tile_key;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::debug;

const DEFAULT_TEMPLATE: &str = "{tileset}/{grid}{dim}/{z}/{x}/{y}.{ext}";

pub struct DiskStore {
    name: String,
    directory: PathBuf,
    template: String,
    extension: String,
    detect_blank: bool,
}

impl DiskStore {
    pub fn new(name: impl Into<String>, directory: PathBuf) -> Self {
        Self {
            name: name.into(),
            directory,
            template: DEFAULT_TEMPLATE.to_string(),
            extension: "png".to_string(),
            detect_blank: false,
        }
    }

    /// Override the storage layout template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// File extension used for stored tiles (and their guessed MIME).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Store uniform tiles as five-byte sentinels.
    pub fn with_detect_blank(mut self, enabled: bool) -> Self {
        self.detect_blank = enabled;
        self
    }

    fn tile_path(&self, tile: &TileId) -> PathBuf {
        self.directory
            .join(tile_key(tile, &self.template, &self.extension))
    }

    fn mime(&self) -> &'static str {
        match self.extension.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            _ => "image/png",
        }
    }

    /// Tile pixel size for sentinel expansion, from the tile's grid.
    fn tile_size(ctx: &RequestContext, tile: &TileId) -> (u32, u32) {
        ctx.config()
            .grid(&tile.grid)
            .map(|g| (g.tile_width, g.tile_height))
            .unwrap_or((256, 256))
    }
}

#[async_trait::async_trait]
impl TileStore for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, _ctx: &RequestContext, tile: &TileId) -> bool {
        self.tile_path(tile).is_file()
    }

    async fn get(&self, ctx: &RequestContext, tile: &TileId) -> Result<Option<StoredTile>> {
        let path = self.tile_path(tile);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Internal(format!(
                    "disk cache \"{}\" failed to read {}: {e}",
                    self.name,
                    path.display()
                )))
            }
        };

        let mtime = fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());

        if self.detect_blank {
            if let Some(color) = blank::decode_sentinel(&bytes) {
                let (w, h) = Self::tile_size(ctx, tile);
                let mut stored = StoredTile::new(blank::expand_sentinel(color, w, h)?, mtime);
                stored.nodata = true;
                return Ok(Some(stored));
            }
        }

        Ok(Some(StoredTile::new(
            TileData::new(bytes, self.mime()),
            mtime,
        )))
    }

    async fn set(&self, _ctx: &RequestContext, tile: &TileId, data: &TileData) -> Result<()> {
        let path = self.tile_path(tile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Internal(format!(
                    "disk cache \"{}\" failed to create {}: {e}",
                    self.name,
                    parent.display()
                ))
            })?;
        }

        let payload = if self.detect_blank {
            blank::encode_if_blank(data)
        } else {
            None
        };
        let payload = payload.as_ref().unwrap_or(data);
        if payload.mime == blank::BLANK_TILE_MIME {
            debug!(cache = self.name, tile = ?tile, "storing blank tile sentinel");
        }

        fs::write(&path, &payload.bytes).map_err(|e| {
            Error::Internal(format!(
                "disk cache \"{}\" failed to write {}: {e}",
                self.name,
                path.display()
            ))
        })
    }

    async fn delete(&self, _ctx: &RequestContext, tile: &TileId) -> Result<()> {
        match fs::remove_file(self.tile_path(tile)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(format!(
                "disk cache \"{}\" failed to delete tile: {e}",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::pool::ConnectionPool;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx() -> RequestContext {
        RequestContext::new(
            Arc::new(Configuration::new()),
            Arc::new(ConnectionPool::with_defaults()),
        )
    }

    fn tile() -> TileId {
        TileId::new("roads", "webmercator", 4, 5, 3)
    }

    fn payload() -> TileData {
        TileData::new(b"tile-bytes".to_vec(), "image/png")
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf());
        let ctx = ctx();

        store.set(&ctx, &tile(), &payload()).await.unwrap();
        let stored = store.get(&ctx, &tile()).await.unwrap().unwrap();
        assert_eq!(stored.data.bytes, payload().bytes);
        assert_eq!(stored.data.mime, "image/png");
        assert!(!stored.nodata);
    }

    #[tokio::test]
    async fn test_layout_follows_template() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf());
        store.set(&ctx(), &tile(), &payload()).await.unwrap();

        assert!(dir.path().join("roads/webmercator/3/4/5.png").is_file());
    }

    #[tokio::test]
    async fn test_custom_template_and_extension() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf())
            .with_template("{z}-{x}-{y}.{ext}")
            .with_extension("jpg");
        store.set(&ctx(), &tile(), &payload()).await.unwrap();

        assert!(dir.path().join("3-4-5.jpg").is_file());
        let stored = store.get(&ctx(), &tile()).await.unwrap().unwrap();
        assert_eq!(stored.data.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf());
        assert!(store.get(&ctx(), &tile()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf());
        let ctx = ctx();

        assert!(!store.exists(&ctx, &tile()).await);
        store.set(&ctx, &tile(), &payload()).await.unwrap();
        assert!(store.exists(&ctx, &tile()).await);

        store.delete(&ctx, &tile()).await.unwrap();
        assert!(!store.exists(&ctx, &tile()).await);

        // Deleting again stays quiet.
        store.delete(&ctx, &tile()).await.unwrap();
    }

    #[tokio::test]
    async fn test_dimensions_split_storage() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf());
        let ctx = ctx();

        let plain = tile();
        let timed = tile().with_dimension("TIME", "2024-06-01");
        store.set(&ctx, &plain, &payload()).await.unwrap();

        assert!(store.get(&ctx, &timed).await.unwrap().is_none());
        store
            .set(&ctx, &timed, &TileData::new(b"timed".to_vec(), "image/png"))
            .await
            .unwrap();
        let stored = store.get(&ctx, &timed).await.unwrap().unwrap();
        assert_eq!(stored.data.bytes.as_ref(), b"timed");
    }

    #[tokio::test]
    async fn test_blank_tile_stored_as_five_bytes() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf()).with_detect_blank(true);
        let ctx = ctx();

        let img = RgbaImage::from_pixel(256, 256, Rgba([0, 0, 0, 0]));
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        let data = TileData::new(png.into_inner(), "image/png");

        store.set(&ctx, &tile(), &data).await.unwrap();

        let on_disk = fs::read(dir.path().join("roads/webmercator/3/4/5.png")).unwrap();
        assert_eq!(on_disk, vec![b'#', 0, 0, 0, 0]);

        let stored = store.get(&ctx, &tile()).await.unwrap().unwrap();
        assert!(stored.nodata);
        let back = image::load_from_memory(&stored.data.bytes).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (256, 256));
        assert!(back.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }

    #[tokio::test]
    async fn test_sentinel_ignored_without_detect_blank() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new("d", dir.path().to_path_buf());
        let ctx = ctx();

        let sentinel = TileData::new(vec![b'#', 1, 2, 3, 4], "image/png");
        store.set(&ctx, &tile(), &sentinel).await.unwrap();
        let stored = store.get(&ctx, &tile()).await.unwrap().unwrap();
        assert_eq!(stored.data.bytes.as_ref(), &[b'#', 1, 2, 3, 4]);
        assert!(!stored.nodata);
    }
}
