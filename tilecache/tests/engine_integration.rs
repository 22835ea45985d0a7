//! End-to-end scenarios through the public API: configuration, dispatch,
//! multi-tier caching, render coalescing, and conditional requests.

use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tilecache::cache::{DiskStore, MemoryStore, MultiTierStore, TileStore};
use tilecache::config::{Configuration, ServiceEntry};
use tilecache::context::RequestContext;
use tilecache::dispatch::{dispatch, Dispatch};
use tilecache::error::Result;
use tilecache::grid::GridLink;
use tilecache::http::HttpRequest;
use tilecache::image_ops;
use tilecache::locker::DiskLocker;
use tilecache::pool::ConnectionPool;
use tilecache::service::TmsService;
use tilecache::source::{FeatureInfoQuery, RenderJob, TileSource};
use tilecache::tile::{TileData, TileFormat, TileId};
use tilecache::tileset::Tileset;

/// Upstream stand-in: renders a fixed color and counts invocations.
struct CountingSource {
    color: Rgba<u8>,
    renders: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    fn new(color: Rgba<u8>) -> Self {
        Self {
            color,
            renders: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow(color: Rgba<u8>, delay: Duration) -> Self {
        Self {
            color,
            renders: AtomicUsize::new(0),
            delay,
        }
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TileSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn render(&self, _ctx: &RequestContext, job: &RenderJob) -> Result<TileData> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let img = RgbaImage::from_pixel(job.width, job.height, self.color);
        image_ops::encode(&img, TileFormat::Png)
    }

    async fn query(&self, _ctx: &RequestContext, _query: &FeatureInfoQuery) -> Result<TileData> {
        Ok(TileData::new(b"info".to_vec(), "text/plain"))
    }
}

struct Harness {
    ctx: RequestContext,
    source: Arc<CountingSource>,
    front: Arc<MemoryStore>,
    back: Arc<DiskStore>,
    _lock_dir: TempDir,
    _cache_dir: TempDir,
}

/// Two-tier stack (memory over disk, disk is the writer) behind a TMS
/// endpoint, with a fast disk locker.
fn harness(color: Rgba<u8>, detect_blank: bool) -> Harness {
    harness_with_source(Arc::new(CountingSource::new(color)), detect_blank)
}

fn harness_with_source(source: Arc<CountingSource>, detect_blank: bool) -> Harness {
    let lock_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();

    let front = Arc::new(MemoryStore::new("front", 1 << 24));
    let back = Arc::new(
        DiskStore::new("back", cache_dir.path().to_path_buf()).with_detect_blank(detect_blank),
    );
    let stack = Arc::new(
        MultiTierStore::new(
            "stack",
            vec![
                (front.clone() as Arc<dyn TileStore>, Some(false)),
                (back.clone() as Arc<dyn TileStore>, Some(true)),
            ],
        )
        .unwrap(),
    );

    let mut config = Configuration::new();
    config.locker = Arc::new(
        DiskLocker::new(lock_dir.path().to_path_buf())
            .with_retry_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(1500)),
    );
    let grid = config.grid("webmercator").unwrap().clone();
    config.tilesets.insert(
        "roads".to_string(),
        Arc::new(
            Tileset::new("roads")
                .with_grid_link(GridLink::new(grid))
                .with_source(source.clone())
                .with_cache(stack)
                .with_metatile(2, 2)
                .with_expires(3600),
        ),
    );
    config.services.insert(
        "tms".to_string(),
        ServiceEntry {
            service: Arc::new(TmsService::new()),
            enabled: true,
        },
    );

    let ctx = RequestContext::new(Arc::new(config), Arc::new(ConnectionPool::with_defaults()));
    Harness {
        ctx,
        source,
        front,
        back,
        _lock_dir: lock_dir,
        _cache_dir: cache_dir,
    }
}

fn tile_request(path: &str) -> HttpRequest {
    HttpRequest::get(format!("http://host/tiles{path}"), path)
}

async fn respond(h: &Harness, request: &HttpRequest) -> tilecache::http::HttpResponse {
    match dispatch(&h.ctx, request).await {
        Dispatch::Response(response) => response,
        Dispatch::Decline => panic!("request was declined"),
    }
}

#[tokio::test]
async fn cold_hit_renders_once_then_promotes() {
    let h = harness(Rgba([10, 20, 30, 255]), false);
    let tile = TileId::new("roads", "webmercator", 4, 5, 3);

    // Cold request: both tiers miss, the source renders once, and the
    // writer tier (disk) receives the metatile.
    let response = respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    assert_eq!(response.status, 200);
    assert_eq!(h.source.renders(), 1);
    assert!(h.back.exists(&h.ctx, &tile).await);
    assert!(!h.front.exists(&h.ctx, &tile).await);

    // Warm request: served from disk and promoted into memory.
    let response = respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    assert_eq!(response.status, 200);
    assert_eq!(h.source.renders(), 1);
    assert!(h.front.exists(&h.ctx, &tile).await);

    // Third request comes straight from memory.
    let before = h.front.stats().hits;
    respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    assert_eq!(h.source.renders(), 1);
    assert!(h.front.stats().hits > before);
}

#[tokio::test]
async fn concurrent_requests_share_one_render() {
    let source = Arc::new(CountingSource::slow(
        Rgba([1, 2, 3, 255]),
        Duration::from_millis(50),
    ));
    let h = harness_with_source(source, false);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ctx = h.ctx.clone();
        handles.push(tokio::spawn(async move {
            let request = tile_request("/tms/1.0.0/roads/3/4/5.png");
            match dispatch(&ctx, &request).await {
                Dispatch::Response(response) => response.status,
                Dispatch::Decline => 0,
            }
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }
    assert_eq!(h.source.renders(), 1);
}

#[tokio::test]
async fn blank_tiles_collapse_to_sentinels_on_disk() {
    let h = harness(Rgba([0, 0, 0, 0]), true);

    let response = respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    assert_eq!(response.status, 200);

    // Every stored tile of the metatile is the five-byte sentinel.
    let stored = std::fs::read(
        h._cache_dir
            .path()
            .join("roads/webmercator/3/4/5.png"),
    )
    .unwrap();
    assert_eq!(stored, vec![b'#', 0, 0, 0, 0]);

    // Reading back expands to a full transparent tile.
    let tile = TileId::new("roads", "webmercator", 4, 5, 3);
    let read_back = h.back.get(&h.ctx, &tile).await.unwrap().unwrap();
    assert!(read_back.nodata);
    let img = image_ops::decode(&read_back.data.bytes).unwrap();
    assert_eq!(img.dimensions(), (256, 256));
    assert!(img.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
}

#[tokio::test]
async fn abandoned_lock_does_not_wedge_the_tile() {
    let h = harness(Rgba([5, 5, 5, 255]), false);

    // A crashed worker left its lock behind: the 2x2 metatile of tile
    // (4,5,3) locks at origin (4,4).
    let locker = h.ctx.config().locker().clone();
    let (status, _abandoned) = locker
        .acquire("roads/webmercator/3/4/4")
        .await
        .unwrap();
    assert_eq!(status, tilecache::locker::LockStatus::Acquired);

    // The request waits out the timeout, discards the stale lock, and
    // renders anyway.
    let response = respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    assert_eq!(response.status, 200);
    assert_eq!(h.source.renders(), 1);
}

#[tokio::test]
async fn conditional_get_roundtrip() {
    let h = harness(Rgba([9, 9, 9, 255]), false);

    // Warm the stack until the serving tier is stable (memory, after the
    // disk hit promoted the tile), then condition on its Last-Modified.
    respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    let warm = respond(&h, &tile_request("/tms/1.0.0/roads/3/4/5.png")).await;
    let last_modified = warm.header("Last-Modified").unwrap().to_string();

    let request = tile_request("/tms/1.0.0/roads/3/4/5.png")
        .with_header("If-Modified-Since", last_modified.clone());
    let conditional = respond(&h, &request).await;
    assert_eq!(conditional.status, 304);
    assert!(conditional.body.is_empty());
    assert_eq!(conditional.header("Last-Modified").unwrap(), last_modified);
}

#[tokio::test]
async fn out_of_range_tile_is_404_with_no_render() {
    let h = harness(Rgba([9, 9, 9, 255]), false);

    let response = respond(&h, &tile_request("/tms/1.0.0/roads/3/9/0.png")).await;
    assert_eq!(response.status, 404);
    assert_eq!(h.source.renders(), 0);
}
