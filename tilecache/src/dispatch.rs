//! Request dispatcher: typed requests in, HTTP responses out.
//!
//! The host hands over the path-info and query of a routed request; the
//! first path segment selects a service parser, the parsed request runs
//! against the cache/render pipeline (or the proxy), and the outcome is a
//! complete [`HttpResponse`]. Anything the engine does not recognize is
//! declined so the host can serve it.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::grid::GridOrigin;
use crate::http::{tile_response, HttpRequest, HttpResponse, Method};
use crate::image_ops;
use crate::pipeline;
use crate::service::{
    GetFeatureInfoRequest, GetMapRequest, GetTileRequest, ProxyRequest, Service, ServiceRequest,
};
use crate::source::FeatureInfoQuery;
use crate::tile::TileId;
use crate::tileset::{MapStrategy, Tileset};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on tiles composited into one assembled map.
const MAX_ASSEMBLY_TILES: u32 = 256;

/// Dispatcher outcome.
pub enum Dispatch {
    Response(HttpResponse),
    /// Not ours: let the embedding host handle the URL.
    Decline,
}

/// Route one request through the engine.
pub async fn dispatch(ctx: &RequestContext, request: &HttpRequest) -> Dispatch {
    match request.method {
        Method::Get | Method::Post => {}
        Method::Other(_) => {
            return Dispatch::Response(HttpResponse::from_error(&Error::MethodNotAllowed(
                "only GET and POST are accepted".into(),
            )))
        }
    }

    let segments: Vec<&str> = request
        .path_info
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let Some(first) = segments.first() else {
        return Dispatch::Decline;
    };

    if let Some(entry) = ctx.config().service(first) {
        if !entry.enabled {
            return Dispatch::Response(HttpResponse::from_error(&Error::NotFound(format!(
                "service \"{first}\" is disabled"
            ))));
        }
        let service = entry.service.clone();
        let parsed = match service.parse_request(ctx, &segments[1..], request) {
            Ok(parsed) => parsed,
            Err(e) => return Dispatch::Response(service.error_response(&e)),
        };
        return match execute(ctx, request, service.as_ref(), parsed).await {
            Ok(response) => Dispatch::Response(response),
            Err(e) => Dispatch::Response(service.error_response(&e)),
        };
    }

    // No service matched; a proxy rule may claim the path.
    if let Some(rule) = ctx.config().proxy_rule(first) {
        let remainder: Vec<String> = segments[1..].iter().map(|s| s.to_string()).collect();
        let parsed = ServiceRequest::Proxy(ProxyRequest {
            rule: rule.name().to_string(),
            remainder,
        });
        return match execute_proxy(ctx, request, &parsed).await {
            Ok(response) => Dispatch::Response(response),
            Err(e) => Dispatch::Response(HttpResponse::from_error(&e)),
        };
    }

    debug!(path = %request.path_info, "no service matched, declining");
    Dispatch::Decline
}

async fn execute(
    ctx: &RequestContext,
    request: &HttpRequest,
    service: &dyn Service,
    parsed: ServiceRequest,
) -> Result<HttpResponse> {
    match parsed {
        ServiceRequest::GetTile(get_tile) => execute_get_tile(ctx, request, get_tile).await,
        ServiceRequest::GetCapabilities(caps) => {
            let base = base_url(request);
            service.capabilities(ctx, &caps, &base)
        }
        ServiceRequest::GetFeatureInfo(info) => execute_feature_info(ctx, info).await,
        ServiceRequest::GetMap(map) => execute_get_map(ctx, map).await,
        parsed @ ServiceRequest::Proxy(_) => execute_proxy(ctx, request, &parsed).await,
    }
}

async fn execute_get_tile(
    ctx: &RequestContext,
    request: &HttpRequest,
    get_tile: GetTileRequest,
) -> Result<HttpResponse> {
    let tileset = lookup_tileset(ctx, &get_tile.tile.tileset)?;
    if let Some(format) = get_tile.format {
        if format != tileset.format {
            return Err(Error::BadRequest(format!(
                "tileset \"{}\" does not serve {} tiles",
                tileset.name,
                format.extension()
            )));
        }
    }
    let stored = pipeline::fetch_tile(ctx, &tileset, &get_tile.tile).await?;
    Ok(tile_response(
        &tileset,
        &stored,
        request.header("if-modified-since"),
    ))
}

async fn execute_feature_info(
    ctx: &RequestContext,
    info: GetFeatureInfoRequest,
) -> Result<HttpResponse> {
    let tileset = lookup_tileset(ctx, &info.tileset)?;
    let source = tileset.source.as_ref().ok_or_else(|| {
        Error::NotFound(format!("tileset \"{}\" is not queryable", tileset.name))
    })?;
    let link = tileset.grid_link(info.grid.as_deref())?;
    let query = FeatureInfoQuery {
        extent: info.extent,
        srs: link.grid.srs.clone(),
        width: info.width,
        height: info.height,
        i: info.i,
        j: info.j,
        info_format: info.info_format,
        dimensions: info.dimensions,
    };
    let data = source.query(ctx, &query).await?;
    Ok(HttpResponse::ok(data.bytes, data.mime))
}

async fn execute_proxy(
    ctx: &RequestContext,
    request: &HttpRequest,
    parsed: &ServiceRequest,
) -> Result<HttpResponse> {
    let ServiceRequest::Proxy(proxy) = parsed else {
        return Err(Error::Internal("proxy executor given a non-proxy request".into()));
    };
    let rule = ctx
        .config()
        .proxy_rule(&proxy.rule)
        .ok_or_else(|| Error::NotFound(format!("unknown proxy rule \"{}\"", proxy.rule)))?;
    rule.forward(request, &proxy.remainder).await
}

/// Satisfy a GetMap by compositing cached tiles, or by forwarding to the
/// upstream source when the tileset says so.
async fn execute_get_map(ctx: &RequestContext, map: GetMapRequest) -> Result<HttpResponse> {
    let tileset = lookup_tileset(ctx, &map.tileset)?;
    if map.width == 0 || map.height == 0 {
        return Err(Error::BadRequest("WIDTH and HEIGHT must be positive".into()));
    }

    if tileset.map_strategy == MapStrategy::Forward {
        let link = tileset.grid_link(map.grid.as_deref())?;
        let source = tileset.source.as_ref().ok_or_else(|| {
            Error::NotFound(format!("tileset \"{}\" has no source", tileset.name))
        })?;
        let job = crate::source::RenderJob {
            extent: map.extent,
            srs: link.grid.srs.clone(),
            width: map.width,
            height: map.height,
            format: map.format,
            dimensions: map.dimensions.clone(),
        };
        let data = source.render(ctx, &job).await?;
        return Ok(HttpResponse::ok(data.bytes, data.mime));
    }

    assemble_map(ctx, &tileset, &map).await
}

async fn assemble_map(
    ctx: &RequestContext,
    tileset: &Arc<Tileset>,
    map: &GetMapRequest,
) -> Result<HttpResponse> {
    let link = tileset.grid_link(map.grid.as_deref())?;
    let grid = &link.grid;
    let (tw, th) = (grid.tile_width as f64, grid.tile_height as f64);

    // Pick the zoom level whose resolution is closest to the request's.
    let requested_res = (map.extent.maxx - map.extent.minx) / map.width as f64;
    let (z, level) = grid
        .levels
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (a.resolution - requested_res).abs();
            let db = (b.resolution - requested_res).abs();
            da.partial_cmp(&db).expect("resolutions are finite")
        })
        .ok_or_else(|| Error::BadRequest(format!("grid \"{}\" has no levels", grid.name)))?;
    let res = level.resolution;

    // Covering tile range, clamped to the grid.
    let clamp_x = |v: f64| (v.max(0.0) as u32).min(level.max_x.saturating_sub(1));
    let clamp_y = |v: f64| (v.max(0.0) as u32).min(level.max_y.saturating_sub(1));
    let x0 = clamp_x(((map.extent.minx - grid.extent.minx) / (res * tw)).floor());
    let x1 = clamp_x(((map.extent.maxx - grid.extent.minx) / (res * tw)).ceil() - 1.0);
    let (y0, y1) = match grid.origin {
        GridOrigin::BottomLeft => (
            clamp_y(((map.extent.miny - grid.extent.miny) / (res * th)).floor()),
            clamp_y(((map.extent.maxy - grid.extent.miny) / (res * th)).ceil() - 1.0),
        ),
        GridOrigin::TopLeft => (
            clamp_y(((grid.extent.maxy - map.extent.maxy) / (res * th)).floor()),
            clamp_y(((grid.extent.maxy - map.extent.miny) / (res * th)).ceil() - 1.0),
        ),
    };

    let tiles_x = x1 - x0 + 1;
    let tiles_y = y1 - y0 + 1;
    if tiles_x * tiles_y > MAX_ASSEMBLY_TILES {
        return Err(Error::BadRequest(format!(
            "requested map needs {} tiles, limit is {MAX_ASSEMBLY_TILES}",
            tiles_x * tiles_y
        )));
    }

    debug!(tileset = %tileset.name, z, tiles_x, tiles_y, "assembling map");
    let mut mosaic_tiles = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in y0..=y1 {
        for tx in x0..=x1 {
            let mut tile = TileId::new(tileset.name.clone(), grid.name.clone(), tx, ty, z);
            tile.dimensions = map.dimensions.clone();
            let stored = pipeline::fetch_tile(ctx, tileset, &tile).await?;
            let img = image_ops::decode(&stored.data.bytes)?;
            let px = (tx - x0) as i64 * grid.tile_width as i64;
            let py = match grid.origin {
                GridOrigin::BottomLeft => (y1 - ty) as i64 * grid.tile_height as i64,
                GridOrigin::TopLeft => (ty - y0) as i64 * grid.tile_height as i64,
            };
            mosaic_tiles.push(((px, py), img));
        }
    }
    let mosaic = image_ops::assemble(
        tiles_x * grid.tile_width,
        tiles_y * grid.tile_height,
        mosaic_tiles,
    );

    // Window of the requested extent inside the mosaic, in pixels.
    let mosaic_minx = grid.extent.minx + x0 as f64 * res * tw;
    let mosaic_maxy = match grid.origin {
        GridOrigin::BottomLeft => grid.extent.miny + (y1 + 1) as f64 * res * th,
        GridOrigin::TopLeft => grid.extent.maxy - y0 as f64 * res * th,
    };
    let win_x = ((map.extent.minx - mosaic_minx) / res).round().max(0.0) as u32;
    let win_y = ((mosaic_maxy - map.extent.maxy) / res).round().max(0.0) as u32;
    let win_w = (((map.extent.maxx - map.extent.minx) / res).round() as u32)
        .min(mosaic.width().saturating_sub(win_x))
        .max(1);
    let win_h = (((map.extent.maxy - map.extent.miny) / res).round() as u32)
        .min(mosaic.height().saturating_sub(win_y))
        .max(1);

    let out = image_ops::extract_scaled(&mosaic, win_x, win_y, win_w, win_h, map.width, map.height)?;
    let data = image_ops::encode(&out, map.format)?;
    Ok(HttpResponse::ok(data.bytes, data.mime))
}

fn lookup_tileset(ctx: &RequestContext, name: &str) -> Result<Arc<Tileset>> {
    ctx.config()
        .tileset(name)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("unknown tileset \"{name}\"")))
}

/// Public base URL of the alias root: the request URL with the path-info
/// suffix (and any trailing slash run) stripped.
fn base_url(request: &HttpRequest) -> String {
    let url = &request.url;
    let path_info = request.path_info.as_str();
    let mut base = if !path_info.is_empty() && path_info != "/" {
        match url.rfind(path_info) {
            Some(at) => &url[..at],
            None => url.as_str(),
        }
    } else {
        url.as_str()
    };
    while base.ends_with('/') {
        base = &base[..base.len() - 1];
    }
    base.to_string()
}
