//! WMS front-end: KVP GetMap, GetCapabilities and GetFeatureInfo.
//!
//! GetMap requests are not tile-addressed; the dispatcher satisfies them
//! by assembling cached tiles (or forwarding upstream, per tileset
//! policy). Requests arrive on the service root as query parameters.

use super::{
    xml_escape, GetCapabilitiesRequest, GetFeatureInfoRequest, GetMapRequest, Service,
    ServiceRequest,
};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::grid::Extent;
use crate::http::{HttpRequest, HttpResponse};
use crate::tile::TileFormat;

const WMS_VERSION: &str = "1.1.1";

#[derive(Default)]
pub struct WmsService;

impl WmsService {
    pub fn new() -> Self {
        Self
    }
}

fn parse_bbox(s: &str) -> Result<Extent> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::BadRequest(format!("invalid BBOX \"{s}\"")))?;
    let [minx, miny, maxx, maxy] = parts.as_slice() else {
        return Err(Error::BadRequest(format!("invalid BBOX \"{s}\"")));
    };
    if minx >= maxx || miny >= maxy {
        return Err(Error::BadRequest(format!("degenerate BBOX \"{s}\"")));
    }
    Ok(Extent::new(*minx, *miny, *maxx, *maxy))
}

fn required<'r>(request: &'r HttpRequest, name: &str) -> Result<&'r str> {
    request
        .param(name)
        .ok_or_else(|| Error::BadRequest(format!("missing {name} parameter")))
}

fn parse_u32(request: &HttpRequest, name: &str) -> Result<u32> {
    required(request, name)?
        .parse()
        .map_err(|_| Error::BadRequest(format!("invalid {name} parameter")))
}

/// Pull the tileset's dimension values out of the query string.
fn requested_dimensions(
    ctx: &RequestContext,
    layer: &str,
    request: &HttpRequest,
) -> Result<Vec<(String, String)>> {
    let tileset = ctx
        .config()
        .tileset(layer)
        .ok_or_else(|| Error::BadRequest(format!("unknown layer \"{layer}\"")))?;
    let requested: Vec<(String, String)> = tileset
        .dimensions
        .iter()
        .filter_map(|d| {
            request
                .param(&d.name)
                .map(|v| (d.name.clone(), v.to_string()))
        })
        .collect();
    tileset.resolve_dimensions(&requested)
}

impl Service for WmsService {
    fn name(&self) -> &'static str {
        "wms"
    }

    fn parse_request(
        &self,
        ctx: &RequestContext,
        segments: &[&str],
        request: &HttpRequest,
    ) -> Result<ServiceRequest> {
        if !segments.is_empty() {
            return Err(Error::BadRequest(format!(
                "received request with invalid path /{}",
                segments.join("/")
            )));
        }
        let operation = required(request, "REQUEST")?;
        match operation.to_ascii_lowercase().as_str() {
            "getcapabilities" => Ok(ServiceRequest::GetCapabilities(GetCapabilitiesRequest {
                tileset: None,
                version: WMS_VERSION.to_string(),
            })),
            "getmap" => {
                let layers = required(request, "LAYERS")?;
                if layers.contains(',') {
                    return Err(Error::BadRequest(
                        "only a single LAYERS entry is supported".into(),
                    ));
                }
                let tileset = ctx.config().tileset(layers).ok_or_else(|| {
                    Error::BadRequest(format!("unknown layer \"{layers}\""))
                })?;
                // The SRS parameter selects among the tileset's grids.
                let grid = match request.param("SRS") {
                    Some(srs) => Some(
                        tileset
                            .grid_links
                            .iter()
                            .find(|l| l.grid.srs.eq_ignore_ascii_case(srs))
                            .ok_or_else(|| {
                                Error::BadRequest(format!(
                                    "layer \"{layers}\" has no grid for SRS \"{srs}\""
                                ))
                            })?
                            .grid
                            .name
                            .clone(),
                    ),
                    None => None,
                };
                let format = request
                    .param("FORMAT")
                    .and_then(|mime| mime.rsplit('/').next())
                    .and_then(TileFormat::from_name)
                    .unwrap_or(TileFormat::Png);
                Ok(ServiceRequest::GetMap(GetMapRequest {
                    tileset: layers.to_string(),
                    grid,
                    extent: parse_bbox(required(request, "BBOX")?)?,
                    width: parse_u32(request, "WIDTH")?,
                    height: parse_u32(request, "HEIGHT")?,
                    format,
                    dimensions: requested_dimensions(ctx, layers, request)?,
                }))
            }
            "getfeatureinfo" => {
                let layers = required(request, "QUERY_LAYERS")?;
                Ok(ServiceRequest::GetFeatureInfo(GetFeatureInfoRequest {
                    tileset: layers.to_string(),
                    grid: None,
                    extent: parse_bbox(required(request, "BBOX")?)?,
                    width: parse_u32(request, "WIDTH")?,
                    height: parse_u32(request, "HEIGHT")?,
                    i: parse_u32(request, "X")?,
                    j: parse_u32(request, "Y")?,
                    info_format: request
                        .param("INFO_FORMAT")
                        .unwrap_or("text/plain")
                        .to_string(),
                    dimensions: requested_dimensions(ctx, layers, request)?,
                }))
            }
            other => Err(Error::BadRequest(format!(
                "unsupported WMS request \"{other}\""
            ))),
        }
    }

    fn capabilities(
        &self,
        ctx: &RequestContext,
        _request: &GetCapabilitiesRequest,
        base_url: &str,
    ) -> Result<HttpResponse> {
        let config = ctx.config();
        let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        doc.push_str(&format!(
            "<WMT_MS_Capabilities version=\"{WMS_VERSION}\">\n  <Capability>\n    \
             <OnlineResource href=\"{base_url}/wms\"/>\n"
        ));
        let mut names: Vec<&String> = config.tilesets.keys().collect();
        names.sort();
        for name in names {
            let tileset = &config.tilesets[name];
            doc.push_str("    <Layer>\n");
            doc.push_str(&format!("      <Name>{}</Name>\n", xml_escape(name)));
            for link in &tileset.grid_links {
                doc.push_str(&format!(
                    "      <SRS>{}</SRS>\n",
                    xml_escape(&link.grid.srs)
                ));
            }
            doc.push_str("    </Layer>\n");
        }
        doc.push_str("  </Capability>\n</WMT_MS_Capabilities>\n");
        Ok(HttpResponse::ok(doc, "text/xml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::grid::GridLink;
    use crate::pool::ConnectionPool;
    use crate::tileset::Tileset;
    use std::sync::Arc;

    fn ctx() -> RequestContext {
        let mut config = Configuration::new();
        let grid = config.grid("webmercator").unwrap().clone();
        config.tilesets.insert(
            "roads".to_string(),
            Arc::new(Tileset::new("roads").with_grid_link(GridLink::new(grid))),
        );
        RequestContext::new(Arc::new(config), Arc::new(ConnectionPool::with_defaults()))
    }

    fn kvp(query: &str) -> Result<ServiceRequest> {
        let request = HttpRequest::get("http://host/tiles/wms", "/wms").with_query(query);
        WmsService::new().parse_request(&ctx(), &[], &request)
    }

    #[test]
    fn test_getmap() {
        let parsed = kvp(
            "SERVICE=WMS&REQUEST=GetMap&LAYERS=roads&BBOX=0,0,100,50\
             &WIDTH=200&HEIGHT=100&FORMAT=image/jpeg",
        )
        .unwrap();
        let ServiceRequest::GetMap(map) = parsed else {
            panic!("expected map")
        };
        assert_eq!(map.tileset, "roads");
        assert_eq!(map.extent, Extent::new(0.0, 0.0, 100.0, 50.0));
        assert_eq!((map.width, map.height), (200, 100));
        assert_eq!(map.format, TileFormat::Jpeg);
    }

    #[test]
    fn test_getmap_rejects_multiple_layers() {
        let err = kvp("REQUEST=GetMap&LAYERS=a,b&BBOX=0,0,1,1&WIDTH=1&HEIGHT=1").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_getmap_rejects_bad_bbox() {
        assert_eq!(
            kvp("REQUEST=GetMap&LAYERS=roads&BBOX=5,0,1,1&WIDTH=1&HEIGHT=1")
                .unwrap_err()
                .status_code(),
            400
        );
        assert_eq!(
            kvp("REQUEST=GetMap&LAYERS=roads&BBOX=abc&WIDTH=1&HEIGHT=1")
                .unwrap_err()
                .status_code(),
            400
        );
    }

    #[test]
    fn test_getfeatureinfo() {
        let parsed = kvp(
            "REQUEST=GetFeatureInfo&QUERY_LAYERS=roads&BBOX=0,0,100,100\
             &WIDTH=256&HEIGHT=256&X=12&Y=34",
        )
        .unwrap();
        let ServiceRequest::GetFeatureInfo(info) = parsed else {
            panic!("expected feature info")
        };
        assert_eq!(info.tileset, "roads");
        assert_eq!((info.i, info.j), (12, 34));
        assert_eq!(info.info_format, "text/plain");
    }

    #[test]
    fn test_getcapabilities_document() {
        let service = WmsService::new();
        let response = service
            .capabilities(
                &ctx(),
                &GetCapabilitiesRequest {
                    tileset: None,
                    version: WMS_VERSION.to_string(),
                },
                "http://host/tiles",
            )
            .unwrap();
        let doc = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(doc.contains("<Name>roads</Name>"));
        assert!(doc.contains("href=\"http://host/tiles/wms\""));
    }

    #[test]
    fn test_unknown_request_is_400() {
        assert_eq!(kvp("REQUEST=GetLegend").unwrap_err().status_code(), 400);
        assert_eq!(kvp("").unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_path_suffix_is_rejected() {
        let request = HttpRequest::get("http://host/tiles/wms", "/wms/extra");
        let err = WmsService::new()
            .parse_request(&ctx(), &["extra"], &request)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
