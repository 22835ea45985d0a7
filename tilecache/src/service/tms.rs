//! Tile Map Service URL layout.
//!
//! Tiles are addressed as `tms/1.0.0/{layer}[@{grid}]/{z}/{x}/{y}.{ext}`
//! with a bottom-up row order. The service root and each layer answer with
//! a capabilities document. Unknown layers and out-of-range tiles are hard
//! 404s.

use super::{
    error_tile_response, xml_escape, GetCapabilitiesRequest, GetTileRequest, Service,
    ServiceRequest,
};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::http::{HttpRequest, HttpResponse};
use crate::tile::{TileFormat, TileId};

const TMS_VERSION: &str = "1.0.0";

#[derive(Default)]
pub struct TmsService {
    /// Answer failures with a red image instead of a text body.
    error_tile: bool,
}

impl TmsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_tile(mut self, enabled: bool) -> Self {
        self.error_tile = enabled;
        self
    }
}

/// Split `layer` or `layer@grid`.
fn split_layer(s: &str) -> (&str, Option<&str>) {
    match s.split_once('@') {
        Some((layer, grid)) => (layer, Some(grid)),
        None => (s, None),
    }
}

impl Service for TmsService {
    fn name(&self) -> &'static str {
        "tms"
    }

    fn parse_request(
        &self,
        ctx: &RequestContext,
        segments: &[&str],
        _request: &HttpRequest,
    ) -> Result<ServiceRequest> {
        match segments {
            [] => Ok(ServiceRequest::GetCapabilities(GetCapabilitiesRequest {
                tileset: None,
                version: TMS_VERSION.to_string(),
            })),
            [version] if *version == TMS_VERSION => {
                Ok(ServiceRequest::GetCapabilities(GetCapabilitiesRequest {
                    tileset: None,
                    version: TMS_VERSION.to_string(),
                }))
            }
            [version, layer] if *version == TMS_VERSION => {
                let (name, _) = split_layer(layer);
                // Validate so the layer document 404s like its tiles would.
                ctx.config()
                    .tileset(name)
                    .ok_or_else(|| Error::NotFound(format!("received tile request for unknown tileset \"{name}\"")))?;
                Ok(ServiceRequest::GetCapabilities(GetCapabilitiesRequest {
                    tileset: Some(name.to_string()),
                    version: TMS_VERSION.to_string(),
                }))
            }
            [version, layer, z, x, y_ext] if *version == TMS_VERSION => {
                let (name, grid) = split_layer(layer);
                let tileset = ctx.config().tileset(name).ok_or_else(|| {
                    Error::NotFound(format!("received tile request for unknown tileset \"{name}\""))
                })?;
                let link = tileset.grid_link(grid)?;

                let (y, ext) = y_ext.rsplit_once('.').ok_or_else(|| {
                    Error::BadRequest(format!("failed to parse tile name \"{y_ext}\""))
                })?;
                let format = TileFormat::from_name(ext).ok_or_else(|| {
                    Error::BadRequest(format!("unsupported tile format \"{ext}\""))
                })?;

                let z: usize = z
                    .parse()
                    .map_err(|_| Error::BadRequest(format!("invalid zoom \"{z}\"")))?;
                let x: u32 = x
                    .parse()
                    .map_err(|_| Error::BadRequest(format!("invalid column \"{x}\"")))?;
                let y: u32 = y
                    .parse()
                    .map_err(|_| Error::BadRequest(format!("invalid row \"{y}\"")))?;

                if !link.allows(x, y, z) {
                    return Err(Error::NotFound(format!(
                        "tile ({x},{y},{z}) not available for tileset \"{name}\""
                    )));
                }

                let dimensions = tileset.resolve_dimensions(&[])?;
                let mut tile = TileId::new(name, link.grid.name.clone(), x, y, z);
                tile.dimensions = dimensions;
                Ok(ServiceRequest::GetTile(GetTileRequest {
                    tile,
                    format: Some(format),
                }))
            }
            _ => Err(Error::BadRequest(format!(
                "received request with invalid path /{}",
                segments.join("/")
            ))),
        }
    }

    fn capabilities(
        &self,
        ctx: &RequestContext,
        request: &GetCapabilitiesRequest,
        base_url: &str,
    ) -> Result<HttpResponse> {
        let config = ctx.config();
        let doc = match &request.tileset {
            None => {
                let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
                doc.push_str(&format!("<TileMapService version=\"{TMS_VERSION}\">\n"));
                doc.push_str("  <TileMaps>\n");
                let mut names: Vec<&String> = config.tilesets.keys().collect();
                names.sort();
                for name in names {
                    let tileset = &config.tilesets[name];
                    for link in &tileset.grid_links {
                        doc.push_str(&format!(
                            "    <TileMap title=\"{}\" srs=\"{}\" profile=\"global\" \
                             href=\"{}/tms/{TMS_VERSION}/{}@{}\"/>\n",
                            xml_escape(name),
                            xml_escape(&link.grid.srs),
                            base_url,
                            xml_escape(name),
                            xml_escape(&link.grid.name),
                        ));
                    }
                }
                doc.push_str("  </TileMaps>\n</TileMapService>\n");
                doc
            }
            Some(name) => {
                let tileset = config.tileset(name).ok_or_else(|| {
                    Error::NotFound(format!("unknown tileset \"{name}\""))
                })?;
                let link = tileset.grid_link(None)?;
                let grid = &link.grid;
                let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
                doc.push_str(&format!(
                    "<TileMap version=\"{TMS_VERSION}\" tilemapservice=\"{}/tms/{TMS_VERSION}\">\n",
                    base_url
                ));
                doc.push_str(&format!("  <Title>{}</Title>\n", xml_escape(name)));
                doc.push_str(&format!("  <SRS>{}</SRS>\n", xml_escape(&grid.srs)));
                doc.push_str(&format!(
                    "  <BoundingBox minx=\"{}\" miny=\"{}\" maxx=\"{}\" maxy=\"{}\"/>\n",
                    grid.extent.minx, grid.extent.miny, grid.extent.maxx, grid.extent.maxy
                ));
                doc.push_str(&format!(
                    "  <TileFormat width=\"{}\" height=\"{}\" mime-type=\"{}\" extension=\"{}\"/>\n",
                    grid.tile_width,
                    grid.tile_height,
                    tileset.format.mime(),
                    tileset.format.extension()
                ));
                doc.push_str("  <TileSets profile=\"global\">\n");
                for (z, level) in grid.levels.iter().enumerate() {
                    doc.push_str(&format!(
                        "    <TileSet href=\"{}/tms/{TMS_VERSION}/{}@{}/{z}\" \
                         units-per-pixel=\"{}\" order=\"{z}\"/>\n",
                        base_url,
                        xml_escape(name),
                        xml_escape(&grid.name),
                        level.resolution
                    ));
                }
                doc.push_str("  </TileSets>\n</TileMap>\n");
                doc
            }
        };
        Ok(HttpResponse::ok(doc, "text/xml"))
    }

    fn error_response(&self, err: &Error) -> HttpResponse {
        if self.error_tile {
            error_tile_response(err)
        } else {
            HttpResponse::from_error(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::grid::{Grid, GridLink};
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

    fn request() -> HttpRequest {
        HttpRequest::get("http://host/tiles/tms", "/tms")
    }

    fn parse(segments: &[&str]) -> Result<ServiceRequest> {
        TmsService::new().parse_request(&ctx(), segments, &request())
    }

    #[test]
    fn test_root_is_capabilities() {
        assert!(matches!(
            parse(&[]).unwrap(),
            ServiceRequest::GetCapabilities(GetCapabilitiesRequest { tileset: None, .. })
        ));
        assert!(matches!(
            parse(&["1.0.0"]).unwrap(),
            ServiceRequest::GetCapabilities(_)
        ));
    }

    #[test]
    fn test_layer_document() {
        let parsed = parse(&["1.0.0", "roads"]).unwrap();
        let ServiceRequest::GetCapabilities(caps) = parsed else {
            panic!("expected capabilities")
        };
        assert_eq!(caps.tileset.as_deref(), Some("roads"));
    }

    #[test]
    fn test_tile_request() {
        let parsed = parse(&["1.0.0", "roads@webmercator", "3", "4", "5.png"]).unwrap();
        let ServiceRequest::GetTile(get_tile) = parsed else {
            panic!("expected tile")
        };
        assert_eq!(get_tile.tile.tileset, "roads");
        assert_eq!(get_tile.tile.grid, "webmercator");
        assert_eq!(
            (get_tile.tile.x, get_tile.tile.y, get_tile.tile.z),
            (4, 5, 3)
        );
        assert_eq!(get_tile.format, Some(TileFormat::Png));
    }

    #[test]
    fn test_unknown_tileset_is_404() {
        let err = parse(&["1.0.0", "nope", "3", "4", "5.png"]).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_out_of_range_tile_is_404() {
        // z=3 has 8x8 tiles.
        let err = parse(&["1.0.0", "roads", "3", "9", "5.png"]).unwrap_err();
        assert_eq!(err.status_code(), 404);
        let err = parse(&["1.0.0", "roads", "99", "0", "0.png"]).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_malformed_coordinates_are_400() {
        assert_eq!(
            parse(&["1.0.0", "roads", "a", "4", "5.png"]).unwrap_err().status_code(),
            400
        );
        assert_eq!(
            parse(&["1.0.0", "roads", "3", "4", "noext"]).unwrap_err().status_code(),
            400
        );
        assert_eq!(
            parse(&["1.0.0", "roads", "3", "4", "5.webp"]).unwrap_err().status_code(),
            400
        );
    }

    #[test]
    fn test_wrong_version_is_400() {
        let err = parse(&["2.0.0", "roads", "3", "4", "5.png"]).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_service_capabilities_lists_layers() {
        let service = TmsService::new();
        let response = service
            .capabilities(
                &ctx(),
                &GetCapabilitiesRequest {
                    tileset: None,
                    version: TMS_VERSION.to_string(),
                },
                "http://host/tiles",
            )
            .unwrap();
        let doc = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(doc.contains("<TileMapService"));
        assert!(doc.contains("href=\"http://host/tiles/tms/1.0.0/roads@webmercator\""));
    }

    #[test]
    fn test_layer_capabilities_lists_zoom_levels() {
        let service = TmsService::new();
        let response = service
            .capabilities(
                &ctx(),
                &GetCapabilitiesRequest {
                    tileset: Some("roads".to_string()),
                    version: TMS_VERSION.to_string(),
                },
                "http://host/tiles",
            )
            .unwrap();
        let doc = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(doc.contains("<TileMap "));
        assert!(doc.contains("units-per-pixel"));
        assert!(doc.contains("/tms/1.0.0/roads@webmercator/0\""));
    }

    #[test]
    fn test_error_tile_mode() {
        let service = TmsService::new().with_error_tile(true);
        let response = service.error_response(&Error::NotFound("x".into()));
        assert_eq!(response.status, 404);
        assert_eq!(response.header("Content-Type"), Some("image/png"));

        let plain = TmsService::new().error_response(&Error::NotFound("x".into()));
        assert_eq!(plain.header("Content-Type"), Some("text/plain"));
    }
}
