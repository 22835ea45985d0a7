//! WMTS front-end: RESTful tile paths and KVP queries.
//!
//! RESTful layout:
//! `wmts/1.0.0/{layer}/{style}/{dims...}/{grid}/{z}/{row}/{col}.{ext}`
//! with one path segment per configured dimension. KVP requests arrive on
//! the service root with `REQUEST=GetTile|GetCapabilities|GetFeatureInfo`.
//! WMTS rows count down from the top of the grid; they are flipped here
//! for bottom-origin grids.

use super::{
    error_tile_response, xml_escape, GetCapabilitiesRequest, GetFeatureInfoRequest,
    GetTileRequest, Service, ServiceRequest,
};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::grid::{Grid, GridOrigin};
use crate::http::{HttpRequest, HttpResponse};
use crate::tile::{TileFormat, TileId};
use crate::tileset::Tileset;

const WMTS_VERSION: &str = "1.0.0";

#[derive(Default)]
pub struct WmtsService {
    error_tile: bool,
}

impl WmtsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_tile(mut self, enabled: bool) -> Self {
        self.error_tile = enabled;
        self
    }

    fn parse_kvp(&self, ctx: &RequestContext, request: &HttpRequest) -> Result<ServiceRequest> {
        let operation = request
            .param("REQUEST")
            .ok_or_else(|| Error::BadRequest("missing REQUEST parameter".into()))?;

        match operation.to_ascii_lowercase().as_str() {
            "getcapabilities" => Ok(ServiceRequest::GetCapabilities(GetCapabilitiesRequest {
                tileset: None,
                version: WMTS_VERSION.to_string(),
            })),
            "gettile" => {
                let (_tileset, tile, format) = self.kvp_tile(ctx, request)?;
                Ok(ServiceRequest::GetTile(GetTileRequest { tile, format }))
            }
            "getfeatureinfo" => {
                let (tileset, tile, _) = self.kvp_tile(ctx, request)?;
                let link = tileset.grid_link(Some(tile.grid.as_str()))?;
                let grid = &link.grid;
                let extent = grid.tile_extent(tile.x, tile.y, tile.z)?;
                let i: u32 = request
                    .param("I")
                    .ok_or_else(|| Error::BadRequest("missing I parameter".into()))?
                    .parse()
                    .map_err(|_| Error::BadRequest("invalid I parameter".into()))?;
                let j: u32 = request
                    .param("J")
                    .ok_or_else(|| Error::BadRequest("missing J parameter".into()))?
                    .parse()
                    .map_err(|_| Error::BadRequest("invalid J parameter".into()))?;
                if i >= grid.tile_width || j >= grid.tile_height {
                    return Err(Error::BadRequest(format!(
                        "query pixel ({i},{j}) outside tile"
                    )));
                }
                Ok(ServiceRequest::GetFeatureInfo(GetFeatureInfoRequest {
                    tileset: tile.tileset.clone(),
                    grid: Some(tile.grid.clone()),
                    extent,
                    width: grid.tile_width,
                    height: grid.tile_height,
                    i,
                    j,
                    info_format: request
                        .param("INFOFORMAT")
                        .or_else(|| request.param("INFO_FORMAT"))
                        .unwrap_or("text/plain")
                        .to_string(),
                    dimensions: tile.dimensions.clone(),
                }))
            }
            other => Err(Error::BadRequest(format!(
                "unsupported WMTS request \"{other}\""
            ))),
        }
    }

    /// Shared KVP GetTile/GetFeatureInfo addressing.
    fn kvp_tile(
        &self,
        ctx: &RequestContext,
        request: &HttpRequest,
    ) -> Result<(std::sync::Arc<Tileset>, TileId, Option<TileFormat>)> {
        let layer = request
            .param("LAYER")
            .ok_or_else(|| Error::BadRequest("missing LAYER parameter".into()))?;
        let tileset = ctx
            .config()
            .tileset(layer)
            .cloned()
            .ok_or_else(|| Error::BadRequest(format!("unknown layer \"{layer}\"")))?;

        let matrix_set = request.param("TILEMATRIXSET");
        let link = tileset.grid_link(matrix_set)?;
        let grid = &link.grid;

        let matrix = request
            .param("TILEMATRIX")
            .ok_or_else(|| Error::BadRequest("missing TILEMATRIX parameter".into()))?;
        // Accept both "z" and "set:z" notations.
        let z: usize = matrix
            .rsplit(':')
            .next()
            .unwrap_or(matrix)
            .parse()
            .map_err(|_| Error::BadRequest(format!("invalid TILEMATRIX \"{matrix}\"")))?;
        let row: u32 = request
            .param("TILEROW")
            .ok_or_else(|| Error::BadRequest("missing TILEROW parameter".into()))?
            .parse()
            .map_err(|_| Error::BadRequest("invalid TILEROW".into()))?;
        let col: u32 = request
            .param("TILECOL")
            .ok_or_else(|| Error::BadRequest("missing TILECOL parameter".into()))?
            .parse()
            .map_err(|_| Error::BadRequest("invalid TILECOL".into()))?;

        let y = flip_row(grid, row, z)?;
        if !link.allows(col, y, z) {
            return Err(Error::NotFound(format!(
                "tile (row {row}, col {col}) not available at matrix {z}"
            )));
        }

        let requested_dims: Vec<(String, String)> = tileset
            .dimensions
            .iter()
            .filter_map(|d| {
                request
                    .param(&d.name)
                    .map(|v| (d.name.clone(), v.to_string()))
            })
            .collect();
        let dimensions = tileset.resolve_dimensions(&requested_dims)?;

        let format = request.param("FORMAT").and_then(|mime| {
            mime.rsplit('/').next().and_then(TileFormat::from_name)
        });

        let mut tile = TileId::new(layer, grid.name.clone(), col, y, z);
        tile.dimensions = dimensions;
        Ok((tileset, tile, format))
    }

    fn parse_rest(
        &self,
        ctx: &RequestContext,
        segments: &[&str],
    ) -> Result<ServiceRequest> {
        if segments.len() < 2 {
            return Err(Error::BadRequest("incomplete WMTS path".into()));
        }
        let layer = segments[1];
        let tileset = ctx
            .config()
            .tileset(layer)
            .cloned()
            .ok_or_else(|| Error::BadRequest(format!("unknown layer \"{layer}\"")))?;

        // layer / style / one segment per dimension / grid / z / row / col.ext
        let dim_count = tileset.dimensions.len();
        let expected = 3 + dim_count + 4;
        if segments.len() != expected {
            return Err(Error::BadRequest(format!(
                "received request with invalid path /{}",
                segments.join("/")
            )));
        }

        let dims: Vec<(String, String)> = tileset
            .dimensions
            .iter()
            .zip(&segments[3..3 + dim_count])
            .map(|(def, value)| (def.name.clone(), value.to_string()))
            .collect();
        let dimensions = tileset.resolve_dimensions(&dims)?;

        let grid_name = segments[3 + dim_count];
        let link = tileset.grid_link(Some(grid_name))?;
        let grid = &link.grid;

        let z: usize = segments[4 + dim_count]
            .parse()
            .map_err(|_| Error::BadRequest("invalid tile matrix".into()))?;
        let row: u32 = segments[5 + dim_count]
            .parse()
            .map_err(|_| Error::BadRequest("invalid tile row".into()))?;
        let (col_str, ext) = segments[6 + dim_count]
            .rsplit_once('.')
            .ok_or_else(|| Error::BadRequest("tile name is missing an extension".into()))?;
        let col: u32 = col_str
            .parse()
            .map_err(|_| Error::BadRequest("invalid tile column".into()))?;
        let format = TileFormat::from_name(ext)
            .ok_or_else(|| Error::BadRequest(format!("unsupported tile format \"{ext}\"")))?;

        let y = flip_row(grid, row, z)?;
        if !link.allows(col, y, z) {
            return Err(Error::NotFound(format!(
                "tile (row {row}, col {col}) not available at matrix {z}"
            )));
        }

        let mut tile = TileId::new(layer, grid.name.clone(), col, y, z);
        tile.dimensions = dimensions;
        Ok(ServiceRequest::GetTile(GetTileRequest {
            tile,
            format: Some(format),
        }))
    }
}

/// WMTS rows grow downward from the top of the grid extent.
fn flip_row(grid: &Grid, row: u32, z: usize) -> Result<u32> {
    let level = grid.level(z)?;
    if row >= level.max_y {
        return Err(Error::NotFound(format!(
            "tile row {row} does not exist at matrix {z}"
        )));
    }
    Ok(match grid.origin {
        GridOrigin::BottomLeft => level.max_y - 1 - row,
        GridOrigin::TopLeft => row,
    })
}

impl Service for WmtsService {
    fn name(&self) -> &'static str {
        "wmts"
    }

    fn parse_request(
        &self,
        ctx: &RequestContext,
        segments: &[&str],
        request: &HttpRequest,
    ) -> Result<ServiceRequest> {
        match segments {
            [] => self.parse_kvp(ctx, request),
            [WMTS_VERSION, "WMTSCapabilities.xml"] => {
                Ok(ServiceRequest::GetCapabilities(GetCapabilitiesRequest {
                    tileset: None,
                    version: WMTS_VERSION.to_string(),
                }))
            }
            _ if segments[0] == WMTS_VERSION => self.parse_rest(ctx, segments),
            _ => Err(Error::BadRequest(format!(
                "received request with invalid path /{}",
                segments.join("/")
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
            "<Capabilities version=\"{WMTS_VERSION}\">\n  <Contents>\n"
        ));
        let mut names: Vec<&String> = config.tilesets.keys().collect();
        names.sort();
        for name in &names {
            let tileset = &config.tilesets[*name];
            doc.push_str("    <Layer>\n");
            doc.push_str(&format!(
                "      <Identifier>{}</Identifier>\n",
                xml_escape(name)
            ));
            doc.push_str(&format!(
                "      <Format>{}</Format>\n",
                tileset.format.mime()
            ));
            for link in &tileset.grid_links {
                doc.push_str(&format!(
                    "      <TileMatrixSetLink><TileMatrixSet>{}</TileMatrixSet></TileMatrixSetLink>\n",
                    xml_escape(&link.grid.name)
                ));
            }
            doc.push_str(&format!(
                "      <ResourceURL format=\"{}\" resourceType=\"tile\" \
                 template=\"{}/wmts/{WMTS_VERSION}/{}/default/{{TileMatrixSet}}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.{}\"/>\n",
                tileset.format.mime(),
                base_url,
                xml_escape(name),
                tileset.format.extension()
            ));
            doc.push_str("    </Layer>\n");
        }

        let mut grids: Vec<&String> = config.grids.keys().collect();
        grids.sort();
        for name in grids {
            let grid = &config.grids[name];
            doc.push_str(&format!(
                "    <TileMatrixSet><Identifier>{}</Identifier>\
                 <SupportedCRS>{}</SupportedCRS></TileMatrixSet>\n",
                xml_escape(name),
                xml_escape(&grid.srs)
            ));
        }
        doc.push_str("  </Contents>\n</Capabilities>\n");
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
