//! Service front-ends: URL dialect parsers selected by path prefix.
//!
//! Each service turns an inbound path + query into one typed
//! [`ServiceRequest`]; the dispatcher executes the request against the
//! cache/render pipeline. Services also generate their own capabilities
//! documents and error artifacts.

mod tms;
mod wms;
mod wmts;

pub use tms::TmsService;
pub use wms::WmsService;
pub use wmts::WmtsService;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::grid::Extent;
use crate::http::{HttpRequest, HttpResponse};
use crate::tile::{TileFormat, TileId};

/// A parsed, typed request ready for execution.
#[derive(Debug, Clone)]
pub enum ServiceRequest {
    GetTile(GetTileRequest),
    GetMap(GetMapRequest),
    GetCapabilities(GetCapabilitiesRequest),
    GetFeatureInfo(GetFeatureInfoRequest),
    Proxy(ProxyRequest),
}

#[derive(Debug, Clone)]
pub struct GetTileRequest {
    pub tile: TileId,
    /// Format requested in the URL, validated against the tileset's.
    pub format: Option<TileFormat>,
}

#[derive(Debug, Clone)]
pub struct GetMapRequest {
    pub tileset: String,
    pub grid: Option<String>,
    pub extent: Extent,
    pub width: u32,
    pub height: u32,
    pub format: TileFormat,
    pub dimensions: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct GetCapabilitiesRequest {
    /// Restrict the document to one tileset when set.
    pub tileset: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct GetFeatureInfoRequest {
    pub tileset: String,
    pub grid: Option<String>,
    pub extent: Extent,
    pub width: u32,
    pub height: u32,
    pub i: u32,
    pub j: u32,
    pub info_format: String,
    pub dimensions: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Name of the configured forwarding rule.
    pub rule: String,
    /// Path segments after the rule name, appended to the upstream URL.
    pub remainder: Vec<String>,
}

/// One URL dialect (tms, wmts, ...).
pub trait Service: Send + Sync {
    /// Path segment that selects this service.
    fn name(&self) -> &'static str;

    /// Parse the path segments after the service name plus the query into a
    /// typed request.
    fn parse_request(
        &self,
        ctx: &RequestContext,
        segments: &[&str],
        request: &HttpRequest,
    ) -> Result<ServiceRequest>;

    /// Produce the service's capabilities document. `base_url` is the
    /// public URL of the alias root, without a trailing slash.
    fn capabilities(
        &self,
        ctx: &RequestContext,
        request: &GetCapabilitiesRequest,
        base_url: &str,
    ) -> Result<HttpResponse>;

    /// Error artifact in this service's preferred format. The default is a
    /// plain-text body with the mapped status code.
    fn error_response(&self, err: &Error) -> HttpResponse {
        HttpResponse::from_error(err)
    }
}

/// Escape a string for embedding in generated XML documents.
pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A solid red error tile, for clients that only render images.
///
/// Tile services configured with `error_tile` answer failures with this
/// artifact instead of a text body so broken map viewers show something
/// visibly wrong rather than a broken-image icon.
pub(crate) fn error_tile_response(err: &Error) -> HttpResponse {
    use image::{Rgba, RgbaImage};

    let tile = RgbaImage::from_pixel(256, 256, Rgba([255, 0, 0, 255]));
    match crate::image_ops::encode(&tile, TileFormat::Png) {
        Ok(data) => {
            let mut response = HttpResponse::ok(data.bytes, data.mime);
            response.status = err.status_code();
            response
        }
        Err(_) => HttpResponse::from_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
        assert_eq!(xml_escape("plain"), "plain");
    }
}
