//! Upstream tile sources.
//!
//! A source renders (or fetches) imagery for a ground extent. The shipped
//! implementation forwards to a WMS server over HTTP; the trait is the seam
//! for anything else that can produce pixels for a bounding box.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::grid::Extent;
use crate::tile::{TileData, TileFormat};
use std::time::Duration;
use tracing::{debug, warn};

/// One render request: pixels for a projected extent.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub extent: Extent,
    pub srs: String,
    pub width: u32,
    pub height: u32,
    pub format: TileFormat,
    pub dimensions: Vec<(String, String)>,
}

/// A feature-info probe at a pixel of a rendered area.
#[derive(Debug, Clone)]
pub struct FeatureInfoQuery {
    pub extent: Extent,
    pub srs: String,
    pub width: u32,
    pub height: u32,
    /// Pixel column of interest.
    pub i: u32,
    /// Pixel row of interest.
    pub j: u32,
    pub info_format: String,
    pub dimensions: Vec<(String, String)>,
}

/// Anything that can produce imagery for a ground extent.
#[async_trait::async_trait]
pub trait TileSource: Send + Sync {
    fn name(&self) -> &str;

    /// Produce an encoded image covering the job's extent.
    async fn render(&self, ctx: &RequestContext, job: &RenderJob) -> Result<TileData>;

    /// Identify features at a point; the payload is in `info_format`.
    async fn query(&self, ctx: &RequestContext, query: &FeatureInfoQuery) -> Result<TileData>;
}

/// WMS upstream: renders through GetMap, queries through GetFeatureInfo.
pub struct WmsSource {
    name: String,
    url: String,
    layers: String,
    extra_params: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WmsSource {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        layers: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            layers: layers.into(),
            extra_params: Vec::new(),
            client,
        })
    }

    /// Extra query parameters appended to every upstream request.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((name.into(), value.into()));
        self
    }

    fn base_params(&self, extent: &Extent, srs: &str, width: u32, height: u32) -> Vec<(String, String)> {
        let mut params = vec![
            ("SERVICE".to_string(), "WMS".to_string()),
            ("VERSION".to_string(), "1.1.1".to_string()),
            ("SRS".to_string(), srs.to_string()),
            (
                "BBOX".to_string(),
                format!(
                    "{},{},{},{}",
                    extent.minx, extent.miny, extent.maxx, extent.maxy
                ),
            ),
            ("WIDTH".to_string(), width.to_string()),
            ("HEIGHT".to_string(), height.to_string()),
        ];
        params.extend(self.extra_params.iter().cloned());
        params
    }

    /// Full GetMap URL for a render job (visible for tests).
    pub fn getmap_url(&self, job: &RenderJob) -> String {
        let mut params = self.base_params(&job.extent, &job.srs, job.width, job.height);
        params.push(("REQUEST".to_string(), "GetMap".to_string()));
        params.push(("LAYERS".to_string(), self.layers.clone()));
        params.push(("FORMAT".to_string(), job.format.mime().to_string()));
        params.push(("TRANSPARENT".to_string(), "TRUE".to_string()));
        params.extend(job.dimensions.iter().cloned());
        append_query(&self.url, &params)
    }

    /// Full GetFeatureInfo URL for a query (visible for tests).
    pub fn getfeatureinfo_url(&self, query: &FeatureInfoQuery) -> String {
        let mut params = self.base_params(&query.extent, &query.srs, query.width, query.height);
        params.push(("REQUEST".to_string(), "GetFeatureInfo".to_string()));
        params.push(("LAYERS".to_string(), self.layers.clone()));
        params.push(("QUERY_LAYERS".to_string(), self.layers.clone()));
        params.push(("X".to_string(), query.i.to_string()));
        params.push(("Y".to_string(), query.j.to_string()));
        params.push(("INFO_FORMAT".to_string(), query.info_format.clone()));
        params.extend(query.dimensions.iter().cloned());
        append_query(&self.url, &params)
    }

    async fn fetch(&self, url: &str, expect_image: bool) -> Result<TileData> {
        debug!(source = self.name, url = url, "upstream request");
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(source = self.name, error = %e, "upstream request failed");
            Error::Unavailable(format!("source \"{}\" is unreachable: {e}", self.name))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Unavailable(format!(
                "source \"{}\" answered HTTP {status}",
                self.name
            )));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        if expect_image && !mime.starts_with("image/") {
            // WMS servers report errors as XML documents with a 200 status.
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "source \"{}\" returned \"{mime}\" instead of an image: {}",
                self.name,
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            Error::Unavailable(format!(
                "failed to read response from source \"{}\": {e}",
                self.name
            ))
        })?;
        Ok(TileData::new(bytes, mime))
    }
}

#[async_trait::async_trait]
impl TileSource for WmsSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn render(&self, _ctx: &RequestContext, job: &RenderJob) -> Result<TileData> {
        self.fetch(&self.getmap_url(job), true).await
    }

    async fn query(&self, _ctx: &RequestContext, query: &FeatureInfoQuery) -> Result<TileData> {
        self.fetch(&self.getfeatureinfo_url(query), false).await
    }
}

fn append_query(url: &str, params: &[(String, String)]) -> String {
    let mut out = String::from(url);
    let mut separator = if url.contains('?') { '&' } else { '?' };
    for (name, value) in params {
        out.push(separator);
        out.push_str(&urlencode(name));
        out.push('=');
        out.push_str(&urlencode(value));
        separator = '&';
    }
    out
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' | b':' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
