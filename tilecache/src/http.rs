//! Host-agnostic HTTP request/response types.
//!
//! The engine never owns a listening socket; the embedding host hands the
//! dispatcher an [`HttpRequest`] and writes back whatever [`HttpResponse`]
//! comes out. Conditional-GET and cache-lifetime headers are assembled
//! here.

use crate::error::Error;
use crate::tile::StoredTile;
use crate::tileset::Tileset;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::SystemTime;

/// Request methods the engine accepts; anything else is a 405.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

/// An inbound request, as seen after alias routing.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Full public URL of the request, used to rebuild service base URLs.
    pub url: String,
    /// Path suffix after the matched alias.
    pub path_info: String,
    /// Decoded query parameters in order of appearance.
    pub params: Vec<(String, String)>,
    /// Inbound headers, stored with lowercased names.
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub remote_ip: Option<String>,
    /// Name of the serving host, for `X-Forwarded-Server`.
    pub server_name: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, path_info: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            path_info: path_info.into(),
            params: Vec::new(),
            headers: HashMap::new(),
            body: None,
            remote_ip: None,
            server_name: None,
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.params = parse_query(query);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive query parameter lookup (KVP services require it).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Decode an `application/x-www-form-urlencoded` query string.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (urldecode(k), urldecode(v)),
            None => (urldecode(pair), String::new()),
        })
        .collect()
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => match (hex(bytes.get(i + 1)), hex(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: Option<&u8>) -> Option<u8> {
    (*b? as char).to_digit(16).map(|d| d as u8)
}

/// The dispatcher's output.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub mtime: Option<SystemTime>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            mtime: None,
            body: Bytes::new(),
        }
    }

    pub fn ok(body: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self::new(200)
            .with_header("Content-Type", mime)
            .with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.headers
            .push(("Last-Modified".to_string(), format_http_date(mtime)));
        self.mtime = Some(mtime);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Error responses carry the message as a plain-text body.
    pub fn from_error(err: &Error) -> Self {
        Self::new(err.status_code())
            .with_header("Content-Type", "text/plain")
            .with_body(err.to_string())
    }
}

/// Build the response for a served tile: payload, `Last-Modified`,
/// `Cache-Control`, diagnostics, and the conditional-GET short circuit.
pub fn tile_response(
    tileset: &Tileset,
    stored: &StoredTile,
    if_modified_since: Option<&str>,
) -> HttpResponse {
    if let Some(since) = if_modified_since.and_then(parse_http_date) {
        if http_date_secs(stored.mtime) <= http_date_secs(since) {
            return HttpResponse::new(304).with_mtime(stored.mtime);
        }
    }

    let mut response = HttpResponse::ok(stored.data.bytes.clone(), stored.data.mime.clone())
        .with_mtime(stored.mtime)
        .with_header("X-Tilecache-Tileset", tileset.name.clone());
    if let Some(expires) = tileset.expires {
        response = response.with_header("Cache-Control", format!("max-age={expires}"));
    }
    response
}

/// Format a wall-clock instant as an RFC822 HTTP date (`GMT` suffix).
pub fn format_http_date(time: SystemTime) -> String {
    let dt: DateTime<Utc> = time.into();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date from a conditional header.
pub fn parse_http_date(s: &str) -> Option<SystemTime> {
    let s = s.trim();
    let parsed = DateTime::parse_from_rfc2822(&s.replace("GMT", "+0000")).ok()?;
    Some(parsed.with_timezone(&Utc).into())
}

/// HTTP dates carry second granularity; compare on whole seconds.
fn http_date_secs(time: SystemTime) -> i64 {
    let dt: DateTime<Utc> = time.into();
    dt.timestamp()
}
