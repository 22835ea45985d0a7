//! Upstream request forwarding.
//!
//! A proxy rule forwards a request to a configured upstream URL, carrying
//! the original query string (plus configured rewrites), the original
//! method, and append-style `X-Forwarded-*` headers. POST bodies are
//! bounded by `max_post_len` before any upstream contact happens.

use crate::error::{Error, Result};
use crate::http::{HttpRequest, HttpResponse, Method};
use std::time::Duration;
use tracing::{debug, warn};

/// Default POST body cap: 10 MiB.
pub const DEFAULT_MAX_POST_LEN: usize = 10 * 1024 * 1024;

/// Response headers that must not be forwarded verbatim.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// One configured forwarding rule.
pub struct ProxyRule {
    name: String,
    upstream: String,
    max_post_len: usize,
    /// Query parameters appended to (or overriding) the inbound ones.
    rewrites: Vec<(String, String)>,
    client: reqwest::Client,
}

impl ProxyRule {
    pub fn new(name: impl Into<String>, upstream: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            upstream: upstream.into(),
            max_post_len: DEFAULT_MAX_POST_LEN,
            rewrites: Vec::new(),
            client,
        })
    }

    pub fn with_max_post_len(mut self, limit: usize) -> Self {
        self.max_post_len = limit;
        self
    }

    pub fn with_rewrite(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.rewrites.push((name.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upstream URL for a request: base plus extra path segments plus the
    /// merged query string (visible for tests).
    pub fn upstream_url(&self, remainder: &[String], request: &HttpRequest) -> String {
        let mut url = self.upstream.trim_end_matches('/').to_string();
        for segment in remainder {
            url.push('/');
            url.push_str(segment);
        }

        let mut params: Vec<(String, String)> = request
            .params
            .iter()
            .filter(|(k, _)| !self.rewrites.iter().any(|(rk, _)| rk.eq_ignore_ascii_case(k)))
            .cloned()
            .collect();
        params.extend(self.rewrites.iter().cloned());

        let mut separator = if url.contains('?') { '&' } else { '?' };
        for (name, value) in params {
            url.push(separator);
            url.push_str(&name);
            url.push('=');
            url.push_str(&value);
            separator = '&';
        }
        url
    }

    /// Append-style forwarding headers derived from the inbound request.
    pub fn forward_headers(&self, request: &HttpRequest) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        if let Some(client_ip) = &request.remote_ip {
            let value = match request.header("x-forwarded-for") {
                Some(existing) => format!("{existing}, {client_ip}"),
                None => client_ip.clone(),
            };
            headers.push(("X-Forwarded-For".to_string(), value));
        }

        if let Some(host) = request.header("host") {
            let value = match request.header("x-forwarded-host") {
                Some(existing) => format!("{existing}, {host}"),
                None => host.to_string(),
            };
            headers.push(("X-Forwarded-Host".to_string(), value));
        }

        if let Some(server) = &request.server_name {
            let value = match request.header("x-forwarded-server") {
                Some(existing) => format!("{existing}, {server}"),
                None => server.clone(),
            };
            headers.push(("X-Forwarded-Server".to_string(), value));
        }

        if request.method == Method::Post {
            if let Some(content_type) = request.header("content-type") {
                headers.push(("Content-Type".to_string(), content_type.to_string()));
            }
        }

        headers
    }

    /// Forward `request` upstream and relay the answer.
    pub async fn forward(
        &self,
        request: &HttpRequest,
        remainder: &[String],
    ) -> Result<HttpResponse> {
        let url = self.upstream_url(remainder, request);
        debug!(rule = self.name, url = %url, "proxying request");

        let mut builder = match &request.method {
            Method::Get => self.client.get(&url),
            Method::Post => {
                let body = request.body.clone().unwrap_or_default();
                if body.len() > self.max_post_len {
                    return Err(Error::TooLarge("post request too big".into()));
                }
                self.client.post(&url).body(body)
            }
            Method::Other(m) => {
                return Err(Error::MethodNotAllowed(format!(
                    "method {m} not supported by proxy"
                )))
            }
        };
        for (name, value) in self.forward_headers(request) {
            builder = builder.header(name, value);
        }

        let upstream = builder.send().await.map_err(|e| {
            warn!(rule = self.name, error = %e, "upstream request failed");
            Error::Unavailable(format!(
                "proxy rule \"{}\" failed to reach upstream: {e}",
                self.name
            ))
        })?;

        let mut response = HttpResponse::new(upstream.status().as_u16());
        for (name, value) in upstream.headers() {
            let name = name.as_str();
            if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                response = response.with_header(name, value);
            }
        }

        let body = upstream.bytes().await.map_err(|e| {
            Error::Unavailable(format!(
                "proxy rule \"{}\" failed to read upstream response: {e}",
                self.name
            ))
        })?;
        Ok(response.with_body(body))
    }
}
