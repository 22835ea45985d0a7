//! tilecache - a multi-tier map-tile caching engine.
//!
//! The engine sits between map clients (TMS/WMTS/WMS consumers) and
//! upstream rendering servers: tiles are served from stacked cache
//! backends and, on miss, rendered upstream under a distributed lock so
//! concurrent requests for the same metatile coalesce into one render.
//!
//! The embedding host routes URLs through an alias table
//! ([`router::HostRouter`]), builds an [`http::HttpRequest`], and hands it
//! to [`dispatch::dispatch`]:
//!
//! ```ignore
//! use tilecache::{config, dispatch, http::HttpRequest, context::RequestContext};
//! use std::sync::Arc;
//!
//! let configuration = Arc::new(config::load(Path::new("/etc/tilecache/tiles.ini"))?);
//! let pool = Arc::new(tilecache::pool::ConnectionPool::with_defaults());
//! let ctx = RequestContext::new(configuration, pool);
//!
//! let request = HttpRequest::get("http://host/tiles/tms/1.0.0/roads/3/4/5.png",
//!                                "/tms/1.0.0/roads/3/4/5.png");
//! match dispatch::dispatch(&ctx, &request).await {
//!     dispatch::Dispatch::Response(response) => { /* write it out */ }
//!     dispatch::Dispatch::Decline => { /* not ours */ }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod grid;
pub mod http;
pub mod image_ops;
pub mod locker;
pub mod memcached;
pub mod pipeline;
pub mod pool;
pub mod proxy;
pub mod router;
pub mod service;
pub mod source;
pub mod tile;
pub mod tileset;
pub mod util;

pub use error::{Error, Result};

/// Version of the tilecache library and CLI.
///
/// Synchronized across all workspace members; injected at compile time
/// from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
