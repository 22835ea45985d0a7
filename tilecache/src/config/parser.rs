//! INI configuration parsing.
//!
//! One file per alias. Entities live in typed sections (`[grid:name]`,
//! `[source:name]`, `[cache:name]`, `[locker]`, `[tileset:name]`,
//! `[service:name]`, `[proxy:name]`); references are validated as they
//! resolve, and multitier caches may only reference caches declared
//! earlier in the file.

use super::defaults::default_cache_directory;
use super::settings::{Configuration, ServiceEntry};
use crate::cache::{DiskStore, MemcacheStore, MemoryStore, MultiTierStore, TileStore};
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid, GridLink, GridOrigin};
use crate::locker::{DiskLocker, FallbackLocker, Locker, MemcacheLocker};
use crate::memcached::ServerAddr;
use crate::proxy::ProxyRule;
use crate::service::{TmsService, WmsService, WmtsService};
use crate::source::WmsSource;
use crate::tile::TileFormat;
use crate::tileset::{MapStrategy, Tileset};
use crate::util::parse_size;
use ini::{Ini, Properties};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Load and validate a configuration file.
pub fn load(path: &Path) -> Result<Configuration> {
    let ini = Ini::load_from_file(path).map_err(|e| {
        Error::BadRequest(format!(
            "failed to read configuration {}: {e}",
            path.display()
        ))
    })?;
    parse_ini(&ini)
}

/// Parse a configuration from INI text.
pub fn parse_str(text: &str) -> Result<Configuration> {
    let ini = Ini::load_from_str(text)
        .map_err(|e| Error::BadRequest(format!("failed to parse configuration: {e}")))?;
    parse_ini(&ini)
}

fn parse_ini(ini: &Ini) -> Result<Configuration> {
    let mut config = Configuration::new();

    // Grids and sources first: caches and tilesets may reference them
    // wherever they appear in the file.
    for (section, props) in sections(ini, "grid") {
        let grid = parse_grid(&section, props)?;
        config.grids.insert(section, Arc::new(grid));
    }
    for (section, props) in sections(ini, "source") {
        let source = parse_source(&section, props)?;
        config.sources.insert(section, Arc::new(source));
    }

    // Caches resolve in file order so multitier members must be declared
    // before the multitier that stacks them.
    for (section, props) in sections(ini, "cache") {
        let cache = parse_cache(&section, props, &config)?;
        config.caches.insert(section, cache);
    }

    // Named lockers before the main [locker], which may chain them.
    let mut named_lockers: HashMap<String, Arc<dyn Locker>> = HashMap::new();
    for (section, props) in sections(ini, "locker") {
        let locker = parse_locker(&section, props, &named_lockers)?;
        named_lockers.insert(section, locker);
    }
    if let Some(props) = ini.section(Some("locker")) {
        config.locker = parse_locker("locker", props, &named_lockers)?;
    }

    for (section, props) in sections(ini, "tileset") {
        let tileset = parse_tileset(&section, props, &config)?;
        config.tilesets.insert(section, Arc::new(tileset));
    }

    for (section, props) in sections(ini, "service") {
        let entry = parse_service(&section, props)?;
        config.services.insert(section, entry);
    }

    for (section, props) in sections(ini, "proxy") {
        let rule = parse_proxy(&section, props)?;
        config.proxy_rules.push(Arc::new(rule));
    }

    Ok(config)
}

/// All `[kind:name]` sections in file order, as `(name, properties)`.
fn sections<'i>(ini: &'i Ini, kind: &'static str) -> Vec<(String, &'i Properties)> {
    ini.iter()
        .filter_map(move |(section, props)| {
            let section = section?;
            let (prefix, name) = section.split_once(':')?;
            (prefix == kind).then(|| (name.to_string(), props))
        })
        .collect()
}

fn required<'p>(props: &'p Properties, section: &str, key: &str) -> Result<&'p str> {
    props.get(key).ok_or_else(|| {
        Error::BadRequest(format!("section \"{section}\" is missing key \"{key}\""))
    })
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::BadRequest(format!(
            "section \"{section}\": key \"{key}\" expects a boolean, got \"{value}\""
        ))),
    }
}

fn opt_bool(props: &Properties, section: &str, key: &str) -> Result<bool> {
    match props.get(key) {
        Some(value) => parse_bool(section, key, value),
        None => Ok(false),
    }
}

fn parse_extent(section: &str, value: &str) -> Result<Extent> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| {
            Error::BadRequest(format!("section \"{section}\": invalid extent \"{value}\""))
        })?;
    let [minx, miny, maxx, maxy] = parts.as_slice() else {
        return Err(Error::BadRequest(format!(
            "section \"{section}\": extent needs four values, got \"{value}\""
        )));
    };
    Ok(Extent::new(*minx, *miny, *maxx, *maxy))
}

/// `WxH` or a single number used for both axes.
fn parse_pair(section: &str, key: &str, value: &str) -> Result<(u32, u32)> {
    let parse_one = |s: &str| {
        s.trim().parse::<u32>().map_err(|_| {
            Error::BadRequest(format!(
                "section \"{section}\": key \"{key}\" expects dimensions, got \"{value}\""
            ))
        })
    };
    match value.split_once(['x', 'X']) {
        Some((w, h)) => Ok((parse_one(w)?, parse_one(h)?)),
        None => {
            let n = parse_one(value)?;
            Ok((n, n))
        }
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value.trim().parse().unwrap_or(0.0);
    if secs <= 0.0 {
        return Err(Error::BadRequest(format!(
            "failed to parse {key} seconds \"{value}\". Expecting a positive number"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_servers(props: &Properties, section: &str) -> Result<Vec<ServerAddr>> {
    let servers: Vec<ServerAddr> = props
        .get_all("server")
        .flat_map(str::split_whitespace)
        .map(ServerAddr::parse)
        .collect::<Result<_>>()?;
    if servers.is_empty() {
        return Err(Error::BadRequest(format!(
            "section \"{section}\": no server provided"
        )));
    }
    Ok(servers)
}

fn parse_grid(name: &str, props: &Properties) -> Result<Grid> {
    let section = format!("grid:{name}");
    let srs = required(props, &section, "srs")?;
    let extent = parse_extent(&section, required(props, &section, "extent")?)?;
    let (tile_w, tile_h) = match props.get("tile_size") {
        Some(value) => parse_pair(&section, "tile_size", value)?,
        None => (256, 256),
    };
    let origin = match props.get("origin").unwrap_or("bottom-left") {
        "bottom-left" => GridOrigin::BottomLeft,
        "top-left" => GridOrigin::TopLeft,
        other => {
            return Err(Error::BadRequest(format!(
                "section \"{section}\": unknown origin \"{other}\""
            )))
        }
    };

    let resolutions: Vec<f64> = match (props.get("resolutions"), props.get("levels")) {
        (Some(list), _) => list
            .split_whitespace()
            .map(|r| {
                r.parse::<f64>().map_err(|_| {
                    Error::BadRequest(format!(
                        "section \"{section}\": invalid resolution \"{r}\""
                    ))
                })
            })
            .collect::<Result<_>>()?,
        (None, Some(levels)) => {
            let levels: usize = levels.parse().map_err(|_| {
                Error::BadRequest(format!(
                    "section \"{section}\": invalid level count \"{levels}\""
                ))
            })?;
            let mut res = (extent.maxx - extent.minx) / tile_w as f64;
            let mut list = Vec::with_capacity(levels);
            for _ in 0..levels {
                list.push(res);
                res /= 2.0;
            }
            list
        }
        (None, None) => {
            return Err(Error::BadRequest(format!(
                "section \"{section}\" needs either \"resolutions\" or \"levels\""
            )))
        }
    };

    Grid::from_resolutions(name, srs, extent, tile_w, tile_h, origin, &resolutions)
}

fn parse_source(name: &str, props: &Properties) -> Result<WmsSource> {
    let section = format!("source:{name}");
    match props.get("type").unwrap_or("wms") {
        "wms" => {
            let url = required(props, &section, "url")?;
            let layers = required(props, &section, "layers")?;
            let mut source = WmsSource::new(name, url, layers)?;
            for (key, value) in props.iter() {
                if let Some(param) = key.strip_prefix("param.") {
                    source = source.with_param(param, value);
                }
            }
            Ok(source)
        }
        other => Err(Error::BadRequest(format!(
            "section \"{section}\": unknown source type \"{other}\""
        ))),
    }
}

fn parse_cache(
    name: &str,
    props: &Properties,
    config: &Configuration,
) -> Result<Arc<dyn TileStore>> {
    let section = format!("cache:{name}");
    match required(props, &section, "type")? {
        "memory" => {
            let max_size = match props.get("max_size") {
                Some(value) => parse_size(value)?,
                None => MemoryStore::DEFAULT_MAX_SIZE,
            };
            Ok(Arc::new(MemoryStore::new(name, max_size)))
        }
        "disk" => {
            let directory = props
                .get("directory")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_cache_directory(name));
            let mut store = DiskStore::new(name, directory)
                .with_detect_blank(opt_bool(props, &section, "detect_blank")?);
            if let Some(template) = props.get("template") {
                store = store.with_template(template);
            }
            if let Some(extension) = props.get("extension") {
                store = store.with_extension(extension);
            }
            Ok(Arc::new(store))
        }
        "memcache" => {
            let servers = parse_servers(props, &section)?;
            let mut store = MemcacheStore::new(name, servers)
                .with_detect_blank(opt_bool(props, &section, "detect_blank")?);
            if let Some(template) = props.get("key_template") {
                store = store.with_key_template(template);
            }
            if let Some(expires) = props.get("expires") {
                let expires: u32 = expires.parse().map_err(|_| {
                    Error::BadRequest(format!(
                        "section \"{section}\": invalid expires \"{expires}\""
                    ))
                })?;
                store = store.with_expires(expires);
            }
            Ok(Arc::new(store))
        }
        "multitier" => {
            let tier_names: Vec<&str> = required(props, &section, "tiers")?
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .collect();
            let writer = props.get("write");
            if let Some(writer) = writer {
                if !tier_names.contains(&writer) {
                    return Err(Error::BadRequest(format!(
                        "multitier cache \"{name}\" writer \"{writer}\" is not one of its tiers"
                    )));
                }
            }
            let mut tiers = Vec::with_capacity(tier_names.len());
            for tier_name in tier_names {
                let store = config.cache(tier_name).cloned().ok_or_else(|| {
                    Error::BadRequest(format!(
                        "multitier cache \"{name}\" references cache \"{tier_name}\", but it \
                         is not configured (hint: referenced caches must be declared before \
                         this multitier cache)"
                    ))
                })?;
                let write = writer.map(|w| w == store.name());
                tiers.push((store, write));
            }
            Ok(Arc::new(MultiTierStore::new(name, tiers)?))
        }
        other => Err(Error::BadRequest(format!(
            "section \"{section}\": unknown cache type \"{other}\""
        ))),
    }
}

fn parse_locker(
    section: &str,
    props: &Properties,
    named: &HashMap<String, Arc<dyn Locker>>,
) -> Result<Arc<dyn Locker>> {
    let retry = match props.get("retry") {
        Some(value) => Some(parse_seconds("retry", value)?),
        None => None,
    };
    let timeout = match props.get("timeout") {
        Some(value) => Some(parse_seconds("timeout", value)?),
        None => None,
    };

    match props.get("type").unwrap_or("disk") {
        "disk" => {
            let dir = props
                .get("directory")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir);
            let mut locker = DiskLocker::new(dir);
            if let Some(retry) = retry {
                locker = locker.with_retry_interval(retry);
            }
            if let Some(timeout) = timeout {
                locker = locker.with_timeout(timeout);
            }
            Ok(Arc::new(locker))
        }
        "memcache" => {
            let servers = parse_servers(props, section)?;
            let mut locker = MemcacheLocker::new(servers);
            if let Some(prefix) = props.get("key_prefix") {
                locker = locker.with_key_prefix(prefix);
            }
            if let Some(retry) = retry {
                locker = locker.with_retry_interval(retry);
            }
            if let Some(timeout) = timeout {
                locker = locker.with_timeout(timeout);
            }
            Ok(Arc::new(locker))
        }
        "fallback" => {
            let children: Vec<Arc<dyn Locker>> = required(props, section, "children")?
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(|child| {
                    named.get(child).cloned().ok_or_else(|| {
                        Error::BadRequest(format!(
                            "fallback locker references unknown locker \"{child}\""
                        ))
                    })
                })
                .collect::<Result<_>>()?;
            let mut locker = FallbackLocker::new(children)?;
            if let Some(retry) = retry {
                locker = locker.with_retry_interval(retry);
            }
            if let Some(timeout) = timeout {
                locker = locker.with_timeout(timeout);
            }
            Ok(Arc::new(locker))
        }
        other => Err(Error::BadRequest(format!(
            "section \"{section}\": unknown locker type \"{other}\" \
             (allowed are disk, memcache and fallback)"
        ))),
    }
}

fn parse_tileset(name: &str, props: &Properties, config: &Configuration) -> Result<Tileset> {
    let section = format!("tileset:{name}");
    let mut tileset = Tileset::new(name);

    if let Some(source) = props.get("source") {
        let source = config.source(source).cloned().ok_or_else(|| {
            Error::BadRequest(format!(
                "tileset \"{name}\" references unknown source \"{source}\""
            ))
        })?;
        tileset = tileset.with_source(source);
    }
    if let Some(cache) = props.get("cache") {
        let cache = config.cache(cache).cloned().ok_or_else(|| {
            Error::BadRequest(format!(
                "tileset \"{name}\" references unknown cache \"{cache}\""
            ))
        })?;
        tileset = tileset.with_cache(cache);
    }

    let restricted = match props.get("extent") {
        Some(value) => Some(parse_extent(&section, value)?),
        None => None,
    };
    let min_zoom: Option<usize> = match props.get("min_zoom") {
        Some(value) => Some(value.parse().map_err(|_| {
            Error::BadRequest(format!("section \"{section}\": invalid min_zoom"))
        })?),
        None => None,
    };
    let max_zoom: Option<usize> = match props.get("max_zoom") {
        Some(value) => Some(value.parse().map_err(|_| {
            Error::BadRequest(format!("section \"{section}\": invalid max_zoom"))
        })?),
        None => None,
    };

    for grid_name in required(props, &section, "grids")?.split([' ', ',']) {
        if grid_name.is_empty() {
            continue;
        }
        let grid = config.grid(grid_name).cloned().ok_or_else(|| {
            Error::BadRequest(format!(
                "tileset \"{name}\" references unknown grid \"{grid_name}\""
            ))
        })?;
        let mut link = GridLink::new(grid);
        link.restricted_extent = restricted;
        if let Some(min_zoom) = min_zoom {
            link.min_zoom = min_zoom;
        }
        if let Some(max_zoom) = max_zoom {
            link.max_zoom = max_zoom.min(link.max_zoom);
        }
        tileset = tileset.with_grid_link(link);
    }

    if let Some(format) = props.get("format") {
        let format = TileFormat::from_name(format).ok_or_else(|| {
            Error::BadRequest(format!(
                "section \"{section}\": unknown format \"{format}\""
            ))
        })?;
        tileset = tileset.with_format(format);
    }
    if let Some(metatile) = props.get("metatile") {
        let (w, h) = parse_pair(&section, "metatile", metatile)?;
        tileset = tileset.with_metatile(w, h);
    }
    if let Some(metabuffer) = props.get("metabuffer") {
        let buffer: u32 = metabuffer.parse().map_err(|_| {
            Error::BadRequest(format!("section \"{section}\": invalid metabuffer"))
        })?;
        tileset = tileset.with_metabuffer(buffer);
    }
    if let Some(expires) = props.get("expires") {
        let expires: u32 = expires.parse().map_err(|_| {
            Error::BadRequest(format!("section \"{section}\": invalid expires"))
        })?;
        tileset = tileset.with_expires(expires);
    }
    tileset = tileset.with_read_only(opt_bool(props, &section, "read_only")?);
    if let Some(path) = props.get("watermark") {
        let watermark = image::open(path)
            .map_err(|e| {
                Error::BadRequest(format!(
                    "tileset \"{name}\" failed to load watermark {path}: {e}"
                ))
            })?
            .to_rgba8();
        tileset = tileset.with_watermark(watermark);
    }
    if let Some(strategy) = props.get("map_strategy") {
        let strategy = match strategy {
            "assemble" => MapStrategy::Assemble,
            "forward" => MapStrategy::Forward,
            other => {
                return Err(Error::BadRequest(format!(
                    "section \"{section}\": unknown map_strategy \"{other}\""
                )))
            }
        };
        tileset = tileset.with_map_strategy(strategy);
    }
    for (key, value) in props.iter() {
        if let Some(dimension) = key.strip_prefix("dimension.") {
            tileset = tileset.with_dimension(dimension, value);
        }
    }

    Ok(tileset)
}

fn parse_service(name: &str, props: &Properties) -> Result<ServiceEntry> {
    let section = format!("service:{name}");
    let enabled = match props.get("enabled") {
        Some(value) => parse_bool(&section, "enabled", value)?,
        None => true,
    };
    let error_tile = opt_bool(props, &section, "error_tile")?;
    let service: Arc<dyn crate::service::Service> = match name {
        "tms" => Arc::new(TmsService::new().with_error_tile(error_tile)),
        "wmts" => Arc::new(WmtsService::new().with_error_tile(error_tile)),
        "wms" => Arc::new(WmsService::new()),
        other => {
            return Err(Error::BadRequest(format!(
                "unknown service type \"{other}\" (allowed are tms, wmts and wms)"
            )))
        }
    };
    Ok(ServiceEntry { service, enabled })
}

fn parse_proxy(name: &str, props: &Properties) -> Result<ProxyRule> {
    let section = format!("proxy:{name}");
    let upstream = required(props, &section, "upstream")?;
    let mut rule = ProxyRule::new(name, upstream)?;
    if let Some(limit) = props.get("max_post_len") {
        rule = rule.with_max_post_len(parse_size(limit)?);
    }
    for (key, value) in props.iter() {
        if let Some(param) = key.strip_prefix("rewrite.") {
            rule = rule.with_rewrite(param, value);
        }
    }
    Ok(rule)
}
