//! Validate a configuration file and print what it declares.

use super::open;
use crate::error::CliError;

pub async fn run(config_path: &str) -> Result<(), CliError> {
    let (configuration, _ctx) = open(config_path)?;

    println!("configuration {config_path} is valid");
    let mut names: Vec<&String> = configuration.tilesets.keys().collect();
    names.sort();
    for name in names {
        let tileset = &configuration.tilesets[name];
        let grids: Vec<&str> = tileset
            .grid_links
            .iter()
            .map(|l| l.grid.name.as_str())
            .collect();
        println!(
            "  tileset {name}: grids [{}], format {}, metatile {}x{}{}",
            grids.join(", "),
            tileset.format.extension(),
            tileset.metatile.0,
            tileset.metatile.1,
            if tileset.read_only { ", read-only" } else { "" },
        );
    }

    let mut caches: Vec<&String> = configuration.caches.keys().collect();
    caches.sort();
    for name in caches {
        println!("  cache {name}");
    }

    let mut services: Vec<&String> = configuration.services.keys().collect();
    services.sort();
    for name in services {
        let entry = &configuration.services[name];
        println!(
            "  service {name}: {}",
            if entry.enabled { "enabled" } else { "disabled" }
        );
    }
    for rule in &configuration.proxy_rules {
        println!("  proxy {}", rule.name());
    }
    Ok(())
}
