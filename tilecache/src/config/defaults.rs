//! Built-in entities and configuration constants.

use crate::grid::Grid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The two grids every configuration starts with.
pub fn builtin_grids() -> HashMap<String, Arc<Grid>> {
    let mut grids = HashMap::new();
    let mercator = Grid::web_mercator();
    let geodetic = Grid::wgs84();
    grids.insert(mercator.name.clone(), Arc::new(mercator));
    grids.insert(geodetic.name.clone(), Arc::new(geodetic));
    grids
}

/// Default directory for a named disk cache when none is configured.
pub fn default_cache_directory(cache_name: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tilecache")
        .join(cache_name)
}
