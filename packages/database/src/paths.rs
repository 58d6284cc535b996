#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the local data directory.
//!
//! All paths are relative to the project root's `data/` directory. The
//! pipeline configuration defaults to these locations; explicit config or
//! environment overrides take precedence.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`. Falls back to the
/// current directory if the manifest path is shallower than expected.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the path of the cadastral `DuckDB` file.
#[must_use]
pub fn default_db_path() -> PathBuf {
    data_dir().join("catastro.duckdb")
}

/// Returns the directory receiving per-municipality `GeoJSON` exports.
#[must_use]
pub fn default_export_dir() -> PathBuf {
    data_dir().join("export")
}

/// Returns the export file path for one municipality.
#[must_use]
pub fn municipality_export_path(export_dir: &Path, municipality: &str) -> PathBuf {
    export_dir.join(format!("{municipality}_catastro_parcels.geojson"))
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
