#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bulk parcel geometry for one municipality.
//!
//! [`fetch_parcels`] downloads the municipality's INSPIRE cadastral parcel
//! archive into a scoped temporary directory, extracts it, parses the GML
//! file it contains, reprojects every outline into the canonical reference,
//! and returns normalized [`Parcel`] records. [`export`] writes parcel sets
//! back out as `GeoJSON`.

pub mod archive;
pub mod crs;
pub mod download;
pub mod export;
pub mod gml;
pub mod normalize;

#[cfg(test)]
mod test_fixtures;

use std::time::Duration;

use catastro_config::GeometrySourceConfig;
use catastro_parcel_models::{Municipality, Parcel};

use crate::crs::Crs;

/// Archive downloads can be large; allow more than the lookup timeout.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from the geometry stage.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The request or body stream failed.
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        /// Request URL.
        url: String,
        /// Underlying HTTP error.
        source: reqwest::Error,
    },

    /// Non-success HTTP status other than 404.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The archive is corrupt, has no geometry file, or the GML is not
    /// well-formed.
    #[error("Extraction failed for {path}: {message}")]
    Extraction {
        /// Archive or file path.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// The source data lacks an expected attribute.
    #[error("Schema error: {message}")]
    Schema {
        /// What is missing.
        message: String,
    },

    /// The configured canonical reference is not supported.
    #[error("Unsupported coordinate reference EPSG:{epsg}")]
    UnsupportedCrs {
        /// EPSG code.
        epsg: u32,
    },

    /// I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builds the HTTP client used for archive downloads.
///
/// # Errors
///
/// Returns [`GeometryError::Fetch`] if the client cannot be constructed.
pub fn build_client(config: &GeometrySourceConfig) -> Result<reqwest::Client, GeometryError> {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| GeometryError::Fetch {
            url: config.url_template.clone(),
            source: e,
        })
}

/// Fetches and normalizes every parcel of one municipality.
///
/// A municipality without a published archive (404) or with an empty
/// archive yields no parcels. Individual features that cannot be
/// normalized are skipped.
///
/// # Errors
///
/// Returns [`GeometryError`] if the download fails, the archive is corrupt
/// or has no GML file, or the dataset lacks the reference attribute.
pub async fn fetch_parcels(
    client: &reqwest::Client,
    config: &GeometrySourceConfig,
    municipality: &Municipality,
) -> Result<Vec<Parcel>, GeometryError> {
    let canonical = Crs::from_epsg(config.canonical_epsg).ok_or(GeometryError::UnsupportedCrs {
        epsg: config.canonical_epsg,
    })?;

    let url = config.archive_url(
        &municipality.province_code,
        &municipality.code,
        &municipality.name,
    );

    let workdir = tempfile::tempdir().map_err(|e| GeometryError::Io {
        path: std::env::temp_dir().display().to_string(),
        source: e,
    })?;
    let archive_path = workdir.path().join(format!("{}.zip", municipality.code));

    let Some(size) = download::download_archive(client, &url, &archive_path).await? else {
        log::info!("{}: no parcel archive, nothing to load", municipality.name);
        return Ok(Vec::new());
    };
    if size == 0 {
        log::warn!("{}: parcel archive is empty", municipality.name);
        return Ok(Vec::new());
    }

    let files = archive::extract_archive(&archive_path, &workdir.path().join("extracted"))?;
    if files.is_empty() {
        log::warn!("{}: parcel archive has no files", municipality.name);
        return Ok(Vec::new());
    }

    let gml_path = archive::find_parcel_gml(&files).ok_or_else(|| {
        GeometryError::Extraction {
            path: archive_path.display().to_string(),
            message: "no .gml file in archive".to_string(),
        }
    })?;

    let features = gml::read_features_from_path(gml_path)?;
    log::info!(
        "{}: read {} features from {}",
        municipality.name,
        features.len(),
        gml_path.file_name().map_or_else(
            || gml_path.display().to_string(),
            |n| n.to_string_lossy().into_owned()
        )
    );

    normalize::normalize_features(
        features,
        municipality,
        config,
        canonical,
        chrono::Utc::now(),
    )
}
