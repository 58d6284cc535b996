#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline configuration and the embedded municipality registry.
//!
//! [`PipelineConfig`] is resolved once at startup (defaults, then an
//! optional TOML file, then environment overrides) and passed by reference
//! into every pipeline component. Nothing reads configuration from global
//! state after that point.

pub mod registry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "CATASTRO_CONFIG";

/// Environment variable overriding [`StorageConfig::db_path`].
pub const DB_PATH_ENV: &str = "CATASTRO_DB_PATH";

/// Environment variable overriding [`StorageConfig::export_dir`].
pub const EXPORT_DIR_ENV: &str = "CATASTRO_EXPORT_DIR";

/// Environment variable overriding [`PipelineConfig::batch_size`].
pub const BATCH_SIZE_ENV: &str = "CATASTRO_BATCH_SIZE";

/// Environment variable with a comma-separated municipality filter, used
/// when `--municipalities` is not given.
pub const MUNICIPALITIES_ENV: &str = "CATASTRO_MUNICIPALITIES";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`PipelineConfig`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Path that caused the error.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is present but unusable.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bulk geometry download settings.
    pub geometry: GeometrySourceConfig,
    /// Per-record lookup settings.
    pub lookup: LookupConfig,
    /// Database and export locations.
    pub storage: StorageConfig,
    /// Number of units accumulated before a batch is written.
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            geometry: GeometrySourceConfig::default(),
            lookup: LookupConfig::default(),
            storage: StorageConfig::default(),
            batch_size: 10,
        }
    }
}

/// Where and how parcel geometry archives are downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySourceConfig {
    /// URL template with `{layer}`, `{province_code}`, `{code}`, `{name}`,
    /// and `{layer_code}` placeholders.
    pub url_template: String,
    /// INSPIRE layer name.
    pub layer: String,
    /// INSPIRE layer code used in the archive file name.
    pub layer_code: String,
    /// Feature attribute holding the cadastral reference.
    pub reference_attribute: String,
    /// Feature attribute holding a land-use code, if the layer has one.
    pub land_use_attribute: String,
    /// EPSG code all persisted geometry is reprojected to.
    pub canonical_epsg: u32,
    /// User-Agent sent with archive downloads.
    pub user_agent: String,
}

impl Default for GeometrySourceConfig {
    fn default() -> Self {
        Self {
            url_template: "http://www.catastro.hacienda.gob.es/INSPIRE/{layer}/{province_code}/\
                           {code}-{name}/A.ES.SDGC.{layer_code}.{code}.zip"
                .to_string(),
            layer: "CadastralParcels".to_string(),
            layer_code: "CP".to_string(),
            reference_attribute: "nationalCadastralReference".to_string(),
            land_use_attribute: "currentUse".to_string(),
            canonical_epsg: 25830,
            user_agent: "catastro-ingest/0.1".to_string(),
        }
    }
}

impl GeometrySourceConfig {
    /// Expands [`Self::url_template`] for one municipality.
    #[must_use]
    pub fn archive_url(
        &self,
        province_code: &str,
        municipality_code: &str,
        municipality_name: &str,
    ) -> String {
        self.url_template
            .replace("{layer}", &self.layer)
            .replace("{layer_code}", &self.layer_code)
            .replace("{province_code}", province_code)
            .replace("{code}", municipality_code)
            .replace("{name}", municipality_name)
    }
}

/// Per-record lookup API settings, including the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// URL template with a `{refcat}` placeholder.
    pub url_template: String,
    /// `User-Agent` header.
    pub user_agent: String,
    /// `Accept` header.
    pub accept: String,
    /// `Referer` header.
    pub referer: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Pause after every request, in milliseconds.
    pub throttle_ms: u64,
    /// Extra sleep after a rate-limit status, in milliseconds.
    pub cooldown_ms: u64,
    /// Total number of attempts per parcel.
    pub max_attempts: u32,
    /// Backoff delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Factor applied to the delay for every further attempt.
    pub multiplier: u32,
    /// Upper bound for a single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            url_template: "https://ovc.catastro.meh.es/OVCServWeb/OVCWcfCallejero/\
                           COVCCallejero.svc/json/Consulta_DNPRC?RefCat={refcat}"
                .to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            accept: "application/json".to_string(),
            referer: "https://www1.sedecatastro.gob.es/".to_string(),
            timeout_secs: 15,
            throttle_ms: 15_000,
            cooldown_ms: 5_000,
            max_attempts: 3,
            base_delay_ms: 5_000,
            multiplier: 2,
            max_delay_ms: 60_000,
        }
    }
}

impl LookupConfig {
    /// Expands [`Self::url_template`] for one cadastral reference.
    #[must_use]
    pub fn lookup_url(&self, refcat: &str) -> String {
        self.url_template.replace("{refcat}", refcat)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Unconditional pause after every request.
    #[must_use]
    pub const fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Extra sleep after a rate-limit status.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Backoff delay after the first failed attempt.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound for a single backoff delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Database and export file locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Directory receiving per-municipality `GeoJSON` exports.
    pub export_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data").join("catastro.duckdb"),
            export_dir: PathBuf::from("data").join("export"),
        }
    }
}

impl PipelineConfig {
    /// Parses a configuration from TOML text. Missing keys take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid TOML for
    /// this schema, or [`ConfigError::Invalid`] if validation fails.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration: defaults, then the TOML file at `path` (or
    /// the one named by `CATASTRO_CONFIG`), then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(env_path);

        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                Self::from_toml_str(&text, &path.display().to_string())?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a key lookup (normally the process
    /// environment).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override cannot be parsed.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(db_path) = lookup(DB_PATH_ENV) {
            self.storage.db_path = PathBuf::from(db_path);
        }
        if let Some(export_dir) = lookup(EXPORT_DIR_ENV) {
            self.storage.export_dir = PathBuf::from(export_dir);
        }
        if let Some(batch_size) = lookup(BATCH_SIZE_ENV) {
            self.batch_size = batch_size
                .trim()
                .parse()
                .map_err(|e| ConfigError::Invalid {
                    message: format!("{BATCH_SIZE_ENV}={batch_size:?}: {e}"),
                })?;
        }
        Ok(())
    }

    /// Checks invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "batch_size must be at least 1".to_string(),
            });
        }
        if self.lookup.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "lookup.max_attempts must be at least 1".to_string(),
            });
        }
        if self.lookup.multiplier == 0 {
            return Err(ConfigError::Invalid {
                message: "lookup.multiplier must be at least 1".to_string(),
            });
        }
        if !self.lookup.url_template.contains("{refcat}") {
            return Err(ConfigError::Invalid {
                message: "lookup.url_template must contain {refcat}".to_string(),
            });
        }
        if !matches!(
            self.geometry.canonical_epsg,
            4258 | 4326 | 25801..=25860 | 32601..=32660
        ) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "geometry.canonical_epsg {} is not a supported reference",
                    self.geometry.canonical_epsg
                ),
            });
        }
        if !self.geometry.url_template.contains("{code}") {
            return Err(ConfigError::Invalid {
                message: "geometry.url_template must contain {code}".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn defaults_match_service_settings() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.lookup.throttle(), Duration::from_secs(15));
        assert_eq!(config.lookup.max_attempts, 3);
        assert_eq!(config.lookup.base_delay(), Duration::from_secs(5));
        assert_eq!(config.geometry.canonical_epsg, 25830);
        config.validate().unwrap();
    }

    #[test]
    fn expands_archive_url() {
        let geometry = GeometrySourceConfig::default();
        assert_eq!(
            geometry.archive_url("07", "07001", "ALARO"),
            "http://www.catastro.hacienda.gob.es/INSPIRE/CadastralParcels/07/07001-ALARO/\
             A.ES.SDGC.CP.07001.zip"
        );
    }

    #[test]
    fn expands_lookup_url() {
        let lookup = LookupConfig::default();
        assert!(
            lookup
                .lookup_url("07001A00100001")
                .ends_with("Consulta_DNPRC?RefCat=07001A00100001")
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            "batch_size = 25\n\n[lookup]\nthrottle_ms = 100\n",
            "inline",
        )
        .unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.lookup.throttle_ms, 100);
        assert_eq!(config.lookup.cooldown_ms, 5_000);
        assert_eq!(config.geometry.layer_code, "CP");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = PipelineConfig::from_toml_str("batch_size = 0", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_unsupported_canonical_epsg() {
        let err = PipelineConfig::from_toml_str("[geometry]\ncanonical_epsg = 3857\n", "inline")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let config =
            PipelineConfig::from_toml_str("[geometry]\ncanonical_epsg = 4326\n", "inline")
                .unwrap();
        assert_eq!(config.geometry.canonical_epsg, 4326);
    }

    #[test]
    fn applies_overrides() {
        let env: BTreeMap<&str, &str> = [
            (DB_PATH_ENV, "/tmp/other.duckdb"),
            (BATCH_SIZE_ENV, " 50 "),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/other.duckdb"));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.storage.export_dir, PathBuf::from("data/export"));
    }

    #[test]
    fn rejects_unparseable_override() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|key| (key == BATCH_SIZE_ENV).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn loads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catastro.toml");
        std::fs::write(&path, "[storage]\nexport_dir = \"out\"\n").unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.storage.export_dir, PathBuf::from("out"));
        assert_eq!(config.batch_size, 10);
    }
}
