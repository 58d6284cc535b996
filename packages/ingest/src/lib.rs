#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental ingestion of cadastral parcels and units into the store.
//!
//! For each municipality the pipeline downloads the bulk parcel archive,
//! appends the parcels it has not seen before ([`parcels`]), then looks up
//! the units of every parcel that still lacks them and writes them in
//! batches ([`units`]). Both stages can be interrupted and rerun: already
//! stored parcels are skipped and finished lookups are not repeated.

pub mod parcels;
pub mod units;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Instant;

use catastro_config::{ConfigError, PipelineConfig};
use catastro_database::{CadastralStore, DbError};
use catastro_geometry::GeometryError;
use catastro_ingest_models::{
    MunicipalityFailure, MunicipalityReport, ParcelLoadReport, ProgressCallback, RunSummary,
    UnitLoadReport,
};
use catastro_parcel_models::Municipality;
use catastro_units::{HttpLookupClient, TokioSleeper, UnitFetchError, UnitFetcher};

/// Errors that end the processing of a municipality.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A store query failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// The parcel archive could not be fetched or read.
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// The lookup client could not be set up.
    #[error("Lookup client error: {0}")]
    Lookup(#[from] UnitFetchError),

    /// A write failed twice in a row.
    #[error("Failed to persist {what}: {source}")]
    Persistence {
        /// What was being written.
        what: String,
        /// The error of the retry.
        #[source]
        source: DbError,
    },

    /// The name is not in the municipality registry.
    #[error("Unknown municipality: {name}")]
    UnknownMunicipality {
        /// The requested name.
        name: String,
    },
}

/// Runs `write`, retrying once if it fails.
///
/// # Errors
///
/// Returns [`IngestError::Persistence`] with the second error if the retry
/// fails too.
pub(crate) fn persist_with_retry<T>(
    what: &str,
    mut write: impl FnMut() -> Result<T, DbError>,
) -> Result<T, IngestError> {
    write().or_else(|first| {
        log::warn!("Writing {what} failed, retrying once: {first}");
        write().map_err(|source| IngestError::Persistence {
            what: what.to_string(),
            source,
        })
    })
}

/// Looks up a registered municipality by name.
///
/// # Errors
///
/// Returns [`IngestError::UnknownMunicipality`] if no registry entry
/// matches.
pub fn municipality_by_name(name: &str) -> Result<Municipality, IngestError> {
    catastro_config::registry::find_municipality(name).ok_or_else(|| {
        IngestError::UnknownMunicipality {
            name: name.to_string(),
        }
    })
}

/// Returns the municipalities to run, filtered by the `--municipalities`
/// flag or the `CATASTRO_MUNICIPALITIES` environment variable. Without
/// either, every enabled municipality is returned.
#[must_use]
pub fn enabled_municipalities(cli_filter: Option<String>) -> Vec<Municipality> {
    let filter = cli_filter.or_else(|| std::env::var(catastro_config::MUNICIPALITIES_ENV).ok());
    let selected = catastro_config::registry::selected_municipalities(filter.as_deref());

    if selected.is_empty() {
        log::warn!(
            "No municipalities selected by filter {filter:?}. Available: {}",
            catastro_config::registry::all_municipalities()
                .into_iter()
                .map(|m| m.municipality.name)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    selected
}

/// Drives both pipeline stages against one store.
pub struct Ingestor<'a> {
    store: &'a dyn CadastralStore,
    config: &'a PipelineConfig,
    geometry_client: reqwest::Client,
    fetcher: UnitFetcher,
}

impl<'a> Ingestor<'a> {
    /// Creates an ingestor with HTTP clients built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if an HTTP client cannot be built.
    pub fn new(store: &'a dyn CadastralStore, config: &'a PipelineConfig) -> Result<Self, IngestError> {
        let geometry_client = catastro_geometry::build_client(&config.geometry)?;
        let transport = Arc::new(HttpLookupClient::new(&config.lookup)?);
        let fetcher = UnitFetcher::new(transport, Arc::new(TokioSleeper), &config.lookup);

        Ok(Self::with_parts(store, config, geometry_client, fetcher))
    }

    /// Creates an ingestor from already built parts.
    #[must_use]
    pub const fn with_parts(
        store: &'a dyn CadastralStore,
        config: &'a PipelineConfig,
        geometry_client: reqwest::Client,
        fetcher: UnitFetcher,
    ) -> Self {
        Self {
            store,
            config,
            geometry_client,
            fetcher,
        }
    }

    /// Fetches the parcel archive of `municipality` and appends the new
    /// parcels.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the archive cannot be fetched or read, or
    /// the parcels cannot be stored.
    pub async fn ingest_parcels(
        &self,
        municipality: &Municipality,
    ) -> Result<ParcelLoadReport, IngestError> {
        let parcels = catastro_geometry::fetch_parcels(
            &self.geometry_client,
            &self.config.geometry,
            municipality,
        )
        .await?;

        parcels::load_parcels(
            self.store,
            parcels,
            &municipality.name,
            &self.config.storage.export_dir,
            self.config.geometry.canonical_epsg,
        )
    }

    /// Looks up and stores the units of every pending parcel of
    /// `municipality`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the pending set cannot be read or a batch
    /// cannot be stored.
    pub async fn ingest_units(
        &self,
        municipality: &Municipality,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<UnitLoadReport, IngestError> {
        units::load_units(
            self.store,
            &self.fetcher,
            &municipality.name,
            self.config.batch_size,
            progress,
        )
        .await
    }

    /// Number of parcels of `municipality` whose units are still to be
    /// looked up.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Database`] if the store cannot be queried.
    pub fn pending_count(&self, municipality: &Municipality) -> Result<usize, IngestError> {
        Ok(units::pending_parcel_refs(self.store, &municipality.name)?.len())
    }

    /// Runs the parcel stage and, unless `skip_units` is set, the unit
    /// stage for one municipality.
    ///
    /// # Errors
    ///
    /// Returns the first [`IngestError`] of either stage.
    pub async fn run_municipality(
        &self,
        municipality: &Municipality,
        skip_units: bool,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<MunicipalityReport, IngestError> {
        let start = Instant::now();
        log::info!(
            "{}: starting ({} {})",
            municipality.name,
            municipality.province_code,
            municipality.code
        );

        let parcels = self.ingest_parcels(municipality).await?;
        log::info!(
            "{}: {} parcels fetched, {} appended",
            municipality.name,
            parcels.fetched,
            parcels.appended
        );

        let units = if skip_units {
            None
        } else {
            Some(self.ingest_units(municipality, progress).await?)
        };

        let duration = start.elapsed();
        log::info!(
            "{}: done in {:.1}s",
            municipality.name,
            duration.as_secs_f64()
        );

        Ok(MunicipalityReport {
            municipality: municipality.name.clone(),
            parcels,
            units,
            duration,
        })
    }

    /// Runs every municipality in order. A failing municipality is logged
    /// and recorded, and the run moves on to the next one.
    pub async fn run_all(
        &self,
        municipalities: &[Municipality],
        skip_units: bool,
        steps: Arc<dyn ProgressCallback>,
        lookup_progress: impl Fn(&Municipality) -> Arc<dyn ProgressCallback>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        steps.set_total(municipalities.len() as u64);

        for municipality in municipalities {
            steps.set_message(municipality.name.clone());
            let progress = lookup_progress(municipality);

            match self
                .run_municipality(municipality, skip_units, progress.clone())
                .await
            {
                Ok(report) => summary.completed.push(report),
                Err(e) => {
                    log::error!("{}: {e}", municipality.name);
                    summary.failed.push(MunicipalityFailure {
                        municipality: municipality.name.clone(),
                        error: e.to_string(),
                    });
                }
            }

            progress.finish_and_clear();
            steps.inc(1);
        }

        steps.finish(format!(
            "{} municipalities, {} failed",
            municipalities.len(),
            summary.failed.len()
        ));
        summary
    }
}
