#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Load reports and progress reporting for the cadastral pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What happened to the per-municipality `GeoJSON` export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStatus {
    /// The newly appended parcels were written to `path`.
    Written {
        /// Export file location.
        path: PathBuf,
    },
    /// Writing the export failed. The appended parcels are kept.
    Failed {
        /// Why the export failed.
        message: String,
    },
    /// Nothing new was appended, so no export was written.
    Skipped,
}

/// Result of loading one municipality's parcels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelLoadReport {
    /// Municipality name.
    pub municipality: String,
    /// Parcels produced by the geometry stage.
    pub fetched: u64,
    /// Duplicate references dropped from the incoming sequence.
    pub duplicates_in_batch: u64,
    /// Parcels skipped because their reference was already stored.
    pub already_stored: u64,
    /// Parcels appended to the store.
    pub appended: u64,
    /// Outcome of the `GeoJSON` export.
    pub export: ExportStatus,
}

/// Result of loading one municipality's units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLoadReport {
    /// Municipality name.
    pub municipality: String,
    /// Parcels that still needed a lookup when the stage started.
    pub pending: u64,
    /// Parcels whose lookup returned at least one unit.
    pub with_units: u64,
    /// Parcels whose lookup resolved to no units.
    pub empty: u64,
    /// Parcels whose lookup exhausted its retries.
    pub given_up: u64,
    /// Unit rows written.
    pub units_written: u64,
    /// Duplicate unit references dropped within a batch.
    pub duplicate_units: u64,
    /// Batch transactions committed.
    pub batches: u64,
}

/// Result of running both stages for one municipality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MunicipalityReport {
    /// Municipality name.
    pub municipality: String,
    /// Parcel stage result.
    pub parcels: ParcelLoadReport,
    /// Unit stage result, `None` when the stage was skipped.
    pub units: Option<UnitLoadReport>,
    /// Wall-clock time for the municipality.
    pub duration: Duration,
}

/// A municipality whose run ended in an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MunicipalityFailure {
    /// Municipality name.
    pub municipality: String,
    /// The error, rendered.
    pub error: String,
}

/// Result of a run over several municipalities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Municipalities that finished.
    pub completed: Vec<MunicipalityReport>,
    /// Municipalities that failed. Later municipalities still ran.
    pub failed: Vec<MunicipalityFailure>,
}

impl RunSummary {
    /// Parcels appended across all completed municipalities.
    #[must_use]
    pub fn parcels_appended(&self) -> u64 {
        self.completed.iter().map(|r| r.parcels.appended).sum()
    }

    /// Units written across all completed municipalities.
    #[must_use]
    pub fn units_written(&self) -> u64 {
        self.completed
            .iter()
            .filter_map(|r| r.units.as_ref())
            .map(|u| u.units_written)
            .sum()
    }
}

/// Trait for reporting progress from long-running operations.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// [`Arc`].
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);

    /// Mark progress as complete and remove the progress indicator.
    fn finish_and_clear(&self);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`] instance for convenient use.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
