//! The storage interface consumed by the loaders.

use std::collections::BTreeSet;

use catastro_parcel_models::{FetchAttempt, Parcel, Unit};

use crate::DbError;

/// Append-only storage for parcels, units, and fetch-attempt markers.
///
/// Every write method is atomic: either all rows of the call are stored or
/// none are. No method updates a parcel or unit row in place.
pub trait CadastralStore {
    /// Returns the stored parcel references, optionally restricted to one
    /// municipality.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn parcel_refs(&self, municipality: Option<&str>) -> Result<Vec<String>, DbError>;

    /// Returns the subset of `candidates` already stored as parcels.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn existing_parcel_refs(&self, candidates: &[String]) -> Result<BTreeSet<String>, DbError>;

    /// Appends parcels in a single transaction. Returns the number of rows
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any row is rejected; nothing is written in
    /// that case.
    fn append_parcels(&self, parcels: &[Parcel]) -> Result<u64, DbError>;

    /// Returns the parcel references that have at least one stored unit.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn parcel_refs_with_units(&self) -> Result<BTreeSet<String>, DbError>;

    /// Returns the parcel references whose fetch-attempt marker is
    /// terminal (see [`catastro_parcel_models::AttemptOutcome::is_terminal`]).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn terminal_attempt_refs(&self) -> Result<BTreeSet<String>, DbError>;

    /// Appends one batch of units and upserts the attempt markers of the
    /// parcels that produced them, in a single transaction. Units whose
    /// reference is already stored are skipped. Returns the number of unit
    /// rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any row is rejected; nothing is written in
    /// that case.
    fn append_unit_batch(&self, units: &[Unit], attempts: &[FetchAttempt])
    -> Result<u64, DbError>;

    /// Returns the number of stored parcels for a municipality.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn parcel_count(&self, municipality: &str) -> Result<u64, DbError>;

    /// Returns the number of stored units whose parcel belongs to a
    /// municipality.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn unit_count(&self, municipality: &str) -> Result<u64, DbError>;
}
