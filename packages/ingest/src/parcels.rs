//! Deduplicating parcel loader.
//!
//! Parcels are append-only: a reference that is already stored is never
//! written again, so reloading a municipality is a no-op. The newly
//! appended parcels are also exported as a per-municipality `GeoJSON` file;
//! that export is best-effort and never undoes the append.

use std::collections::BTreeSet;
use std::path::Path;

use catastro_database::{CadastralStore, paths};
use catastro_ingest_models::{ExportStatus, ParcelLoadReport};
use catastro_parcel_models::{Parcel, normalize_reference};

use crate::{IngestError, persist_with_retry};

/// Normalizes references and drops repeated ones, keeping the first
/// occurrence. Returns the unique parcels and the number dropped.
#[must_use]
pub fn dedup_incoming(parcels: Vec<Parcel>) -> (Vec<Parcel>, u64) {
    let mut seen = BTreeSet::new();
    let mut dropped = 0;

    let unique = parcels
        .into_iter()
        .filter_map(|mut parcel| {
            parcel.cadastral_ref = normalize_reference(&parcel.cadastral_ref);
            if seen.insert(parcel.cadastral_ref.clone()) {
                Some(parcel)
            } else {
                log::debug!("Dropping repeated parcel {}", parcel.cadastral_ref);
                dropped += 1;
                None
            }
        })
        .collect();

    (unique, dropped)
}

/// Returns the stored references among `parcels`.
///
/// The municipality's references are read first; the remaining candidates
/// are then checked by exact key, since a reference is unique regardless of
/// municipality.
fn stored_references(
    store: &dyn CadastralStore,
    parcels: &[Parcel],
    municipality: &str,
) -> Result<BTreeSet<String>, IngestError> {
    let mut stored: BTreeSet<String> = store
        .parcel_refs(Some(municipality))?
        .iter()
        .map(|r| normalize_reference(r))
        .collect();

    let candidates: Vec<String> = parcels
        .iter()
        .map(|p| p.cadastral_ref.clone())
        .filter(|r| !stored.contains(r))
        .collect();

    if !candidates.is_empty() {
        stored.extend(
            store
                .existing_parcel_refs(&candidates)?
                .iter()
                .map(|r| normalize_reference(r)),
        );
    }

    Ok(stored)
}

fn export_parcels(
    parcels: &[Parcel],
    municipality: &str,
    export_dir: &Path,
    epsg: u32,
) -> ExportStatus {
    let path = paths::municipality_export_path(export_dir, municipality);

    match catastro_geometry::export::write_geojson(&path, parcels, epsg) {
        Ok(()) => {
            log::info!(
                "{municipality}: exported {} parcels to {}",
                parcels.len(),
                path.display()
            );
            ExportStatus::Written { path }
        }
        Err(e) => {
            log::warn!("{municipality}: export to {} failed: {e}", path.display());
            ExportStatus::Failed {
                message: e.to_string(),
            }
        }
    }
}

/// Appends the parcels of `municipality` that are not stored yet, then
/// exports them to `{export_dir}/{municipality}_catastro_parcels.geojson`.
///
/// # Errors
///
/// Returns [`IngestError::Database`] if the stored references cannot be
/// read, or [`IngestError::Persistence`] if the append fails twice. An
/// export failure is not an error; it is reported in
/// [`ParcelLoadReport::export`].
pub fn load_parcels(
    store: &dyn CadastralStore,
    parcels: Vec<Parcel>,
    municipality: &str,
    export_dir: &Path,
    epsg: u32,
) -> Result<ParcelLoadReport, IngestError> {
    let fetched = parcels.len() as u64;

    let (unique, duplicates_in_batch) = dedup_incoming(parcels);
    if duplicates_in_batch > 0 {
        log::warn!("{municipality}: dropped {duplicates_in_batch} repeated parcel references");
    }

    let stored = stored_references(store, &unique, municipality)?;
    let (existing, fresh): (Vec<Parcel>, Vec<Parcel>) = unique
        .into_iter()
        .partition(|p| stored.contains(&p.cadastral_ref));

    let already_stored = existing.len() as u64;
    if already_stored > 0 {
        log::info!("{municipality}: skipping {already_stored} parcels already stored");
    }

    if fresh.is_empty() {
        log::info!("{municipality}: no new parcels");
        return Ok(ParcelLoadReport {
            municipality: municipality.to_string(),
            fetched,
            duplicates_in_batch,
            already_stored,
            appended: 0,
            export: ExportStatus::Skipped,
        });
    }

    let appended = persist_with_retry(&format!("{municipality} parcels"), || {
        store.append_parcels(&fresh)
    })?;
    log::info!("{municipality}: appended {appended} parcels");

    let export = export_parcels(&fresh, municipality, export_dir, epsg);

    Ok(ParcelLoadReport {
        municipality: municipality.to_string(),
        fetched,
        duplicates_in_batch,
        already_stored,
        appended,
        export,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, parcel};

    fn alaro_parcels() -> Vec<Parcel> {
        vec![
            parcel("07001A00100001", "ALARO"),
            parcel("07001A00100002", "ALARO"),
            parcel("07001A00100003", "ALARO"),
        ]
    }

    #[test]
    fn appends_only_parcels_not_yet_stored() {
        let store = MemoryStore::with_parcels(vec![parcel("07001A00100002", "ALARO")]);
        let export_dir = tempfile::tempdir().unwrap();

        let report =
            load_parcels(&store, alaro_parcels(), "ALARO", export_dir.path(), 25830).unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.already_stored, 1);
        assert_eq!(report.appended, 2);
        assert_eq!(store.parcel_appends(), vec![2]);
        assert_eq!(store.parcel_count("ALARO").unwrap(), 3);

        let ExportStatus::Written { path } = report.export else {
            panic!("expected a written export, got {:?}", report.export);
        };
        assert!(path.ends_with("ALARO_catastro_parcels.geojson"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let refs: Vec<&str> = json["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["cadastral_ref"].as_str().unwrap())
            .collect();
        assert_eq!(refs, vec!["07001A00100001", "07001A00100003"]);
    }

    #[test]
    fn reloading_is_a_no_op() {
        let store = MemoryStore::default();
        let export_dir = tempfile::tempdir().unwrap();

        let first =
            load_parcels(&store, alaro_parcels(), "ALARO", export_dir.path(), 25830).unwrap();
        let second =
            load_parcels(&store, alaro_parcels(), "ALARO", export_dir.path(), 25830).unwrap();

        assert_eq!(first.appended, 3);
        assert_eq!(second.appended, 0);
        assert_eq!(second.already_stored, 3);
        assert_eq!(second.export, ExportStatus::Skipped);
        assert_eq!(store.parcel_refs(Some("ALARO")).unwrap().len(), 3);
        assert_eq!(store.parcel_appends(), vec![3]);
    }

    #[test]
    fn keeps_first_of_repeated_references() {
        let mut first = parcel(" 07001a00100001 ", "ALARO");
        first.area_m2 = 1.0;
        let mut second = parcel("07001A00100001", "ALARO");
        second.area_m2 = 2.0;

        let (unique, dropped) = dedup_incoming(vec![first, second]);

        assert_eq!(dropped, 1);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].cadastral_ref, "07001A00100001");
        assert!((unique[0].area_m2 - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn finds_references_stored_under_another_municipality() {
        let store = MemoryStore::with_parcels(vec![parcel("07001A00100003", "ALCUDIA")]);
        let export_dir = tempfile::tempdir().unwrap();

        let report =
            load_parcels(&store, alaro_parcels(), "ALARO", export_dir.path(), 25830).unwrap();

        assert_eq!(report.already_stored, 1);
        assert_eq!(report.appended, 2);
    }

    #[test]
    fn export_failure_keeps_the_append() {
        let store = MemoryStore::default();
        let scratch = tempfile::tempdir().unwrap();
        let not_a_dir = scratch.path().join("blocker");
        std::fs::write(&not_a_dir, b"file").unwrap();

        let report = load_parcels(&store, alaro_parcels(), "ALARO", &not_a_dir, 25830).unwrap();

        assert_eq!(report.appended, 3);
        assert!(matches!(report.export, ExportStatus::Failed { .. }));
        assert_eq!(store.parcel_count("ALARO").unwrap(), 3);
    }

    #[test]
    fn append_is_retried_once() {
        let store = MemoryStore::default();
        store.fail_next_writes(1);
        let export_dir = tempfile::tempdir().unwrap();

        let report =
            load_parcels(&store, alaro_parcels(), "ALARO", export_dir.path(), 25830).unwrap();

        assert_eq!(report.appended, 3);
    }

    #[test]
    fn append_failing_twice_is_fatal() {
        let store = MemoryStore::default();
        store.fail_next_writes(2);
        let export_dir = tempfile::tempdir().unwrap();

        let result = load_parcels(&store, alaro_parcels(), "ALARO", export_dir.path(), 25830);

        assert!(matches!(result, Err(IngestError::Persistence { .. })));
        assert_eq!(store.parcel_count("ALARO").unwrap(), 0);
        assert!(!paths::municipality_export_path(export_dir.path(), "ALARO").exists());
    }
}
