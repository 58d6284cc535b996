//! Incremental unit loader.
//!
//! The parcels of a municipality that still need a lookup are the stored
//! ones minus those that already have units and those whose last lookup
//! ended in a terminal marker. Lookups run one at a time; their units and
//! attempt markers are buffered and written together in batch
//! transactions, so an interrupted run resumes where the last committed
//! batch left off.

use std::collections::BTreeSet;
use std::sync::Arc;

use catastro_database::CadastralStore;
use catastro_ingest_models::{ProgressCallback, UnitLoadReport};
use catastro_parcel_models::{AttemptOutcome, FetchAttempt, Unit, normalize_reference};
use catastro_units::UnitFetcher;
use chrono::Utc;

use crate::{IngestError, persist_with_retry};

/// Returns the references of the parcels of `municipality` whose units
/// still have to be looked up, in store order.
///
/// # Errors
///
/// Returns [`IngestError::Database`] if the store cannot be queried.
pub fn pending_parcel_refs(
    store: &dyn CadastralStore,
    municipality: &str,
) -> Result<Vec<String>, IngestError> {
    let done: BTreeSet<String> = store
        .parcel_refs_with_units()?
        .into_iter()
        .chain(store.terminal_attempt_refs()?)
        .map(|r| normalize_reference(&r))
        .collect();

    let mut seen = BTreeSet::new();
    Ok(store
        .parcel_refs(Some(municipality))?
        .iter()
        .map(|r| normalize_reference(r))
        .filter(|r| !done.contains(r) && seen.insert(r.clone()))
        .collect())
}

/// Units and attempt markers waiting to be written together.
///
/// A parcel's units are always added as a whole, so a batch may exceed the
/// threshold by up to one parcel's units. Markers of parcels without units
/// never count towards the threshold; they are committed with the next
/// batch of units or the final flush.
#[derive(Debug)]
pub struct UnitBatch {
    threshold: usize,
    units: Vec<Unit>,
    attempts: Vec<FetchAttempt>,
    unit_refs: BTreeSet<String>,
}

impl UnitBatch {
    /// Creates an empty batch that is full at `threshold` units.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            units: Vec::new(),
            attempts: Vec::new(),
            unit_refs: BTreeSet::new(),
        }
    }

    /// Adds one parcel's lookup result. Units whose reference is already in
    /// the batch are dropped; the marker's unit count is corrected to the
    /// units kept. Returns the number of units dropped.
    pub fn push(&mut self, mut attempt: FetchAttempt, units: Vec<Unit>) -> u64 {
        let mut dropped = 0;
        let mut kept = 0_u32;

        for unit in units {
            if self.unit_refs.insert(unit.unit_ref.clone()) {
                self.units.push(unit);
                kept += 1;
            } else {
                log::warn!(
                    "{}: dropping repeated unit {}",
                    attempt.parcel_ref,
                    unit.unit_ref
                );
                dropped += 1;
            }
        }

        if attempt.outcome == AttemptOutcome::Units {
            attempt.unit_count = kept;
        }
        self.attempts.push(attempt);
        dropped
    }

    /// Whether the batch should be written now.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.units.len() >= self.threshold
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Buffered units.
    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Buffered attempt markers.
    #[must_use]
    pub fn attempts(&self) -> &[FetchAttempt] {
        &self.attempts
    }

    fn clear(&mut self) {
        self.units.clear();
        self.attempts.clear();
        self.unit_refs.clear();
    }
}

fn flush(
    store: &dyn CadastralStore,
    batch: &mut UnitBatch,
    report: &mut UnitLoadReport,
) -> Result<(), IngestError> {
    let what = format!("{} unit batch {}", report.municipality, report.batches + 1);
    let written = persist_with_retry(&what, || {
        store.append_unit_batch(batch.units(), batch.attempts())
    })?;

    report.batches += 1;
    report.units_written += written;
    log::info!(
        "{}: batch {} wrote {written} units for {} parcels",
        report.municipality,
        report.batches,
        batch.attempts().len()
    );

    batch.clear();
    Ok(())
}

/// Looks up the units of every pending parcel of `municipality` and writes
/// them in batches of `batch_size`.
///
/// Lookups that exhaust their retries are recorded as given up and stay
/// pending for the next run.
///
/// # Errors
///
/// Returns [`IngestError::Database`] if the pending set cannot be read, or
/// [`IngestError::Persistence`] if a batch fails to write twice. Batches
/// written before the failure stay committed.
pub async fn load_units(
    store: &dyn CadastralStore,
    fetcher: &UnitFetcher,
    municipality: &str,
    batch_size: usize,
    progress: Arc<dyn ProgressCallback>,
) -> Result<UnitLoadReport, IngestError> {
    let pending = pending_parcel_refs(store, municipality)?;
    log::info!("{municipality}: {} parcels pending unit lookup", pending.len());

    let mut report = UnitLoadReport {
        municipality: municipality.to_string(),
        pending: pending.len() as u64,
        ..UnitLoadReport::default()
    };

    progress.set_total(report.pending);
    progress.set_message(format!("{municipality}: unit lookups"));

    let mut batch = UnitBatch::new(batch_size);

    for parcel_ref in &pending {
        let lookup = fetcher.fetch_units(parcel_ref).await;
        let attempt = lookup.attempt_marker(Utc::now());

        match attempt.outcome {
            AttemptOutcome::Units => report.with_units += 1,
            AttemptOutcome::Empty => report.empty += 1,
            AttemptOutcome::GivenUp => report.given_up += 1,
        }

        report.duplicate_units += batch.push(attempt, lookup.units);
        progress.inc(1);

        if batch.is_full() {
            flush(store, &mut batch, &mut report)?;
        }
    }

    if !batch.is_empty() {
        flush(store, &mut batch, &mut report)?;
    }

    if report.given_up > 0 {
        log::warn!(
            "{municipality}: gave up on {} parcels, they stay pending",
            report.given_up
        );
    }
    progress.finish(format!(
        "{municipality}: {} units from {} parcels",
        report.units_written, report.pending
    ));

    Ok(report)
}
