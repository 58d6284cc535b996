#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel, unit, and municipality types shared across the cadastral
//! pipeline.
//!
//! A [`Parcel`] is keyed by its cadastral reference and carries a polygon
//! geometry in the canonical coordinate reference. A [`Unit`] is a building
//! or sub-parcel entity (an apartment, a garage, a rustic building) that
//! belongs to exactly one parcel. [`FetchAttempt`] records the outcome of
//! looking up the units of one parcel so that a restarted run knows which
//! parcels are settled.

use chrono::{DateTime, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Normalizes a cadastral or unit reference for comparison and storage.
///
/// Trims surrounding whitespace and uppercases ASCII letters. All natural
/// key comparisons in the pipeline go through this function so that
/// `" 07001a00100001"` and `"07001A00100001"` are the same key.
#[must_use]
pub fn normalize_reference(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// A municipality to ingest, as resolved from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    /// Municipality name as used in source URLs (e.g. `"ALARO"`).
    pub name: String,
    /// Five-digit INE municipality code (e.g. `"07001"`).
    pub code: String,
    /// Province name (e.g. `"Illes Balears"`).
    pub province_name: String,
    /// Two-digit province code (e.g. `"07"`).
    pub province_code: String,
}

/// Cadastral class of a parcel, derived from the reference format.
///
/// Rustic references are `PPMMM` (province + municipality digits) followed
/// by a sector letter, polygon, and parcel number, e.g. `07001A00100001`.
/// Everything else is treated as urban.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum ParcelClass {
    /// Rustic (rural) parcel.
    #[strum(serialize = "RU")]
    #[serde(rename = "RU")]
    Rustic,
    /// Urban parcel.
    #[strum(serialize = "UR")]
    #[serde(rename = "UR")]
    Urban,
}

impl ParcelClass {
    /// Classifies a cadastral reference.
    #[must_use]
    pub fn from_reference(reference: &str) -> Self {
        let bytes = reference.trim().as_bytes();
        if bytes.len() >= 6
            && bytes[..5].iter().all(u8::is_ascii_digit)
            && bytes[5].is_ascii_alphabetic()
        {
            Self::Rustic
        } else {
            Self::Urban
        }
    }
}

/// A normalized land parcel ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    /// Cadastral reference (natural key), already normalized.
    pub cadastral_ref: String,
    /// Municipality name.
    pub municipality: String,
    /// Municipality code.
    pub municipality_code: String,
    /// Province name.
    pub province: String,
    /// Province code.
    pub province_code: String,
    /// Parcel outline in the canonical coordinate reference.
    pub geometry: MultiPolygon<f64>,
    /// EPSG code of the coordinate reference `geometry` is expressed in.
    pub srid: u32,
    /// Area in square metres, measured on `geometry`.
    pub area_m2: f64,
    /// Land-use code from the source, or the cadastral class code.
    pub land_use: Option<String>,
    /// When this record was produced.
    pub ingested_at: DateTime<Utc>,
}

/// A building or sub-parcel unit returned by the per-record lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit reference (natural key).
    pub unit_ref: String,
    /// Cadastral reference of the owning parcel.
    pub parcel_ref: String,
    /// Use type (`luso`), e.g. `"Residencial"`.
    pub use_type: Option<String>,
    /// Built floor area in square metres.
    pub floor_area: Option<f64>,
    /// Year of construction.
    pub year_built: Option<i32>,
    /// Participation quota (percentage of the parcel).
    pub participation: Option<f64>,
    /// Street name.
    pub street_name: Option<String>,
    /// Floor (`pt`).
    pub floor: Option<String>,
    /// Door (`pu`).
    pub door: Option<String>,
    /// Postal code.
    pub postal_code: Option<String>,
    /// Municipality name as returned by the lookup.
    pub municipality: Option<String>,
    /// Province name as returned by the lookup.
    pub province: Option<String>,
    /// When this record was fetched.
    pub ingested_at: DateTime<Utc>,
}

/// How the unit lookup for one parcel ended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    /// The lookup succeeded and produced at least one unit.
    Units,
    /// The lookup succeeded but produced no units.
    Empty,
    /// Every attempt failed; the parcel should be retried on a later run.
    GivenUp,
}

impl AttemptOutcome {
    /// Whether a parcel with this outcome is settled and must not be
    /// looked up again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Units | Self::Empty)
    }
}

/// Marker recording that the units of a parcel were looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    /// Cadastral reference of the parcel.
    pub parcel_ref: String,
    /// Outcome of the lookup.
    pub outcome: AttemptOutcome,
    /// Number of units produced.
    pub unit_count: u32,
    /// Number of HTTP attempts made.
    pub attempts: u32,
    /// When the lookup finished.
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(normalize_reference("  07001a00100001\t"), "07001A00100001");
        assert_eq!(normalize_reference("9872023VH5797S"), "9872023VH5797S");
    }

    #[test]
    fn classifies_rustic_and_urban_references() {
        assert_eq!(
            ParcelClass::from_reference("07001A00100001"),
            ParcelClass::Rustic
        );
        assert_eq!(
            ParcelClass::from_reference("9872023VH5797S"),
            ParcelClass::Urban
        );
        assert_eq!(ParcelClass::from_reference(""), ParcelClass::Urban);
        assert_eq!(ParcelClass::Rustic.as_ref(), "RU");
    }

    #[test]
    fn attempt_outcome_round_trips_through_strings() {
        assert_eq!(AttemptOutcome::GivenUp.as_ref(), "given_up");
        assert_eq!(
            AttemptOutcome::from_str("empty").unwrap(),
            AttemptOutcome::Empty
        );
        assert!(AttemptOutcome::Units.is_terminal());
        assert!(AttemptOutcome::Empty.is_terminal());
        assert!(!AttemptOutcome::GivenUp.is_terminal());
    }
}
