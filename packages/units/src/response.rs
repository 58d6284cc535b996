//! Decoding of `Consulta_DNPRC` lookup responses.
//!
//! The service answers in one of three shapes:
//!
//! * `consulta_dnprcResult.lrcdnp.rcdnp`: a list of unit records, each with
//!   an `rc` reference block (parcels with several units);
//! * `consulta_dnprcResult.bico.bi`: one embedded record identified by
//!   `idbi` (parcels with a single unit);
//! * `consulta_dnprcResult.lerr`: an error list (unknown reference).
//!
//! Scalar fields arrive as strings or numbers depending on the record, and
//! decimals use a comma separator.

use catastro_parcel_models::{Unit, normalize_reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::UnitFetchError;

/// Accepts a JSON string, number, or null as an optional trimmed string.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Parses a decimal that may use `,` as separator.
#[must_use]
pub fn parse_decimal(value: Option<&str>) -> Option<f64> {
    value
        .map(|v| v.trim().replace(',', "."))
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "consulta_dnprcResult")]
    result: Option<ResultBody>,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    lrcdnp: Option<RecordList>,
    bico: Option<Bico>,
    lerr: Option<ErrorList>,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    rcdnp: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Bico {
    bi: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorList {
    err: Option<serde_json::Value>,
}

/// Parcel and unit sub-identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReferenceBlock {
    /// First half of the parcel reference.
    #[serde(default, deserialize_with = "lenient_string")]
    pub pc1: Option<String>,
    /// Second half of the parcel reference.
    #[serde(default, deserialize_with = "lenient_string")]
    pub pc2: Option<String>,
    /// Unit sequence number.
    #[serde(default, deserialize_with = "lenient_string")]
    pub car: Option<String>,
    /// First control character.
    #[serde(default, deserialize_with = "lenient_string")]
    pub cc1: Option<String>,
    /// Second control character.
    #[serde(default, deserialize_with = "lenient_string")]
    pub cc2: Option<String>,
}

impl ReferenceBlock {
    /// `pc1 + pc2`, if both halves are present.
    #[must_use]
    pub fn parcel_ref(&self) -> Option<String> {
        match (&self.pc1, &self.pc2) {
            (Some(pc1), Some(pc2)) => Some(normalize_reference(&format!("{pc1}{pc2}"))),
            _ => None,
        }
    }

    /// `car + cc1 + cc2`, if all three are present.
    #[must_use]
    pub fn unit_suffix(&self) -> Option<String> {
        match (&self.car, &self.cc1, &self.cc2) {
            (Some(car), Some(cc1), Some(cc2)) => Some(format!("{car}{cc1}{cc2}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct Street {
    #[serde(default, deserialize_with = "lenient_string")]
    nv: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct Interior {
    #[serde(default, deserialize_with = "lenient_string")]
    pt: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pu: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct UrbanLocation {
    #[serde(default)]
    dir: Street,
    #[serde(default)]
    loint: Interior,
    #[serde(default, deserialize_with = "lenient_string")]
    dp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct Location {
    #[serde(default)]
    lourb: UrbanLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct Locations {
    #[serde(default)]
    lous: Location,
}

/// Location block (`dt`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Details {
    #[serde(default, deserialize_with = "lenient_string")]
    np: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nm: Option<String>,
    #[serde(default)]
    locs: Locations,
}

/// Economic block (`debi`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Economic {
    #[serde(default, deserialize_with = "lenient_string")]
    luso: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    sfc: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    cpt: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    ant: Option<String>,
}

/// One record of the multi-unit list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListedRecord {
    /// Reference block; records without one are discarded.
    pub rc: ReferenceBlock,
    #[serde(default)]
    dt: Details,
    #[serde(default)]
    debi: Economic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct Identification {
    #[serde(default, deserialize_with = "lenient_string")]
    cn: Option<String>,
    rc: Option<ReferenceBlock>,
}

/// The single embedded record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SingleRecord {
    #[serde(default)]
    idbi: Identification,
    #[serde(default)]
    dt: Details,
    #[serde(default)]
    debi: Economic,
}

/// A successfully recognized lookup response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupPayload {
    /// Several units, one per listed record.
    MultiUnit(Vec<ListedRecord>),
    /// Exactly one embedded unit.
    SingleUnit(Box<SingleRecord>),
    /// The service reported that the reference has no records.
    NoRecords {
        /// The service's error description.
        message: String,
    },
}

fn shape_error(message: impl Into<String>) -> UnitFetchError {
    UnitFetchError::Shape {
        message: message.into(),
    }
}

fn decode_listed(value: serde_json::Value) -> Vec<ListedRecord> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<ListedRecord>(item) {
            Ok(record) if record.rc.parcel_ref().is_some() => Some(record),
            Ok(_) => {
                log::warn!("Skipping listed unit {i}: reference block lacks pc1/pc2");
                None
            }
            Err(e) => {
                log::warn!("Skipping listed unit {i}: {e}");
                None
            }
        })
        .collect()
}

fn describe_errors(value: &serde_json::Value) -> String {
    let items: Vec<&serde_json::Value> = match value {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .iter()
        .filter_map(|item| item.get("des").and_then(serde_json::Value::as_str))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Decodes a response body.
///
/// The multi-unit list wins when it yields at least one usable record;
/// otherwise the single embedded record is used.
///
/// # Errors
///
/// Returns [`UnitFetchError::Decode`] if the body is not JSON, and
/// [`UnitFetchError::Shape`] if neither shape (nor an error list) is
/// present.
pub fn decode_payload(body: &str) -> Result<LookupPayload, UnitFetchError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    let result = envelope
        .result
        .ok_or_else(|| shape_error("missing consulta_dnprcResult"))?;

    if let Some(list) = result.lrcdnp.and_then(|l| l.rcdnp) {
        let records = decode_listed(list);
        if !records.is_empty() {
            return Ok(LookupPayload::MultiUnit(records));
        }
    }

    if let Some(bi) = result.bico.and_then(|b| b.bi)
        && bi.as_object().is_some_and(|o| !o.is_empty())
    {
        let record: SingleRecord = serde_json::from_value(bi)?;
        return Ok(LookupPayload::SingleUnit(Box::new(record)));
    }

    if let Some(err) = result.lerr.and_then(|l| l.err) {
        return Ok(LookupPayload::NoRecords {
            message: describe_errors(&err),
        });
    }

    Err(shape_error("neither lrcdnp.rcdnp nor bico.bi present"))
}

fn build_unit(
    unit_ref: String,
    parcel_ref: &str,
    dt: &Details,
    debi: &Economic,
    fetched_at: DateTime<Utc>,
) -> Unit {
    let urban = &dt.locs.lous.lourb;
    Unit {
        unit_ref,
        parcel_ref: parcel_ref.to_string(),
        use_type: debi.luso.clone(),
        floor_area: parse_decimal(debi.sfc.as_deref()),
        year_built: debi.ant.as_deref().and_then(|y| y.trim().parse().ok()),
        participation: parse_decimal(debi.cpt.as_deref()),
        street_name: urban.dir.nv.clone(),
        floor: urban.loint.pt.clone(),
        door: urban.loint.pu.clone(),
        postal_code: urban.dp.clone(),
        municipality: dt.nm.clone(),
        province: dt.np.clone(),
        ingested_at: fetched_at,
    }
}

fn check_owner(returned: Option<String>, requested: &str) {
    if let Some(returned) = returned
        && returned != requested
    {
        log::warn!("Lookup for {requested} returned a unit of parcel {returned}; keying it to {requested}");
    }
}

/// Unit reference under the requested parcel: its reference followed by
/// the returned unit suffix, or by `class` when the suffix is incomplete.
fn keyed_unit_ref(rc: &ReferenceBlock, parcel_ref: &str, class: Option<&str>) -> String {
    let suffix = rc
        .unit_suffix()
        .or_else(|| class.map(str::to_string))
        .unwrap_or_default();
    normalize_reference(&format!("{parcel_ref}{suffix}"))
}

impl LookupPayload {
    /// Converts the payload into units owned by `parcel_ref`.
    ///
    /// Units always reference the parcel that was requested, even if the
    /// payload names a different one, and their unit references are built
    /// on it so two parcels answered with the same payload never share one.
    #[must_use]
    pub fn into_units(self, parcel_ref: &str, fetched_at: DateTime<Utc>) -> Vec<Unit> {
        let parcel_ref = normalize_reference(parcel_ref);

        match self {
            Self::MultiUnit(records) => records
                .into_iter()
                .map(|record| {
                    check_owner(record.rc.parcel_ref(), &parcel_ref);
                    let unit_ref = keyed_unit_ref(&record.rc, &parcel_ref, None);
                    build_unit(unit_ref, &parcel_ref, &record.dt, &record.debi, fetched_at)
                })
                .collect(),
            Self::SingleUnit(record) => {
                let rc = record.idbi.rc.clone().unwrap_or_default();
                check_owner(rc.parcel_ref(), &parcel_ref);
                let unit_ref = keyed_unit_ref(&rc, &parcel_ref, record.idbi.cn.as_deref());
                vec![build_unit(
                    unit_ref,
                    &parcel_ref,
                    &record.dt,
                    &record.debi,
                    fetched_at,
                )]
            }
            Self::NoRecords { .. } => Vec::new(),
        }
    }
}
