//! In-memory store, canned lookup answers, and fixtures for loader tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::sync::{Arc, Mutex};

use catastro_config::LookupConfig;
use catastro_database::{CadastralStore, DbError};
use catastro_parcel_models::{FetchAttempt, Municipality, Parcel, Unit};
use catastro_units::{
    LookupResponse, LookupTransport, RecordingSleeper, UnitFetchError, UnitFetcher,
};
use chrono::Utc;
use geo::{MultiPolygon, Rect, coord};

/// Body of a failing lookup.
pub const LOOKUP_FAILURE: &str = "Service Unavailable";

const NO_RECORDS: &str =
    r#"{"consulta_dnprcResult":{"lerr":{"err":[{"cod":"11","des":"NO EXISTE"}]}}}"#;

#[derive(Default)]
struct State {
    parcels: Vec<Parcel>,
    units: Vec<Unit>,
    attempts: BTreeMap<String, FetchAttempt>,
    parcel_appends: Vec<usize>,
    unit_batches: Vec<usize>,
    failures_left: u32,
    unit_batch_limit: Option<usize>,
}

impl State {
    fn injected_failure(&mut self) -> Option<DbError> {
        (self.failures_left > 0).then(|| {
            self.failures_left -= 1;
            DbError::Conversion {
                message: "injected failure".to_string(),
            }
        })
    }
}

/// [`CadastralStore`] over vectors, with the same key constraints as the
/// database and a record of every successful write.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn with_parcels(parcels: Vec<Parcel>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().parcels = parcels;
        store
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().unwrap().failures_left = count;
    }

    /// Makes every unit batch after the first `ok_batches` fail.
    pub fn fail_unit_batches_after(&self, ok_batches: usize) {
        self.state.lock().unwrap().unit_batch_limit = Some(ok_batches);
    }

    /// Row counts of the committed parcel appends.
    pub fn parcel_appends(&self) -> Vec<usize> {
        self.state.lock().unwrap().parcel_appends.clone()
    }

    /// Unit counts of the committed unit batches.
    pub fn unit_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().unit_batches.clone()
    }

    pub fn attempt(&self, parcel_ref: &str) -> Option<FetchAttempt> {
        self.state.lock().unwrap().attempts.get(parcel_ref).cloned()
    }
}

impl CadastralStore for MemoryStore {
    fn parcel_refs(&self, municipality: Option<&str>) -> Result<Vec<String>, DbError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .parcels
            .iter()
            .filter(|p| municipality.is_none_or(|m| p.municipality == m))
            .map(|p| p.cadastral_ref.clone())
            .collect())
    }

    fn existing_parcel_refs(&self, candidates: &[String]) -> Result<BTreeSet<String>, DbError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .parcels
            .iter()
            .filter(|p| candidates.contains(&p.cadastral_ref))
            .map(|p| p.cadastral_ref.clone())
            .collect())
    }

    fn append_parcels(&self, parcels: &[Parcel]) -> Result<u64, DbError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.injected_failure() {
            return Err(e);
        }
        if let Some(dup) = parcels
            .iter()
            .find(|p| state.parcels.iter().any(|s| s.cadastral_ref == p.cadastral_ref))
        {
            return Err(DbError::Conversion {
                message: format!("duplicate parcel {}", dup.cadastral_ref),
            });
        }

        state.parcels.extend_from_slice(parcels);
        state.parcel_appends.push(parcels.len());
        Ok(parcels.len() as u64)
    }

    fn parcel_refs_with_units(&self) -> Result<BTreeSet<String>, DbError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .iter()
            .map(|u| u.parcel_ref.clone())
            .collect())
    }

    fn terminal_attempt_refs(&self) -> Result<BTreeSet<String>, DbError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attempts
            .values()
            .filter(|a| a.outcome.is_terminal())
            .map(|a| a.parcel_ref.clone())
            .collect())
    }

    fn append_unit_batch(&self, units: &[Unit], attempts: &[FetchAttempt]) -> Result<u64, DbError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.injected_failure() {
            return Err(e);
        }
        if state
            .unit_batch_limit
            .is_some_and(|limit| state.unit_batches.len() >= limit)
        {
            return Err(DbError::Conversion {
                message: "unit batch rejected".to_string(),
            });
        }
        for unit in units {
            if !state.parcels.iter().any(|p| p.cadastral_ref == unit.parcel_ref) {
                return Err(DbError::Conversion {
                    message: format!("unit {} has no parcel", unit.unit_ref),
                });
            }
        }

        let mut inserted = 0;
        for unit in units {
            if state.units.iter().any(|u| u.unit_ref == unit.unit_ref) {
                continue;
            }
            state.units.push(unit.clone());
            inserted += 1;
        }
        for attempt in attempts {
            state
                .attempts
                .insert(attempt.parcel_ref.clone(), attempt.clone());
        }
        state.unit_batches.push(units.len());
        Ok(inserted)
    }

    fn parcel_count(&self, municipality: &str) -> Result<u64, DbError> {
        Ok(self.parcel_refs(Some(municipality))?.len() as u64)
    }

    fn unit_count(&self, municipality: &str) -> Result<u64, DbError> {
        let parcels: BTreeSet<String> = self.parcel_refs(Some(municipality))?.into_iter().collect();
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .iter()
            .filter(|u| parcels.contains(&u.parcel_ref))
            .count() as u64)
    }
}

/// Answers lookups from a fixed table. Unknown references get a
/// "no records" answer.
pub struct CannedTransport {
    answers: BTreeMap<String, (u16, String)>,
    calls: Mutex<Vec<String>>,
}

impl CannedTransport {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl LookupTransport for CannedTransport {
    async fn lookup(&self, refcat: &str) -> Result<LookupResponse, UnitFetchError> {
        self.calls.lock().unwrap().push(refcat.to_string());
        let (status, body) = self
            .answers
            .get(refcat)
            .cloned()
            .unwrap_or_else(|| (200, NO_RECORDS.to_string()));
        Ok(LookupResponse { status, body })
    }
}

/// Fast retry settings: three attempts, no real waiting.
pub fn lookup_config() -> LookupConfig {
    LookupConfig {
        throttle_ms: 0,
        cooldown_ms: 0,
        base_delay_ms: 0,
        max_delay_ms: 0,
        max_attempts: 3,
        ..LookupConfig::default()
    }
}

/// A fetcher answering from `(refcat, status, body)` entries, sleeping
/// through a [`RecordingSleeper`].
pub fn recording_fetcher(
    answers: Vec<(String, u16, String)>,
) -> (UnitFetcher, Arc<CannedTransport>) {
    let transport = Arc::new(CannedTransport {
        answers: answers
            .into_iter()
            .map(|(refcat, status, body)| (refcat, (status, body)))
            .collect(),
        calls: Mutex::new(Vec::new()),
    });
    let fetcher = UnitFetcher::new(
        transport.clone(),
        Arc::new(RecordingSleeper::new()),
        &lookup_config(),
    );
    (fetcher, transport)
}

/// A multi-unit answer with one record per `car` sequence number.
pub fn multi_unit_body(pc1: &str, pc2: &str, cars: &[&str]) -> String {
    let records: Vec<serde_json::Value> = cars
        .iter()
        .map(|car| {
            serde_json::json!({
                "rc": { "pc1": pc1, "pc2": pc2, "car": car, "cc1": "Y", "cc2": "Z" },
                "debi": { "luso": "Residencial", "sfc": "92" }
            })
        })
        .collect();
    serde_json::json!({ "consulta_dnprcResult": { "lrcdnp": { "rcdnp": records } } }).to_string()
}

pub fn alaro() -> Municipality {
    Municipality {
        name: "ALARO".to_string(),
        code: "07001".to_string(),
        province_name: "Illes Balears".to_string(),
        province_code: "07".to_string(),
    }
}

/// A 10 m square parcel in EPSG:25830.
pub fn parcel(cadastral_ref: &str, municipality: &str) -> Parcel {
    let square = Rect::new(
        coord! { x: 480_000.0, y: 4_400_000.0 },
        coord! { x: 480_010.0, y: 4_400_010.0 },
    );
    Parcel {
        cadastral_ref: cadastral_ref.to_string(),
        municipality: municipality.to_string(),
        municipality_code: "07001".to_string(),
        province: "Illes Balears".to_string(),
        province_code: "07".to_string(),
        geometry: MultiPolygon(vec![square.to_polygon()]),
        srid: 25830,
        area_m2: 100.0,
        land_use: Some("RU".to_string()),
        ingested_at: Utc::now(),
    }
}

pub fn unit(parcel_ref: &str, car: &str) -> Unit {
    Unit {
        unit_ref: format!("{parcel_ref}{car}YZ"),
        parcel_ref: parcel_ref.to_string(),
        use_type: Some("Residencial".to_string()),
        floor_area: Some(92.0),
        year_built: None,
        participation: None,
        street_name: None,
        floor: None,
        door: None,
        postal_code: None,
        municipality: None,
        province: None,
        ingested_at: Utc::now(),
    }
}

fn gml_member(reference: &str, x: f64) -> String {
    let (x0, x1, y0, y1) = (x, x + 20.0, 4_400_000.0, 4_400_020.0);
    format!(
        r#"<gml:featureMember>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.{reference}">
      <cp:geometry>
        <gml:MultiSurface srsName="urn:ogc:def:crs:EPSG::25830">
          <gml:surfaceMember>
            <gml:Polygon>
              <gml:exterior>
                <gml:LinearRing>
                  <gml:posList>{x0} {y0} {x1} {y0} {x1} {y1} {x0} {y1} {x0} {y0}</gml:posList>
                </gml:LinearRing>
              </gml:exterior>
            </gml:Polygon>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
      <cp:nationalCadastralReference>{reference}</cp:nationalCadastralReference>
    </cp:CadastralParcel>
  </gml:featureMember>"#
    )
}

/// The ALARO parcel archive: three parcels in EPSG:25830.
pub fn alaro_archive() -> Vec<u8> {
    let members: Vec<String> = ["07001A00100001", "07001A00100002", "07001A00100003"]
        .iter()
        .zip([480_000.0, 480_100.0, 480_200.0])
        .map(|(reference, x)| gml_member(reference, x))
        .collect();
    let gml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gml:FeatureCollection xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:cp="http://inspire.ec.europa.eu/schemas/cp/4.0">
{}
</gml:FeatureCollection>
"#,
        members.join("\n")
    );

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer
        .start_file("A.ES.SDGC.CP.07001.cadastralparcel.gml", options)
        .unwrap();
    writer.write_all(gml.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}
