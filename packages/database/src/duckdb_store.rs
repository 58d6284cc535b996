//! `DuckDB`-backed [`CadastralStore`].
//!
//! One database file holds the `parcels`, `units`, and
//! `unit_fetch_attempts` tables. Geometry is stored as `GeoJSON` text next
//! to its EPSG code. Every write goes through an explicit transaction that
//! is rolled back on the first failing row.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr as _;

use catastro_parcel_models::{AttemptOutcome, FetchAttempt, Parcel, Unit};
use chrono::{DateTime, Utc};
use duckdb::Connection;

use crate::{CadastralStore, DbError};

/// Number of keys bound per `IN (...)` lookup.
const LOOKUP_CHUNK_SIZE: usize = 1_000;

/// Timestamp format bound into `TIMESTAMP` columns (UTC).
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A [`CadastralStore`] over a single `DuckDB` connection.
pub struct DuckDbStore {
    conn: Connection,
}

impl DuckDbStore {
    /// Opens (or creates) the database at `path` and ensures the schema
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened cadastral store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Runs `f` inside a transaction, rolling back if it fails.
    fn in_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::error!("Rollback failed after {e}: {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Returns the attempt marker stored for one parcel, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the stored outcome is
    /// unknown.
    pub fn attempt_for(&self, parcel_ref: &str) -> Result<Option<FetchAttempt>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT parcel_ref, outcome, unit_count, attempts, attempted_at::TEXT
             FROM unit_fetch_attempts WHERE parcel_ref = ?",
        )?;
        let mut rows = stmt.query([parcel_ref])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let outcome: String = row.get(1)?;
        let unit_count: i32 = row.get(2)?;
        let attempts: i32 = row.get(3)?;
        let attempted_at: String = row.get(4)?;

        Ok(Some(FetchAttempt {
            parcel_ref: row.get(0)?,
            outcome: parse_outcome(&outcome)?,
            unit_count: u32::try_from(unit_count).unwrap_or(0),
            attempts: u32::try_from(attempts).unwrap_or(0),
            attempted_at: parse_timestamp(&attempted_at)?,
        }))
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS parcels (
            cadastral_ref TEXT PRIMARY KEY,
            municipality TEXT NOT NULL,
            municipality_code TEXT NOT NULL,
            province TEXT NOT NULL,
            province_code TEXT NOT NULL,
            geometry_geojson TEXT NOT NULL,
            srid INTEGER NOT NULL,
            area_m2 DOUBLE NOT NULL,
            land_use TEXT,
            ingested_at TIMESTAMP NOT NULL
        );

        CREATE INDEX IF NOT EXISTS parcels_municipality_idx ON parcels (municipality);

        CREATE TABLE IF NOT EXISTS units (
            unit_ref TEXT PRIMARY KEY,
            parcel_ref TEXT NOT NULL REFERENCES parcels (cadastral_ref),
            use_type TEXT,
            floor_area DOUBLE,
            year_built INTEGER,
            participation DOUBLE,
            street_name TEXT,
            floor TEXT,
            door TEXT,
            postal_code TEXT,
            municipality TEXT,
            province TEXT,
            ingested_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS unit_fetch_attempts (
            parcel_ref TEXT PRIMARY KEY,
            outcome TEXT NOT NULL,
            unit_count INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            attempted_at TIMESTAMP NOT NULL
        );",
    )?;

    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    use chrono::NaiveDateTime;

    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("bad timestamp {s:?}: {e}"),
        })
}

fn parse_outcome(s: &str) -> Result<AttemptOutcome, DbError> {
    AttemptOutcome::from_str(s).map_err(|e| DbError::Conversion {
        message: format!("unknown attempt outcome {s:?}: {e}"),
    })
}

fn count_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

fn collect_strings(conn: &Connection, sql: &str, param: Option<&str>) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match param {
        Some(value) => stmt.query([value])?,
        None => stmt.query([])?,
    };

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get(0)?);
    }
    Ok(out)
}

impl CadastralStore for DuckDbStore {
    fn parcel_refs(&self, municipality: Option<&str>) -> Result<Vec<String>, DbError> {
        let sql = if municipality.is_some() {
            "SELECT cadastral_ref FROM parcels WHERE municipality = ? ORDER BY cadastral_ref"
        } else {
            "SELECT cadastral_ref FROM parcels ORDER BY cadastral_ref"
        };
        collect_strings(&self.conn, sql, municipality)
    }

    fn existing_parcel_refs(&self, candidates: &[String]) -> Result<BTreeSet<String>, DbError> {
        let mut found = BTreeSet::new();

        for chunk in candidates.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders: String = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT cadastral_ref FROM parcels WHERE cadastral_ref IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql)?;

            for (i, key) in chunk.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, key)?;
            }

            stmt.raw_execute()?;
            let mut rows = stmt.raw_query();
            while let Some(row) = rows.next()? {
                found.insert(row.get(0)?);
            }
        }

        Ok(found)
    }

    fn append_parcels(&self, parcels: &[Parcel]) -> Result<u64, DbError> {
        if parcels.is_empty() {
            return Ok(0);
        }

        self.in_transaction(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO parcels (
                    cadastral_ref, municipality, municipality_code, province,
                    province_code, geometry_geojson, srid, area_m2, land_use,
                    ingested_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            let mut inserted = 0u64;
            for parcel in parcels {
                let geometry =
                    geojson::Geometry::new(geojson::Value::from(&parcel.geometry)).to_string();
                let srid = i64::from(parcel.srid);

                inserted += stmt.execute(duckdb::params![
                    parcel.cadastral_ref,
                    parcel.municipality,
                    parcel.municipality_code,
                    parcel.province,
                    parcel.province_code,
                    geometry,
                    srid,
                    parcel.area_m2,
                    parcel.land_use.as_deref(),
                    format_timestamp(&parcel.ingested_at),
                ])? as u64;
            }

            Ok(inserted)
        })
    }

    fn parcel_refs_with_units(&self) -> Result<BTreeSet<String>, DbError> {
        Ok(collect_strings(&self.conn, "SELECT DISTINCT parcel_ref FROM units", None)?
            .into_iter()
            .collect())
    }

    fn terminal_attempt_refs(&self) -> Result<BTreeSet<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT parcel_ref, outcome FROM unit_fetch_attempts")?;
        let mut rows = stmt.query([])?;

        let mut refs = BTreeSet::new();
        while let Some(row) = rows.next()? {
            let parcel_ref: String = row.get(0)?;
            let outcome: String = row.get(1)?;
            if parse_outcome(&outcome)?.is_terminal() {
                refs.insert(parcel_ref);
            }
        }
        Ok(refs)
    }

    fn append_unit_batch(
        &self,
        units: &[Unit],
        attempts: &[FetchAttempt],
    ) -> Result<u64, DbError> {
        if units.is_empty() && attempts.is_empty() {
            return Ok(0);
        }

        self.in_transaction(|conn| {
            let mut inserted = 0u64;

            if !units.is_empty() {
                let mut stmt = conn.prepare(
                    "INSERT INTO units (
                        unit_ref, parcel_ref, use_type, floor_area, year_built,
                        participation, street_name, floor, door, postal_code,
                        municipality, province, ingested_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (unit_ref) DO NOTHING",
                )?;

                for unit in units {
                    inserted += stmt.execute(duckdb::params![
                        unit.unit_ref,
                        unit.parcel_ref,
                        unit.use_type.as_deref(),
                        unit.floor_area,
                        unit.year_built,
                        unit.participation,
                        unit.street_name.as_deref(),
                        unit.floor.as_deref(),
                        unit.door.as_deref(),
                        unit.postal_code.as_deref(),
                        unit.municipality.as_deref(),
                        unit.province.as_deref(),
                        format_timestamp(&unit.ingested_at),
                    ])? as u64;
                }
            }

            if !attempts.is_empty() {
                let mut stmt = conn.prepare(
                    "INSERT INTO unit_fetch_attempts (
                        parcel_ref, outcome, unit_count, attempts, attempted_at
                    ) VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT (parcel_ref) DO UPDATE SET
                        outcome = EXCLUDED.outcome,
                        unit_count = EXCLUDED.unit_count,
                        attempts = EXCLUDED.attempts,
                        attempted_at = EXCLUDED.attempted_at",
                )?;

                for attempt in attempts {
                    stmt.execute(duckdb::params![
                        attempt.parcel_ref,
                        attempt.outcome.as_ref(),
                        i64::from(attempt.unit_count),
                        i64::from(attempt.attempts),
                        format_timestamp(&attempt.attempted_at),
                    ])?;
                }
            }

            Ok(inserted)
        })
    }

    fn parcel_count(&self, municipality: &str) -> Result<u64, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM parcels WHERE municipality = ?")?;
        let count: i64 = stmt.query_row([municipality], |row| row.get(0))?;
        Ok(count_u64(count))
    }

    fn unit_count(&self, municipality: &str) -> Result<u64, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT COUNT(*) FROM units u
             JOIN parcels p ON p.cadastral_ref = u.parcel_ref
             WHERE p.municipality = ?",
        )?;
        let count: i64 = stmt.query_row([municipality], |row| row.get(0))?;
        Ok(count_u64(count))
    }
}
