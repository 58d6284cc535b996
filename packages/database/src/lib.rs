#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Cadastral store interface and its `DuckDB` implementation.
//!
//! The pipeline only talks to storage through the [`CadastralStore`]
//! trait: append-only parcel and unit tables, queried by exact natural key
//! or by municipality name, plus the per-parcel fetch-attempt markers used
//! for resumption. [`DuckDbStore`] is the production implementation; the
//! geometry column is stored as `GeoJSON` text.

pub mod duckdb_store;
pub mod paths;
pub mod store;

pub use duckdb_store::DuckDbStore;
pub use store::CadastralStore;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (creating the data directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
