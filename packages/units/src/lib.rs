#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-parcel unit lookups against the cadastral `Consulta_DNPRC` service.
//!
//! [`UnitFetcher`] drives one [`LookupTransport`] request at a time,
//! pausing after every request, cooling down on rate-limit answers, and
//! retrying with [`BackoffPolicy`]. Responses are decoded by
//! [`response::decode_payload`] into [`response::LookupPayload`] and then
//! into [`catastro_parcel_models::Unit`] records.

pub mod backoff;
pub mod fetcher;
pub mod response;
pub mod sleep;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use fetcher::{LookupOutcome, UnitFetcher, UnitLookup};
pub use sleep::{RecordingSleeper, Sleeper, TokioSleeper};
pub use transport::{HttpLookupClient, LookupResponse, LookupTransport};

/// Errors from a single lookup attempt.
#[derive(Debug, thiserror::Error)]
pub enum UnitFetchError {
    /// No response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The service is rate limiting us (403 or 429).
    #[error("Rate limited (HTTP {status})")]
    Throttled {
        /// HTTP status code.
        status: u16,
    },

    /// The body is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// The JSON has none of the known shapes.
    #[error("Unexpected response shape: {message}")]
    Shape {
        /// What was missing.
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {message}")]
    Client {
        /// What went wrong.
        message: String,
    },
}

impl UnitFetchError {
    /// Whether this is a rate-limit signal that calls for a cooldown.
    #[must_use]
    pub const fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}
