//! Per-parcel unit lookup with throttling, cooldown, and backoff.
//!
//! Each parcel goes through up to `max_attempts` requests. After every
//! request, successful or not, the fetcher pauses for the throttle
//! interval. A 403 or 429 adds a cooldown on top of the regular backoff.
//! No backoff follows the final attempt; a parcel whose attempts are all
//! exhausted ends as [`LookupOutcome::GivenUp`] with no units.

use std::sync::Arc;
use std::time::Duration;

use catastro_config::LookupConfig;
use catastro_parcel_models::{AttemptOutcome, FetchAttempt, Unit, normalize_reference};
use chrono::{DateTime, Utc};

use crate::UnitFetchError;
use crate::backoff::BackoffPolicy;
use crate::response::decode_payload;
use crate::sleep::Sleeper;
use crate::transport::LookupTransport;

/// How the lookup of one parcel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The service answered with a recognized payload.
    Resolved,
    /// Every attempt failed.
    GivenUp,
}

/// Result of looking up one parcel.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitLookup {
    /// Normalized reference of the parcel that was looked up.
    pub parcel_ref: String,
    /// Units found, empty when none exist or the lookup gave up.
    pub units: Vec<Unit>,
    /// How the lookup ended.
    pub outcome: LookupOutcome,
    /// Requests made.
    pub attempts: u32,
}

impl UnitLookup {
    /// The attempt marker to persist for this lookup.
    #[must_use]
    pub fn attempt_marker(&self, attempted_at: DateTime<Utc>) -> FetchAttempt {
        let outcome = match self.outcome {
            LookupOutcome::GivenUp => AttemptOutcome::GivenUp,
            LookupOutcome::Resolved if self.units.is_empty() => AttemptOutcome::Empty,
            LookupOutcome::Resolved => AttemptOutcome::Units,
        };

        FetchAttempt {
            parcel_ref: self.parcel_ref.clone(),
            outcome,
            unit_count: u32::try_from(self.units.len()).unwrap_or(u32::MAX),
            attempts: self.attempts,
            attempted_at,
        }
    }
}

/// Looks up the units of one parcel at a time.
pub struct UnitFetcher {
    transport: Arc<dyn LookupTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    throttle: Duration,
    cooldown: Duration,
}

impl UnitFetcher {
    /// Creates a fetcher using the retry and pacing settings of `config`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn LookupTransport>,
        sleeper: Arc<dyn Sleeper>,
        config: &LookupConfig,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy: BackoffPolicy::from(config),
            throttle: config.throttle(),
            cooldown: config.cooldown(),
        }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    async fn attempt(&self, parcel_ref: &str) -> Result<Vec<Unit>, UnitFetchError> {
        let response = self.transport.lookup(parcel_ref).await?;

        match response.status {
            200 => Ok(decode_payload(&response.body)?.into_units(parcel_ref, Utc::now())),
            403 | 429 => Err(UnitFetchError::Throttled {
                status: response.status,
            }),
            status => Err(UnitFetchError::Status { status }),
        }
    }

    /// Looks up the units of `parcel_ref`.
    ///
    /// Never fails: exhausted retries are reported as
    /// [`LookupOutcome::GivenUp`].
    pub async fn fetch_units(&self, parcel_ref: &str) -> UnitLookup {
        let parcel_ref = normalize_reference(parcel_ref);
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = self.attempt(&parcel_ref).await;
            self.sleeper.sleep(self.throttle).await;

            match result {
                Ok(units) => {
                    log::debug!(
                        "{parcel_ref}: {} units on attempt {attempt}",
                        units.len()
                    );
                    return UnitLookup {
                        parcel_ref,
                        units,
                        outcome: LookupOutcome::Resolved,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    log::warn!("{parcel_ref}: attempt {attempt}/{max_attempts} failed: {e}");

                    if e.is_throttle() {
                        log::warn!(
                            "{parcel_ref}: rate limited, cooling down for {}s",
                            self.cooldown.as_secs_f64()
                        );
                        self.sleeper.sleep(self.cooldown).await;
                    }

                    if attempt < max_attempts {
                        self.sleeper.sleep(self.policy.delay_for(attempt)).await;
                    }
                }
            }
        }

        log::warn!("{parcel_ref}: giving up after {max_attempts} attempts");
        UnitLookup {
            parcel_ref,
            units: Vec::new(),
            outcome: LookupOutcome::GivenUp,
            attempts: max_attempts,
        }
    }
}
