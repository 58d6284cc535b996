//! HTTP access to the lookup service.

use catastro_config::LookupConfig;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER, USER_AGENT};

use crate::UnitFetchError;

/// Raw answer of one lookup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// Performs one lookup request per call. Retries are the caller's job.
#[async_trait::async_trait]
pub trait LookupTransport: Send + Sync {
    /// Requests the record of `refcat`.
    ///
    /// # Errors
    ///
    /// Returns [`UnitFetchError::Http`] if no response was received.
    async fn lookup(&self, refcat: &str) -> Result<LookupResponse, UnitFetchError>;
}

/// [`LookupTransport`] over `reqwest` with browser-like headers.
pub struct HttpLookupClient {
    client: reqwest::Client,
    config: LookupConfig,
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, UnitFetchError> {
    HeaderValue::from_str(value).map_err(|e| UnitFetchError::Client {
        message: format!("invalid {name} header {value:?}: {e}"),
    })
}

impl HttpLookupClient {
    /// Builds a client from the lookup settings.
    ///
    /// # Errors
    ///
    /// Returns [`UnitFetchError::Client`] if a header value is invalid or
    /// the client cannot be constructed.
    pub fn new(config: &LookupConfig) -> Result<Self, UnitFetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value("User-Agent", &config.user_agent)?);
        headers.insert(ACCEPT, header_value("Accept", &config.accept)?);
        headers.insert(REFERER, header_value("Referer", &config.referer)?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| UnitFetchError::Client {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait::async_trait]
impl LookupTransport for HttpLookupClient {
    async fn lookup(&self, refcat: &str) -> Result<LookupResponse, UnitFetchError> {
        let url = self.config.lookup_url(refcat);
        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(LookupResponse { status, body })
    }
}
