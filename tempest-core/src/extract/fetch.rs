//! HTTP collaborator: `fetch(url) -> bytes`, no retries.

use std::time::Duration;
use thiserror::Error;

/// Network failures. Messages never carry the request URL (it may embed an API key).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Source of raw response bodies. Implemented over reqwest in production and
/// by in-memory fakes in tests.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking reqwest client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tempest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.without_url().to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                FetchError::Unreachable(e.without_url().to_string())
            } else {
                FetchError::Request(e.without_url().to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Body(e.without_url().to_string()))
    }
}
