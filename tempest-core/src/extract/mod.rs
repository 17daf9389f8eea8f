//! Extractors: fetch raw API responses and stage them verbatim.
//!
//! An extractor is built from an explicit [`SourceConfig`]. It owns one
//! endpoint per [`Granularity`] and produces one raw artifact per endpoint,
//! keyed by the granularity name (`current`, `hourly`, `daily`). No parsing
//! happens here.

pub mod fetch;

pub use fetch::{FetchError, Fetcher, HttpFetcher};

use crate::artifact::{Artifact, ArtifactError, ArtifactStore, Format, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

const API_KEY_PLACEHOLDER: &str = "{api_key}";

/// Time resolution an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Current,
    Hourly,
    Daily,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Current => "current",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// URL template; `{api_key}` is substituted at construction.
    pub url: String,
    /// Artifact file prefix, e.g. `hourly_stock_data`.
    pub prefix: String,
    #[serde(default)]
    pub format: Format,
}

/// Configuration of one external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key; consulted when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Raw sub-directory, e.g. `weather` or `stock`.
    pub category: String,
    pub endpoints: BTreeMap<Granularity, EndpointConfig>,
}

impl SourceConfig {
    fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceConfigError {
    #[error("source '{source_name}' endpoint '{endpoint}' needs an API key but none is configured")]
    MissingApiKey { source_name: String, endpoint: String },

    #[error("source '{0}' declares no endpoints")]
    NoEndpoints(String),
}

/// Failure of one extractor run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("fetching '{endpoint}' failed: {source}")]
    Fetch {
        endpoint: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

struct Endpoint {
    granularity: Granularity,
    url: String,
    prefix: String,
    format: Format,
}

/// A configured extractor. Resolved URLs are kept private and never logged.
pub struct Extractor {
    name: String,
    category: String,
    endpoints: Vec<Endpoint>,
}

impl Extractor {
    /// Resolve the API key and URL templates. Fails before any request is made.
    pub fn from_config(name: &str, config: &SourceConfig) -> Result<Self, SourceConfigError> {
        if config.endpoints.is_empty() {
            return Err(SourceConfigError::NoEndpoints(name.to_string()));
        }

        let api_key = config.resolve_api_key();
        let endpoints = config
            .endpoints
            .iter()
            .map(|(granularity, ep)| -> Result<Endpoint, SourceConfigError> {
                let url = if ep.url.contains(API_KEY_PLACEHOLDER) {
                    let key = api_key.as_deref().ok_or_else(|| SourceConfigError::MissingApiKey {
                        source_name: name.to_string(),
                        endpoint: granularity.to_string(),
                    })?;
                    ep.url.replace(API_KEY_PLACEHOLDER, key)
                } else {
                    ep.url.clone()
                };
                Ok(Endpoint {
                    granularity: *granularity,
                    url,
                    prefix: ep.prefix.clone(),
                    format: ep.format,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            category: config.category.clone(),
            endpoints,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output names, one per endpoint, in granularity order.
    pub fn outputs(&self) -> Vec<&'static str> {
        self.endpoints.iter().map(|e| e.granularity.as_str()).collect()
    }

    /// Fetch every endpoint and stage each body under `raw/<category>`.
    ///
    /// The first failure aborts the run; artifacts already staged stay on disk.
    pub fn run(
        &self,
        fetcher: &dyn Fetcher,
        store: &ArtifactStore,
    ) -> Result<BTreeMap<String, Artifact>, ExtractError> {
        let mut outputs = BTreeMap::new();
        for endpoint in &self.endpoints {
            debug!(source = %self.name, endpoint = %endpoint.granularity, "fetching");
            let body = fetcher.fetch(&endpoint.url).map_err(|source| ExtractError::Fetch {
                endpoint: endpoint.granularity.to_string(),
                source,
            })?;

            let artifact = store.stage_bytes(
                Stage::Raw,
                Some(&self.category),
                &endpoint.prefix,
                endpoint.format,
                &body,
            )?;
            info!(
                source = %self.name,
                endpoint = %endpoint.granularity,
                bytes = body.len(),
                path = %artifact.path.display(),
                "extracted"
            );
            outputs.insert(endpoint.granularity.to_string(), artifact);
        }
        Ok(outputs)
    }
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("outputs", &self.outputs())
            .finish()
    }
}
