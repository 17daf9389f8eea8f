//! Pipeline configuration, read from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! apart from the extractor sources, which must be declared.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempest_core::extract::{Granularity, SourceConfig, SourceConfigError};
use tempest_core::load::DatabaseConfig;
use tempest_core::ArtifactStore;
use thiserror::Error;
use tracing::debug;

use crate::executor::ExecutorOptions;

/// Environment variable that replaces `database.url`.
pub const DATABASE_URL_ENV: &str = "TEMPEST_DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("source '{0}' is not configured")]
    MissingSource(String),

    #[error("source '{source_name}' has no '{endpoint}' endpoint")]
    MissingEndpoint {
        source_name: String,
        endpoint: Granularity,
    },

    #[error(transparent)]
    Source(#[from] SourceConfigError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub artifacts: ArtifactConfig,
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
    pub sources: SourcesConfig,
}

/// Base directories of the three artifact stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            output_dir: PathBuf::from("data/output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Cap on concurrently running tasks; unset means one per core.
    pub max_parallel: Option<usize>,
    /// Per-request timeout of the HTTP client.
    pub http_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            http_timeout_secs: 30,
        }
    }
}

/// The three extractor sources the pipeline schedules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub current_weather: Option<SourceConfig>,
    pub historical_weather: Option<SourceConfig>,
    pub stock: Option<SourceConfig>,
}

impl PipelineConfig {
    /// Read `path` and apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env_overrides();
        debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = std::env::var(DATABASE_URL_ENV).ok().filter(|u| !u.trim().is_empty()) {
            debug!(var = DATABASE_URL_ENV, "database URL taken from environment");
            self.database.url = url;
        }
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(
            &self.artifacts.raw_dir,
            &self.artifacts.processed_dir,
            &self.artifacts.output_dir,
        )
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            max_parallel: self.executor.max_parallel,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.http_timeout_secs)
    }

    /// Look up a source by its task name.
    pub fn source(&self, name: &str) -> Result<&SourceConfig, ConfigError> {
        let slot = match name {
            "current_weather" => self.sources.current_weather.as_ref(),
            "historical_weather" => self.sources.historical_weather.as_ref(),
            "stock" => self.sources.stock.as_ref(),
            _ => None,
        };
        slot.ok_or_else(|| ConfigError::MissingSource(name.to_string()))
    }

    /// Like [`PipelineConfig::source`], also requiring the given endpoints.
    pub fn source_with(
        &self,
        name: &str,
        endpoints: &[Granularity],
    ) -> Result<&SourceConfig, ConfigError> {
        let source = self.source(name)?;
        if let Some(&missing) = endpoints.iter().find(|g| !source.endpoints.contains_key(g)) {
            return Err(ConfigError::MissingEndpoint {
                source_name: name.to_string(),
                endpoint: missing,
            });
        }
        Ok(source)
    }
}
