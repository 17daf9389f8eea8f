//! Cross-stage error taxonomy.
//!
//! Each stage has its own error enum; [`TaskError`] tags a stage failure with
//! the task context the orchestrator reports, and [`ErrorKind`] is the closed
//! set of failure categories operators see.

use crate::artifact::ArtifactError;
use crate::extract::ExtractError;
use crate::load::LoadError;
use crate::transform::TransformError;
use serde::Serialize;
use thiserror::Error;

/// Failure categories surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, API, or file-write error while fetching raw data.
    Extraction,
    /// Malformed or unexpected data during clean / enrich / merge.
    Transform,
    /// Malformed database or API configuration.
    Configuration,
    /// Target database unreachable.
    Connectivity,
    /// Schema/table conflict or insert failure.
    QueryExecution,
}

/// A failed task, with enough context to name the stage and file/table involved.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("extract '{source_name}' failed: {source}")]
    Extraction {
        source_name: String,
        #[source]
        source: ExtractError,
    },

    #[error("{stage} failed: {source}")]
    Transform {
        stage: String,
        #[source]
        source: TransformError,
    },

    #[error("load into table '{table}' failed: {source}")]
    Load {
        table: String,
        #[source]
        source: LoadError,
    },

    #[error("{stage} failed: {source}")]
    Artifact {
        stage: String,
        #[source]
        source: ArtifactError,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task '{task}' has no input bound as '{param}'")]
    MissingInput { task: String, param: String },

    #[error("task '{task}' did not produce declared output '{output}'")]
    MissingOutput { task: String, output: String },

    #[error("task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Extraction { .. } => ErrorKind::Extraction,
            TaskError::Transform { .. }
            | TaskError::Artifact { .. }
            | TaskError::MissingInput { .. }
            | TaskError::MissingOutput { .. }
            | TaskError::Panicked { .. } => ErrorKind::Transform,
            TaskError::Load { source, .. } => source.kind(),
            TaskError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FetchError;
    use std::path::PathBuf;

    #[test]
    fn load_errors_keep_their_own_kind() {
        let conflict = TaskError::Load {
            table: "weather".into(),
            source: LoadError::TableConflict {
                table: "weather".into(),
                message: "use DROP VIEW".into(),
            },
        };
        let unreachable = TaskError::Load {
            table: "weather".into(),
            source: LoadError::Connectivity("cannot open".into()),
        };
        let misconfigured = TaskError::Load {
            table: "weather".into(),
            source: LoadError::Configuration("bad url".into()),
        };

        assert_eq!(conflict.kind(), ErrorKind::QueryExecution);
        assert_eq!(unreachable.kind(), ErrorKind::Connectivity);
        assert_eq!(misconfigured.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn messages_carry_stage_and_file_context() {
        let err = TaskError::Transform {
            stage: "clean.hourly_stock".into(),
            source: TransformError::MissingColumn {
                column: "timestamp".into(),
                artifact: PathBuf::from("raw/stock/hourly.csv"),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("clean.hourly_stock"));
        assert!(msg.contains("timestamp"));
        assert!(msg.contains("raw/stock/hourly.csv"));
        assert_eq!(err.kind(), ErrorKind::Transform);
    }

    #[test]
    fn extraction_errors_are_extraction_kind() {
        let err = TaskError::Extraction {
            source_name: "stock".into(),
            source: ExtractError::Fetch {
                endpoint: "hourly".into(),
                source: FetchError::Unreachable("connection refused".into()),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.to_string().contains("stock"));
    }
}
