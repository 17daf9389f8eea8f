//! Cleaners, enrichers and the merger.
//!
//! Every transform reads one or two staged artifacts, works on a polars
//! dataframe, and stages its result as a new processed artifact. Nothing is
//! modified in place on disk.

pub mod clean;
pub mod enrich;
pub mod merge;

pub use clean::{clean, clean_frame, CleanSpec};
pub use enrich::{enrich, enrich_frame, EnrichSpec};
pub use merge::{merge, merge_frames, JoinMode, MergeSpec};

use crate::artifact::ArtifactError;
use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while cleaning, enriching or merging.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("column '{column}' not found in {}", .artifact.display())]
    MissingColumn { column: String, artifact: PathBuf },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("dataframe operation failed on {}: {message}", .artifact.display())]
    Frame { artifact: PathBuf, message: String },
}

impl TransformError {
    pub(crate) fn frame(artifact: &Path) -> impl Fn(PolarsError) -> TransformError + '_ {
        move |e| TransformError::Frame {
            artifact: artifact.to_path_buf(),
            message: e.to_string(),
        }
    }
}

/// Fail with [`TransformError::MissingColumn`] unless `df` has `column`.
pub(crate) fn require_column(
    df: &DataFrame,
    column: &str,
    artifact: &Path,
) -> Result<(), TransformError> {
    if df.get_column_index(column).is_some() {
        Ok(())
    } else {
        Err(TransformError::MissingColumn {
            column: column.to_string(),
            artifact: artifact.to_path_buf(),
        })
    }
}

/// Source family a transform is specialised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Weather,
    Stock,
}

impl Dataset {
    pub fn name(self) -> &'static str {
        match self {
            Dataset::Weather => "weather",
            Dataset::Stock => "stock",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weather" => Ok(Dataset::Weather),
            "stock" => Ok(Dataset::Stock),
            other => Err(format!("unknown dataset '{other}' (expected weather or stock)")),
        }
    }
}
