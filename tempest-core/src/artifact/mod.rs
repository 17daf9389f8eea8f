//! Artifact store: the only medium of inter-stage communication.
//!
//! Layout: `{base_dir}/{category...}/{prefix}-{token}.{ext}` where the base
//! directory is chosen by [`Stage`] (raw / processed / output).
//!
//! Every write goes to a freshly allocated path, staged through a `.tmp`
//! sibling and renamed into place, so a consumer never observes a partial file.

pub mod store;
pub mod table;

pub use store::{file_digest, Artifact, ArtifactStore, Stage};
pub use table::{read_table, write_csv};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// On-disk encoding of an artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Csv,
    Json,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
        }
    }

    /// Infer the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Format::Csv),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Errors from allocating, reading, or writing artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize {}: {message}", .path.display())]
    Serialize { path: PathBuf, message: String },

    #[error("unsupported artifact format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("could not allocate a unique path under {}", .dir.display())]
    Exhausted { dir: PathBuf },
}

impl ArtifactError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Path of the artifact the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            ArtifactError::Io { path, .. }
            | ArtifactError::Parse { path, .. }
            | ArtifactError::Serialize { path, .. }
            | ArtifactError::UnsupportedFormat { path } => path,
            ArtifactError::Exhausted { dir } => dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_path() {
        assert_eq!(Format::from_path(Path::new("a/b.csv")), Some(Format::Csv));
        assert_eq!(Format::from_path(Path::new("a/b.JSON")), Some(Format::Json));
        assert_eq!(Format::from_path(Path::new("a/b.parquet")), None);
        assert_eq!(Format::from_path(Path::new("a/b")), None);
    }

    #[test]
    fn error_message_names_the_file() {
        let err = ArtifactError::UnsupportedFormat {
            path: PathBuf::from("raw/stock/x.xml"),
        };
        assert!(err.to_string().contains("raw/stock/x.xml"));
        assert_eq!(err.path(), Path::new("raw/stock/x.xml"));
    }
}
