//! Path allocation and staging of artifacts.

use super::table::write_csv;
use super::{ArtifactError, Format};
use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Attempts at finding an unused path before giving up.
const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// Pipeline stage an artifact belongs to. Each stage has its own base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Raw,
    Processed,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Raw => "raw",
            Stage::Processed => "processed",
            Stage::Output => "output",
        })
    }
}

/// An immutable, uniquely named file of tabular data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub stage: Stage,
    pub category: Option<String>,
    pub prefix: String,
    pub generated_at: NaiveDateTime,
    pub format: Format,
    /// BLAKE3 digest of the file contents.
    pub digest: String,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Root of the three stage directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(
        raw_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Store with the conventional `raw/`, `processed/`, `output/` children of `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root.join("raw"), root.join("processed"), root.join("output"))
    }

    pub fn base_dir(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Raw => &self.raw_dir,
            Stage::Processed => &self.processed_dir,
            Stage::Output => &self.output_dir,
        }
    }

    /// Directory for a stage + category. Categories may nest with `/` (e.g. `cleaned/stock`).
    pub fn category_dir(&self, stage: Stage, category: Option<&str>) -> PathBuf {
        let base = self.base_dir(stage).to_path_buf();
        match category {
            None => base,
            Some(category) => category
                .split('/')
                .filter(|segment| !segment.is_empty())
                .fold(base, |dir, segment| dir.join(segment)),
        }
    }

    /// Reserve a fresh path `{dir}/{prefix}-{token}.{ext}`.
    ///
    /// The token combines the generation time (microseconds) with 32 random
    /// bits; a path that already exists is never handed out.
    pub fn allocate(
        &self,
        stage: Stage,
        category: Option<&str>,
        prefix: &str,
        format: Format,
    ) -> Result<(PathBuf, NaiveDateTime), ArtifactError> {
        let dir = self.category_dir(stage, category);
        fs::create_dir_all(&dir).map_err(|e| ArtifactError::io(&dir, e))?;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let generated_at = chrono::Local::now().naive_local();
            let token = uniqueness_token(generated_at);
            let path = dir.join(format!("{prefix}-{token}.{}", format.extension()));
            if !path.exists() && !tmp_path(&path).exists() {
                return Ok((path, generated_at));
            }
        }

        Err(ArtifactError::Exhausted { dir })
    }

    /// Stage raw bytes verbatim as a new artifact.
    pub fn stage_bytes(
        &self,
        stage: Stage,
        category: Option<&str>,
        prefix: &str,
        format: Format,
        bytes: &[u8],
    ) -> Result<Artifact, ArtifactError> {
        let (path, generated_at) = self.allocate(stage, category, prefix, format)?;
        write_atomic(&path, bytes)?;

        let artifact = Artifact {
            path,
            stage,
            category: category.map(str::to_string),
            prefix: prefix.to_string(),
            generated_at,
            format,
            digest: blake3::hash(bytes).to_hex().to_string(),
        };
        info!(
            path = %artifact.path.display(),
            bytes = bytes.len(),
            digest = %artifact.digest,
            "staged artifact"
        );
        Ok(artifact)
    }

    /// Serialize a dataframe to CSV and stage it as a new artifact.
    pub fn stage_table(
        &self,
        stage: Stage,
        category: Option<&str>,
        prefix: &str,
        df: &mut DataFrame,
    ) -> Result<Artifact, ArtifactError> {
        let bytes = write_csv(df).map_err(|e| ArtifactError::Serialize {
            path: self.category_dir(stage, category).join(prefix),
            message: e.to_string(),
        })?;
        debug!(prefix, rows = df.height(), columns = df.width(), "serialized table");
        self.stage_bytes(stage, category, prefix, Format::Csv, &bytes)
    }

    /// Remove everything under the three stage directories, keeping the directories.
    ///
    /// Returns the number of top-level entries removed.
    pub fn clear(&self) -> Result<usize, ArtifactError> {
        let mut removed = 0;
        for stage in [Stage::Raw, Stage::Processed, Stage::Output] {
            let dir = self.base_dir(stage);
            if !dir.exists() {
                continue;
            }
            let entries = fs::read_dir(dir).map_err(|e| ArtifactError::io(dir, e))?;
            for entry in entries {
                let path = entry.map_err(|e| ArtifactError::io(dir, e))?.path();
                let result = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                result.map_err(|e| ArtifactError::io(&path, e))?;
                removed += 1;
            }
        }
        info!(removed, "cleared artifact directories");
        Ok(removed)
    }
}

/// BLAKE3 digest of an artifact file on disk.
pub fn file_digest(path: &Path) -> Result<String, ArtifactError> {
    let bytes = fs::read(path).map_err(|e| ArtifactError::io(path, e))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn uniqueness_token(generated_at: NaiveDateTime) -> String {
    format!(
        "{}-{:08x}",
        generated_at.format("%Y%m%dT%H%M%S%6f"),
        rand::random::<u32>()
    )
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write to `{path}.tmp` (create-new), then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let tmp = tmp_path(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .map_err(|e| ArtifactError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ArtifactError::io(&tmp, e)
        })?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ArtifactError::io(path, e)
    })
}
