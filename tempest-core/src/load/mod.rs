//! Loader: infer a schema, recreate the target table, bulk-insert, and mirror
//! the loaded rows to an audit artifact.

pub mod database;
pub mod schema;

pub use database::{Connector, Database, DatabaseConfig, DatabaseTarget, SqliteDatabase};
pub use schema::{infer_schema, ColumnDef, SqlValue, StorageType, TableSchema, ValueKind};

use crate::artifact::{read_table, Artifact, ArtifactError, ArtifactStore, Stage};
use crate::error::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Load failures. Conflicts, configuration and connectivity problems stay
/// distinct from generic query errors.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("table '{table}' conflicts with an existing schema object: {message}")]
    TableConflict { table: String, message: String },

    #[error("database configuration error: {0}")]
    Configuration(String),

    #[error("database unreachable: {0}")]
    Connectivity(String),

    #[error("query on table '{table}' failed: {message}")]
    QueryExecution { table: String, message: String },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("failed to prepare rows from {}: {message}", .artifact.display())]
    Frame {
        artifact: std::path::PathBuf,
        message: String,
    },
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::TableConflict { .. } | LoadError::QueryExecution { .. } => {
                ErrorKind::QueryExecution
            }
            LoadError::Configuration(_) => ErrorKind::Configuration,
            LoadError::Connectivity(_) => ErrorKind::Connectivity,
            LoadError::Artifact(_) | LoadError::Frame { .. } => ErrorKind::Transform,
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub table: String,
    pub rows: usize,
    pub schema: TableSchema,
    /// Mirror of the loaded rows under `output/`.
    pub audit: Artifact,
}

/// Load the artifact at `input` into `table` through an open database.
pub fn load_table(
    store: &ArtifactStore,
    input: &Path,
    table: &str,
    db: &mut dyn Database,
) -> Result<LoadSummary, LoadError> {
    if table.trim().is_empty() {
        return Err(LoadError::Configuration("target table name is empty".into()));
    }

    let frame_err = |e: polars::prelude::PolarsError| LoadError::Frame {
        artifact: input.to_path_buf(),
        message: e.to_string(),
    };
    let df = read_table(input)?;
    let (mut df, replaced) = schema::with_identity(&df).map_err(frame_err)?;
    if replaced {
        warn!(table, input = %input.display(), "source 'id' column replaced by identity column");
    }

    let table_schema = infer_schema(&df);
    let rows = schema::table_rows(&df);

    db.drop_table_if_exists(table)?;
    db.create_table(table, &table_schema)?;
    let inserted = db.insert_rows(table, &table_schema, &rows)?;

    let audit = store.stage_table(Stage::Output, None, table, &mut df)?;
    info!(
        table,
        rows = inserted,
        columns = table_schema.columns.len(),
        input = %input.display(),
        audit = %audit.path.display(),
        "loaded table"
    );

    Ok(LoadSummary {
        table: table.to_string(),
        rows: inserted,
        schema: table_schema,
        audit,
    })
}

/// Open a connection through `connector` and load `input` into `table`.
pub fn load(
    store: &ArtifactStore,
    input: &Path,
    table: &str,
    connector: &dyn Connector,
) -> Result<LoadSummary, LoadError> {
    let mut db = connector.connect()?;
    load_table(store, input, table, db.as_mut())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_stay_distinct() {
        assert_eq!(
            LoadError::TableConflict {
                table: "t".into(),
                message: "m".into()
            }
            .kind(),
            ErrorKind::QueryExecution
        );
        assert_eq!(
            LoadError::Connectivity("down".into()).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            LoadError::Configuration("bad".into()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn empty_table_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::under(dir.path());
        let mut db = SqliteDatabase::open(&DatabaseTarget::Memory).unwrap();

        let err = load_table(&store, &dir.path().join("x.csv"), " ", &mut db).unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }
}
