//! Database collaborator: the trait the loader talks to, and its SQLite
//! implementation over rusqlite.

use super::schema::{quote_ident, SqlValue, TableSchema};
use super::LoadError;
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// How long a writer waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the loader needs from a relational store.
pub trait Database {
    fn drop_table_if_exists(&mut self, table: &str) -> Result<(), LoadError>;

    fn create_table(&mut self, table: &str, schema: &TableSchema) -> Result<(), LoadError>;

    /// Insert every row in one transaction; nothing is visible unless all succeed.
    fn insert_rows(
        &mut self,
        table: &str,
        schema: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<usize, LoadError>;
}

/// Opens a fresh [`Database`] for each load.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Database>, LoadError>;
}

/// Database URL: `sqlite://<path>` or `sqlite::memory:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/tempest.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    File(PathBuf),
    Memory,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Parse the URL. Only the scheme is echoed in errors, never the full URL.
    pub fn target(&self) -> Result<DatabaseTarget, LoadError> {
        let url = self.url.trim();
        if url == "sqlite::memory:" {
            return Ok(DatabaseTarget::Memory);
        }
        match url.strip_prefix("sqlite://") {
            Some("") => Err(LoadError::Configuration(
                "sqlite URL has no database path".into(),
            )),
            Some(path) => Ok(DatabaseTarget::File(PathBuf::from(path))),
            None => {
                let scheme = url.split("://").next().unwrap_or_default();
                Err(LoadError::Configuration(format!(
                    "unsupported database URL scheme '{scheme}' (expected sqlite:// or sqlite::memory:)"
                )))
            }
        }
    }
}

impl Connector for DatabaseConfig {
    fn connect(&self) -> Result<Box<dyn Database>, LoadError> {
        let target = self.target()?;
        Ok(Box::new(SqliteDatabase::open(&target)?))
    }
}

pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Open the database; an unreachable file is a connectivity error.
    pub fn open(target: &DatabaseTarget) -> Result<Self, LoadError> {
        let conn = match target {
            DatabaseTarget::Memory => Connection::open_in_memory(),
            DatabaseTarget::File(path) => Connection::open(path),
        }
        .map_err(|e| LoadError::Connectivity(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LoadError::Connectivity(e.to_string()))?;
        debug!(?target, "opened sqlite database");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Database for SqliteDatabase {
    fn drop_table_if_exists(&mut self, table: &str) -> Result<(), LoadError> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])
            .map(|_| ())
            .map_err(|e| classify(table, e))
    }

    fn create_table(&mut self, table: &str, schema: &TableSchema) -> Result<(), LoadError> {
        self.conn
            .execute(&schema.create_sql(table), [])
            .map(|_| ())
            .map_err(|e| classify(table, e))
    }

    fn insert_rows(
        &mut self,
        table: &str,
        schema: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<usize, LoadError> {
        let tx = self.conn.transaction().map_err(|e| classify(table, e))?;
        {
            let mut stmt = tx
                .prepare(&schema.insert_sql(table))
                .map_err(|e| classify(table, e))?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))
                    .map_err(|e| classify(table, e))?;
            }
        }
        tx.commit().map_err(|e| classify(table, e))?;
        Ok(rows.len())
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Boolean(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::Text(v) => ToSqlOutput::from(v.as_str()),
        })
    }
}

/// Sort a SQLite failure into the load taxonomy.
fn classify(table: &str, err: rusqlite::Error) -> LoadError {
    let message = err.to_string();
    match err.sqlite_error_code() {
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => LoadError::Connectivity(message),
        _ if message.contains("already exists")
            || message.contains("DROP VIEW")
            || message.contains("already an index") =>
        {
            LoadError::TableConflict {
                table: table.to_string(),
                message,
            }
        }
        _ => LoadError::QueryExecution {
            table: table.to_string(),
            message,
        },
    }
}
