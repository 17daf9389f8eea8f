//! Loader failure taxonomy: each condition is simulated independently and
//! must surface as its own variant.

use rusqlite::Connection;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tempest_core::artifact::{ArtifactStore, Format, Stage};
use tempest_core::error::{ErrorKind, TaskError};
use tempest_core::load::{
    load, load_table, Connector, Database, DatabaseConfig, LoadError, SqlValue, TableSchema,
};

fn staged_csv(store: &ArtifactStore) -> PathBuf {
    store
        .stage_bytes(
            Stage::Processed,
            Some("merged"),
            "merged_hourly_data",
            Format::Csv,
            b"time,temp,close\n2024-01-01 05:00:00,3.5,100.5\n",
        )
        .unwrap()
        .path
}

#[test]
fn view_with_the_table_name_is_a_table_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::under(dir.path().join("data"));
    let db_path = dir.path().join("conflict.db");
    Connection::open(&db_path)
        .unwrap()
        .execute_batch("CREATE VIEW hourly_stock_and_weather AS SELECT 1 AS x;")
        .unwrap();

    let err = load(
        &store,
        &staged_csv(&store),
        "hourly_stock_and_weather",
        &DatabaseConfig::new(format!("sqlite://{}", db_path.display())),
    )
    .unwrap_err();

    assert!(
        matches!(err, LoadError::TableConflict { ref table, .. } if table == "hourly_stock_and_weather"),
        "got {err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::QueryExecution);
}

#[test]
fn unreachable_database_is_a_connectivity_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::under(dir.path().join("data"));
    let missing = dir.path().join("no-such-dir").join("tempest.db");

    let err = load(
        &store,
        &staged_csv(&store),
        "hourly_stock_and_weather",
        &DatabaseConfig::new(format!("sqlite://{}", missing.display())),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Connectivity(_)), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Connectivity);
}

#[test]
fn malformed_url_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::under(dir.path().join("data"));

    let err = load(
        &store,
        &staged_csv(&store),
        "t",
        &DatabaseConfig::new("mysql://root@localhost/etl"),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Configuration(_)));
    let task = TaskError::Load {
        table: "t".into(),
        source: err,
    };
    assert_eq!(task.kind(), ErrorKind::Configuration);
}

#[test]
fn missing_artifact_is_not_a_database_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::under(dir.path());

    let err = load(
        &store,
        &dir.path().join("processed/merged/absent.csv"),
        "t",
        &DatabaseConfig::new("sqlite::memory:"),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Artifact(_)));
    assert_eq!(err.kind(), ErrorKind::Transform);
}

// ── Scripted database ────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Script {
    Ok,
    ConflictOnCreate,
    FailInsert,
}

#[derive(Default)]
struct Calls {
    log: Vec<String>,
}

struct ScriptedDb {
    script: Script,
    calls: Rc<RefCell<Calls>>,
}

impl Database for ScriptedDb {
    fn drop_table_if_exists(&mut self, table: &str) -> Result<(), LoadError> {
        self.calls.borrow_mut().log.push(format!("drop {table}"));
        Ok(())
    }

    fn create_table(&mut self, table: &str, schema: &TableSchema) -> Result<(), LoadError> {
        self.calls
            .borrow_mut()
            .log
            .push(format!("create {table} ({} cols)", schema.columns.len()));
        match self.script {
            Script::ConflictOnCreate => Err(LoadError::TableConflict {
                table: table.into(),
                message: "already exists".into(),
            }),
            _ => Ok(()),
        }
    }

    fn insert_rows(
        &mut self,
        table: &str,
        _schema: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<usize, LoadError> {
        self.calls
            .borrow_mut()
            .log
            .push(format!("insert {table} {}", rows.len()));
        match self.script {
            Script::FailInsert => Err(LoadError::QueryExecution {
                table: table.into(),
                message: "disk I/O error".into(),
            }),
            _ => Ok(rows.len()),
        }
    }
}

fn run_scripted(script: Script) -> (Result<usize, LoadError>, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::under(dir.path());
    let calls = Rc::new(RefCell::new(Calls::default()));
    let mut db = ScriptedDb {
        script,
        calls: Rc::clone(&calls),
    };

    let result = load_table(&store, &staged_csv(&store), "merged", &mut db).map(|s| s.rows);
    let log = calls.borrow().log.clone();
    (result, log)
}

#[test]
fn drop_then_create_then_insert() {
    let (result, log) = run_scripted(Script::Ok);
    assert_eq!(result.unwrap(), 1);
    assert_eq!(
        log,
        vec!["drop merged", "create merged (4 cols)", "insert merged 1"]
    );
}

#[test]
fn conflict_stops_before_insert() {
    let (result, log) = run_scripted(Script::ConflictOnCreate);
    assert!(matches!(result, Err(LoadError::TableConflict { .. })));
    assert_eq!(log.len(), 2);
}

#[test]
fn insert_failure_is_query_execution() {
    let (result, _) = run_scripted(Script::FailInsert);
    let err = result.unwrap_err();
    assert!(matches!(err, LoadError::QueryExecution { .. }));
    assert_eq!(err.kind(), ErrorKind::QueryExecution);
}

struct Refusing;

impl Connector for Refusing {
    fn connect(&self) -> Result<Box<dyn Database>, LoadError> {
        Err(LoadError::Connectivity("connection refused".into()))
    }
}

#[test]
fn connector_failure_surfaces_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::under(dir.path());
    let err = load(&store, &staged_csv(&store), "merged", &Refusing).unwrap_err();
    assert!(matches!(err, LoadError::Connectivity(_)));
}
