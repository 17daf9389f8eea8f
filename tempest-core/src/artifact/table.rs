//! Tabular I/O: artifacts in, dataframes out (and back).

use super::{ArtifactError, Format};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Load an artifact into a dataframe, dispatching on its extension.
///
/// CSV artifacts infer column types over the whole file. JSON artifacts may
/// hold an array of objects (one row each) or a single object (one row).
pub fn read_table(path: &Path) -> Result<DataFrame, ArtifactError> {
    match Format::from_path(path) {
        Some(Format::Csv) => read_csv(path),
        Some(Format::Json) => read_json(path),
        None => Err(ArtifactError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Serialize a dataframe to CSV bytes (header row included, nulls as empty cells).
pub fn write_csv(df: &mut DataFrame) -> PolarsResult<Vec<u8>> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf).include_header(true).finish(df)?;
    Ok(buf)
}

fn read_csv(path: &Path) -> Result<DataFrame, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "artifact does not exist"),
        ));
    }

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| ArtifactError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn read_json(path: &Path) -> Result<DataFrame, ArtifactError> {
    let bytes = fs::read(path).map_err(|e| ArtifactError::io(path, e))?;
    let parse_err = |message: String| ArtifactError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| parse_err(e.to_string()))?;
    let records = json_records(value).map_err(parse_err)?;
    records_to_frame(&records).map_err(|e| parse_err(e.to_string()))
}

fn json_records(value: Value) -> Result<Vec<Map<String, Value>>, String> {
    match value {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(record) => Ok(record),
                other => Err(format!("element {i} is not an object: {other}")),
            })
            .collect(),
        other => Err(format!("expected an object or array of objects, got {other}")),
    }
}

/// Build one column per key (first-seen order). Records missing a key get a null.
fn records_to_frame(records: &[Map<String, Value>]) -> PolarsResult<DataFrame> {
    let mut names: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key.as_str());
            }
        }
    }

    let columns = names
        .iter()
        .map(|name| {
            let values: Vec<Option<&Value>> = records
                .iter()
                .map(|record| record.get(*name).filter(|v| !v.is_null()))
                .collect();
            json_column(name, &values)
        })
        .collect();

    DataFrame::new(columns)
}

/// Pick the narrowest column type that holds every present value.
/// Nested objects and arrays are stringified as JSON text.
fn json_column(name: &str, values: &[Option<&Value>]) -> Column {
    let mut present = values.iter().flatten().peekable();
    if present.peek().is_none() {
        let empty: Vec<Option<String>> = vec![None; values.len()];
        return Column::new(name.into(), empty);
    }

    if values.iter().flatten().all(|v| v.is_i64()) {
        let ints: Vec<Option<i64>> = values.iter().map(|v| v.and_then(Value::as_i64)).collect();
        Column::new(name.into(), ints)
    } else if values.iter().flatten().all(|v| v.is_number()) {
        let floats: Vec<Option<f64>> = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
        Column::new(name.into(), floats)
    } else if values.iter().flatten().all(|v| v.is_boolean()) {
        let bools: Vec<Option<bool>> = values.iter().map(|v| v.and_then(Value::as_bool)).collect();
        Column::new(name.into(), bools)
    } else {
        let text: Vec<Option<String>> = values
            .iter()
            .map(|v| {
                v.map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
            .collect();
        Column::new(name.into(), text)
    }
}
