//! Schema inference: dataframe columns → relational column types.
//!
//! Inference is a total function over a closed set of value kinds. Anything
//! that is not clearly integral, floating, boolean or temporal is text.

use crate::dates::parse_datetime;
use polars::prelude::*;
use serde::Serialize;

/// Name of the synthetic 1-based identity column.
pub const IDENTITY_COLUMN: &str = "id";

/// Semantic kind of a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueKind {
    Integer,
    Real,
    Boolean,
    Temporal,
    Text,
}

impl ValueKind {
    /// Inspect a column. String columns count as temporal only when they hold
    /// at least one value and every non-null value parses as a date/time.
    pub fn of_column(column: &Column) -> Self {
        let dtype = column.dtype();
        if dtype.is_integer() {
            ValueKind::Integer
        } else if dtype.is_float() {
            ValueKind::Real
        } else {
            match dtype {
                DataType::Boolean => ValueKind::Boolean,
                DataType::Date | DataType::Datetime(_, _) => ValueKind::Temporal,
                DataType::String if all_temporal(column) => ValueKind::Temporal,
                _ => ValueKind::Text,
            }
        }
    }
}

fn all_temporal(column: &Column) -> bool {
    let Ok(values) = column.as_materialized_series().str() else {
        return false;
    };
    let mut seen = false;
    for value in values.into_iter().flatten() {
        if parse_datetime(value).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

/// Relational storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageType {
    Integer,
    Real,
    Boolean,
    Timestamp,
    Text,
}

impl StorageType {
    pub fn sql(self) -> &'static str {
        match self {
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Boolean => "BOOLEAN",
            StorageType::Timestamp => "TIMESTAMP",
            StorageType::Text => "TEXT",
        }
    }
}

impl From<ValueKind> for StorageType {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Integer => StorageType::Integer,
            ValueKind::Real => StorageType::Real,
            ValueKind::Boolean => StorageType::Boolean,
            ValueKind::Temporal => StorageType::Timestamp,
            ValueKind::Text => StorageType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub storage: StorageType,
    pub primary_key: bool,
}

/// Ordered column → type mapping handed to the database collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn create_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.storage.sql());
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
    }

    pub fn insert_sql(&self, table: &str) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Prepend the 1-based identity column, replacing a source column of the same name.
///
/// Returns the new frame and whether a source `id` column was dropped.
pub fn with_identity(df: &DataFrame) -> PolarsResult<(DataFrame, bool)> {
    let replaced = df.get_column_index(IDENTITY_COLUMN).is_some();
    let base = if replaced {
        df.drop(IDENTITY_COLUMN)?
    } else {
        df.clone()
    };
    Ok((base.with_row_index(IDENTITY_COLUMN.into(), Some(1))?, replaced))
}

/// Infer one column definition per dataframe column, in order. The identity
/// column, when present, is the primary key.
pub fn infer_schema(df: &DataFrame) -> TableSchema {
    let columns = df
        .get_columns()
        .iter()
        .map(|column| ColumnDef {
            name: column.name().to_string(),
            storage: ValueKind::of_column(column).into(),
            primary_key: column.name().as_str() == IDENTITY_COLUMN,
        })
        .collect();
    TableSchema { columns }
}

/// A single bound value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl From<AnyValue<'_>> for SqlValue {
    fn from(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => SqlValue::Null,
            AnyValue::Boolean(v) => SqlValue::Boolean(v),
            AnyValue::Int32(v) => SqlValue::Integer(i64::from(v)),
            AnyValue::Int64(v) => SqlValue::Integer(v),
            AnyValue::UInt32(v) => SqlValue::Integer(i64::from(v)),
            AnyValue::UInt64(v) => match i64::try_from(v) {
                Ok(v) => SqlValue::Integer(v),
                Err(_) => SqlValue::Text(v.to_string()),
            },
            AnyValue::Float32(v) => SqlValue::Real(f64::from(v)),
            AnyValue::Float64(v) => SqlValue::Real(v),
            AnyValue::String(v) => SqlValue::Text(v.to_string()),
            AnyValue::StringOwned(v) => SqlValue::Text(v.to_string()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

/// Row-major values of `df`, in column order.
pub fn table_rows(df: &DataFrame) -> Vec<Vec<SqlValue>> {
    let mut rows: Vec<Vec<SqlValue>> = (0..df.height())
        .map(|_| Vec::with_capacity(df.width()))
        .collect();
    for column in df.get_columns() {
        for (row, value) in rows
            .iter_mut()
            .zip(column.as_materialized_series().iter())
        {
            row.push(SqlValue::from(value));
        }
    }
    rows
}
