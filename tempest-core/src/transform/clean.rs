//! Cleaner: stringify nested values, normalize and sort by the time column,
//! drop exact duplicates, restage.

use super::{require_column, Dataset, TransformError};
use crate::artifact::{read_table, Artifact, ArtifactStore, Stage};
use crate::dates::{format_date, parse_column, CanonicalFormat};
use polars::prelude::*;
use std::path::Path;
use tracing::info;

/// Parsed instants of the sort column, in microseconds; dropped before staging.
const SORT_KEY: &str = "__tempest_sort";

/// Parameters of one cleaning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanSpec {
    /// Prefix of the staged artifact.
    pub output_name: String,
    /// Column parsed as a timestamp, sorted on, and re-rendered.
    pub sort_by: String,
    pub format: CanonicalFormat,
    pub dataset: Dataset,
}

impl CleanSpec {
    /// Stock series keep seconds when they carry a time of day.
    pub fn stock(output_name: impl Into<String>, sort_by: impl Into<String>, has_time: bool) -> Self {
        Self {
            output_name: output_name.into(),
            sort_by: sort_by.into(),
            format: if has_time {
                CanonicalFormat::Second
            } else {
                CanonicalFormat::Date
            },
            dataset: Dataset::Stock,
        }
    }

    /// Weather series are rendered to the minute unless they are daily.
    pub fn weather(
        output_name: impl Into<String>,
        sort_by: impl Into<String>,
        date_only: bool,
    ) -> Self {
        Self {
            output_name: output_name.into(),
            sort_by: sort_by.into(),
            format: if date_only {
                CanonicalFormat::Date
            } else {
                CanonicalFormat::Minute
            },
            dataset: Dataset::Weather,
        }
    }

    fn category(&self) -> String {
        format!("cleaned/{}", self.dataset)
    }
}

/// Clean the artifact at `input` and stage the result under `processed/cleaned/<dataset>`.
///
/// A missing sort column is an error; nothing is staged in that case.
pub fn clean(
    store: &ArtifactStore,
    input: &Path,
    spec: &CleanSpec,
) -> Result<Artifact, TransformError> {
    let df = read_table(input)?;
    require_column(&df, &spec.sort_by, input)?;
    let rows_in = df.height();

    let mut cleaned =
        clean_frame(df, &spec.sort_by, spec.format).map_err(TransformError::frame(input))?;
    let artifact = store.stage_table(
        Stage::Processed,
        Some(&spec.category()),
        &spec.output_name,
        &mut cleaned,
    )?;

    info!(
        input = %input.display(),
        output = %artifact.path.display(),
        rows_in,
        rows_out = cleaned.height(),
        "cleaned {}",
        spec.dataset
    );
    Ok(artifact)
}

/// The pure part of [`clean`]: stringify nested columns, sort ascending on
/// the parsed instant of `sort_by` with nulls last, render `sort_by`
/// canonically (unparsable values become null), and drop exact duplicate
/// rows keeping the first.
///
/// Sorting happens before rendering, so rows that render to the same date or
/// minute still come out in time order.
pub fn clean_frame(
    mut df: DataFrame,
    sort_by: &str,
    format: CanonicalFormat,
) -> PolarsResult<DataFrame> {
    stringify_nested(&mut df)?;
    let instants: Vec<Option<i64>> = parse_column(&df, sort_by)?
        .into_iter()
        .map(|v| v.map(|dt| dt.and_utc().timestamp_micros()))
        .collect();
    df.with_column(Column::new(SORT_KEY.into(), instants))?;
    format_date(&mut df, sort_by, format)?;

    df.lazy()
        .sort(
            [SORT_KEY],
            SortMultipleOptions::default()
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .collect()?
        .drop(SORT_KEY)?
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()
}

/// Replace list-typed columns with their text rendering so they persist as CSV.
fn stringify_nested(df: &mut DataFrame) -> PolarsResult<()> {
    let nested: Vec<PlSmallStr> = df
        .get_columns()
        .iter()
        .filter(|c| matches!(c.dtype(), DataType::List(_)))
        .map(|c| c.name().clone())
        .collect();

    for name in nested {
        let text: Vec<Option<String>> = df
            .column(&name)?
            .as_materialized_series()
            .iter()
            .map(|v| match v {
                AnyValue::Null => None,
                other => Some(other.to_string()),
            })
            .collect();
        df.with_column(Column::new(name, text))?;
    }
    Ok(())
}
