//! Enricher: rewrite the time column into a join-ready hour bucket.

use super::{require_column, Dataset, TransformError};
use crate::artifact::{read_table, Artifact, ArtifactStore, Stage};
use crate::dates::{floor_date_to_hour, format_date, CanonicalFormat};
use polars::prelude::*;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichSpec {
    pub dataset: Dataset,
    pub output_name: String,
    /// Time column, rewritten in place.
    pub column: String,
    /// Weather only: floor to the hour after canonical formatting. Stock is always floored.
    pub to_hour: bool,
}

impl EnrichSpec {
    pub fn stock(output_name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            dataset: Dataset::Stock,
            output_name: output_name.into(),
            column: column.into(),
            to_hour: true,
        }
    }

    pub fn weather(output_name: impl Into<String>, column: impl Into<String>, to_hour: bool) -> Self {
        Self {
            dataset: Dataset::Weather,
            output_name: output_name.into(),
            column: column.into(),
            to_hour,
        }
    }
}

/// Enrich the artifact at `input` and stage it under `processed/enriched/<dataset>`.
pub fn enrich(
    store: &ArtifactStore,
    input: &Path,
    spec: &EnrichSpec,
) -> Result<Artifact, TransformError> {
    let mut df = read_table(input)?;
    require_column(&df, &spec.column, input)?;

    enrich_frame(&mut df, spec).map_err(TransformError::frame(input))?;
    let artifact = store.stage_table(
        Stage::Processed,
        Some(&format!("enriched/{}", spec.dataset)),
        &spec.output_name,
        &mut df,
    )?;

    info!(
        input = %input.display(),
        output = %artifact.path.display(),
        column = %spec.column,
        rows = df.height(),
        "enriched {}",
        spec.dataset
    );
    Ok(artifact)
}

/// Rewrite `spec.column` in place. Row count and order are unchanged.
pub fn enrich_frame(df: &mut DataFrame, spec: &EnrichSpec) -> PolarsResult<()> {
    match spec.dataset {
        Dataset::Stock => floor_date_to_hour(df, &spec.column, None),
        Dataset::Weather => {
            format_date(df, &spec.column, CanonicalFormat::Second)?;
            if spec.to_hour {
                floor_date_to_hour(df, &spec.column, None)?;
            }
            Ok(())
        }
    }
}
