//! Merger: join two staged tables on a time key.

use super::{require_column, TransformError};
use crate::artifact::{read_table, Artifact, ArtifactStore, Stage};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const ROW_ORDER: &str = "__tempest_row";
/// The right-hand key is joined under this name so it cannot collide with a left column.
const RIGHT_KEY: &str = "__tempest_right_key";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    /// Keep only rows with a match on both sides.
    #[default]
    Inner,
    /// Keep every left row; unmatched right columns are null.
    Left,
}

impl JoinMode {
    fn join_type(self) -> JoinType {
        match self {
            JoinMode::Inner => JoinType::Inner,
            JoinMode::Left => JoinType::Left,
        }
    }
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinMode::Inner => "inner",
            JoinMode::Left => "left",
        })
    }
}

impl FromStr for JoinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinMode::Inner),
            "left" => Ok(JoinMode::Left),
            other => Err(format!("unknown join mode '{other}' (expected inner or left)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSpec {
    pub output_name: String,
    pub left_on: String,
    pub right_on: String,
    pub how: JoinMode,
}

impl MergeSpec {
    pub fn inner(
        output_name: impl Into<String>,
        left_on: impl Into<String>,
        right_on: impl Into<String>,
    ) -> Self {
        Self {
            output_name: output_name.into(),
            left_on: left_on.into(),
            right_on: right_on.into(),
            how: JoinMode::Inner,
        }
    }
}

/// Join `left` and `right` and stage the result under `processed/merged`.
pub fn merge(
    store: &ArtifactStore,
    left: &Path,
    right: &Path,
    spec: &MergeSpec,
) -> Result<Artifact, TransformError> {
    let left_df = read_table(left)?;
    let right_df = read_table(right)?;
    require_column(&left_df, &spec.left_on, left)?;
    require_column(&right_df, &spec.right_on, right)?;
    let (left_rows, right_rows) = (left_df.height(), right_df.height());

    let mut merged = merge_frames(left_df, right_df, spec).map_err(TransformError::frame(left))?;
    let artifact = store.stage_table(Stage::Processed, Some("merged"), &spec.output_name, &mut merged)?;

    info!(
        left = %left.display(),
        right = %right.display(),
        output = %artifact.path.display(),
        how = %spec.how,
        left_rows,
        right_rows,
        rows = merged.height(),
        "merged"
    );
    Ok(artifact)
}

/// Join on `left_on == right_on` compared as text, keeping left row order.
///
/// The right-hand key never survives into the result; the left-hand key does,
/// as does any left column that happens to share the right key's name.
pub fn merge_frames(
    mut left: DataFrame,
    mut right: DataFrame,
    spec: &MergeSpec,
) -> PolarsResult<DataFrame> {
    let left_key = left.column(&spec.left_on)?.cast(&DataType::String)?;
    left.with_column(left_key)?;
    let right_key = right.column(&spec.right_on)?.cast(&DataType::String)?;
    right.with_column(right_key)?;
    right.rename(&spec.right_on, RIGHT_KEY.into())?;

    let left = left.with_row_index(ROW_ORDER.into(), None)?;
    let joined = left
        .lazy()
        .join(
            right.lazy(),
            [col(spec.left_on.as_str())],
            [col(RIGHT_KEY)],
            JoinArgs::new(spec.how.join_type()),
        )
        .sort([ROW_ORDER], SortMultipleOptions::default().with_maintain_order(true))
        .collect()?
        .drop(ROW_ORDER)?;

    if joined.get_column_index(RIGHT_KEY).is_some() {
        debug!(column = %spec.right_on, "dropping right join key");
        return joined.drop(RIGHT_KEY);
    }
    Ok(joined)
}
