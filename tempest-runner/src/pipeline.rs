//! The weather/stock ETL graph.
//!
//! ```text
//! clear_data_folders
//!   -> extract.{current_weather, historical_weather, stock}
//!   -> clean.{current_weather, hourly_historical_weather, daily_historical_weather,
//!             hourly_stock, daily_stock}
//!   -> enrich.{hourly_historical_weather, hourly_stock}
//!   -> merge.hourly_stock_and_weather   (enriched hourly weather + stock)
//!      merge.daily_stock_and_weather    (cleaned daily weather + stock)
//!   -> load.{current_weather, hourly_stock_and_weather, daily_stock_and_weather}
//! ```
//!
//! Weather is always the left side of a merge, so merged rows keep the
//! weather time column and drop the stock one.

use crate::config::{ConfigError, PipelineConfig};
use crate::dag::{Dag, DagBuilder, DagError, TaskGroup, TaskNode, TaskOutputs};
use crate::executor::{execute, RunReport};
use std::sync::Arc;
use tempest_core::extract::{Extractor, FetchError, Fetcher, Granularity, HttpFetcher};
use tempest_core::load::{self, Connector};
use tempest_core::transform::{self, CleanSpec, EnrichSpec, MergeSpec};
use tempest_core::{Artifact, ArtifactStore, TaskError};
use thiserror::Error;
use tracing::info;

pub const CLEAR_TASK: &str = "clear_data_folders";

/// Output names shared by every task of a group.
pub const CLEANED: &str = "cleaned";
pub const ENRICHED: &str = "enriched";
pub const MERGED: &str = "merged";
pub const AUDIT: &str = "audit";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Http(#[from] FetchError),
}

/// Collaborators shared by every task of a run.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: ArtifactStore,
    pub fetcher: Arc<dyn Fetcher>,
    pub connector: Arc<dyn Connector>,
}

impl PipelineContext {
    /// Production collaborators: reqwest for HTTP, the configured SQLite URL for loads.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            store: config.store(),
            fetcher: Arc::new(HttpFetcher::new(config.http_timeout())?),
            connector: Arc::new(config.database.clone()),
        })
    }
}

/// Build the extractor for `name`, requiring the endpoints the graph consumes.
pub fn extractor(
    config: &PipelineConfig,
    name: &str,
    endpoints: &[Granularity],
) -> Result<Extractor, ConfigError> {
    let source = config.source_with(name, endpoints)?;
    Ok(Extractor::from_config(name, source)?)
}

/// Assemble the full graph. Configuration problems surface here, before any task runs.
pub fn build_pipeline(config: &PipelineConfig, ctx: &PipelineContext) -> Result<Dag, PipelineError> {
    let extract = TaskGroup::new("extract");
    let clean = TaskGroup::new("clean");
    let enrich = TaskGroup::new("enrich");
    let merge = TaskGroup::new("merge");
    let load = TaskGroup::new("load");

    let current = extractor(config, "current_weather", &[Granularity::Current])?;
    let historical = extractor(
        config,
        "historical_weather",
        &[Granularity::Hourly, Granularity::Daily],
    )?;
    let stock = extractor(config, "stock", &[Granularity::Hourly, Granularity::Daily])?;

    let mut b = DagBuilder::new();
    b.add(clear_node(ctx))
        .add(extract_node(&extract.id("current_weather"), current, ctx))
        .add(extract_node(&extract.id("historical_weather"), historical, ctx))
        .add(extract_node(&extract.id("stock"), stock, ctx));

    b.add(clean_node(
        &clean.id("current_weather"),
        (&extract.id("current_weather"), Granularity::Current),
        CleanSpec::weather("cleaned_current_weather", "local_time", false),
        ctx,
    ))
    .add(clean_node(
        &clean.id("hourly_historical_weather"),
        (&extract.id("historical_weather"), Granularity::Hourly),
        CleanSpec::weather("cleaned_hourly_historical", "time", false),
        ctx,
    ))
    .add(clean_node(
        &clean.id("daily_historical_weather"),
        (&extract.id("historical_weather"), Granularity::Daily),
        CleanSpec::weather("cleaned_daily_historical", "date", true),
        ctx,
    ))
    .add(clean_node(
        &clean.id("hourly_stock"),
        (&extract.id("stock"), Granularity::Hourly),
        CleanSpec::stock("cleaned_hourly_stock_data", "timestamp", true),
        ctx,
    ))
    .add(clean_node(
        &clean.id("daily_stock"),
        (&extract.id("stock"), Granularity::Daily),
        CleanSpec::stock("cleaned_daily_stock_data", "timestamp", false),
        ctx,
    ));

    b.add(enrich_node(
        &enrich.id("hourly_historical_weather"),
        &clean.id("hourly_historical_weather"),
        EnrichSpec::weather("enriched_hourly_historical", "time", true),
        ctx,
    ))
    .add(enrich_node(
        &enrich.id("hourly_stock"),
        &clean.id("hourly_stock"),
        EnrichSpec::stock("enriched_hourly_stock_data", "timestamp"),
        ctx,
    ));

    b.add(merge_node(
        &merge.id("hourly_stock_and_weather"),
        (&enrich.id("hourly_historical_weather"), ENRICHED),
        (&enrich.id("hourly_stock"), ENRICHED),
        MergeSpec::inner("merged_hourly_data", "time", "timestamp"),
        ctx,
    ))
    .add(merge_node(
        &merge.id("daily_stock_and_weather"),
        (&clean.id("daily_historical_weather"), CLEANED),
        (&clean.id("daily_stock"), CLEANED),
        MergeSpec::inner("merged_daily_data", "date", "timestamp"),
        ctx,
    ));

    b.add(load_node(
        &load.id("current_weather"),
        (&clean.id("current_weather"), CLEANED),
        "current_weather",
        ctx,
    ))
    .add(load_node(
        &load.id("hourly_stock_and_weather"),
        (&merge.id("hourly_stock_and_weather"), MERGED),
        "hourly_stock_and_weather",
        ctx,
    ))
    .add(load_node(
        &load.id("daily_stock_and_weather"),
        (&merge.id("daily_stock_and_weather"), MERGED),
        "daily_stock_and_weather",
        ctx,
    ));

    let dag = b.build()?;
    info!(tasks = dag.len(), "pipeline assembled");
    Ok(dag)
}

/// Build and execute the graph.
pub fn run_pipeline(config: &PipelineConfig, ctx: &PipelineContext) -> Result<RunReport, PipelineError> {
    let dag = build_pipeline(config, ctx)?;
    Ok(execute(&dag, &config.executor_options()))
}

fn single(name: &str, artifact: Artifact) -> TaskOutputs {
    TaskOutputs::from([(name.to_string(), artifact)])
}

fn clear_node(ctx: &PipelineContext) -> TaskNode {
    let store = ctx.store.clone();
    TaskNode::new(CLEAR_TASK, move |_| {
        store.clear().map_err(|source| TaskError::Artifact {
            stage: CLEAR_TASK.to_string(),
            source,
        })?;
        Ok(TaskOutputs::new())
    })
}

fn extract_node(id: &str, extractor: Extractor, ctx: &PipelineContext) -> TaskNode {
    let outputs = extractor.outputs();
    let store = ctx.store.clone();
    let fetcher = Arc::clone(&ctx.fetcher);
    let node = TaskNode::new(id, move |_| {
        extractor
            .run(fetcher.as_ref(), &store)
            .map_err(|source| TaskError::Extraction {
                source_name: extractor.name().to_string(),
                source,
            })
    })
    .after(CLEAR_TASK);
    outputs.into_iter().fold(node, TaskNode::output)
}

fn clean_node(
    id: &str,
    (upstream, granularity): (&str, Granularity),
    spec: CleanSpec,
    ctx: &PipelineContext,
) -> TaskNode {
    let store = ctx.store.clone();
    let stage = id.to_string();
    TaskNode::new(id, move |inputs| {
        let artifact = transform::clean(&store, inputs.path("raw")?, &spec).map_err(|source| {
            TaskError::Transform {
                stage: stage.clone(),
                source,
            }
        })?;
        Ok(single(CLEANED, artifact))
    })
    .input("raw", upstream, granularity.as_str())
    .output(CLEANED)
}

fn enrich_node(id: &str, upstream: &str, spec: EnrichSpec, ctx: &PipelineContext) -> TaskNode {
    let store = ctx.store.clone();
    let stage = id.to_string();
    TaskNode::new(id, move |inputs| {
        let artifact = transform::enrich(&store, inputs.path("cleaned")?, &spec).map_err(|source| {
            TaskError::Transform {
                stage: stage.clone(),
                source,
            }
        })?;
        Ok(single(ENRICHED, artifact))
    })
    .input("cleaned", upstream, CLEANED)
    .output(ENRICHED)
}

fn merge_node(
    id: &str,
    (left_task, left_output): (&str, &str),
    (right_task, right_output): (&str, &str),
    spec: MergeSpec,
    ctx: &PipelineContext,
) -> TaskNode {
    let store = ctx.store.clone();
    let stage = id.to_string();
    TaskNode::new(id, move |inputs| {
        let artifact = transform::merge(&store, inputs.path("left")?, inputs.path("right")?, &spec)
            .map_err(|source| TaskError::Transform {
                stage: stage.clone(),
                source,
            })?;
        Ok(single(MERGED, artifact))
    })
    .input("left", left_task, left_output)
    .input("right", right_task, right_output)
    .output(MERGED)
}

fn load_node(
    id: &str,
    (upstream, output): (&str, &str),
    table: &str,
    ctx: &PipelineContext,
) -> TaskNode {
    let store = ctx.store.clone();
    let connector = Arc::clone(&ctx.connector);
    let table = table.to_string();
    TaskNode::new(id, move |inputs| {
        let summary = load::load(&store, inputs.path("input")?, &table, connector.as_ref())
            .map_err(|source| TaskError::Load {
                table: table.clone(),
                source,
            })?;
        Ok(single(AUDIT, summary.audit))
    })
    .input("input", upstream, output)
    .output(AUDIT)
}
