//! Tempest Runner — task graph orchestration for the weather/stock pipeline.
//!
//! This crate builds on `tempest-core` to provide:
//! - Task nodes with named outputs and parameter bindings, validated into an acyclic graph
//! - Dependency-gated execution on rayon with skip propagation and a run report
//! - The concrete extract → clean → enrich → merge → load graph
//! - TOML pipeline configuration with environment overrides

pub mod config;
pub mod dag;
pub mod executor;
pub mod pipeline;

pub use config::{ConfigError, PipelineConfig};
pub use dag::{Dag, DagBuilder, DagError, TaskGroup, TaskInputs, TaskNode, TaskOutputs};
pub use executor::{execute, ExecutorOptions, RunReport, TaskReport, TaskStatus};
pub use pipeline::{build_pipeline, run_pipeline, PipelineContext, PipelineError};
