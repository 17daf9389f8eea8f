//! Tempest Core — artifacts, date normalization, and the ETL stages.
//!
//! This crate holds every unit of work the pipeline schedules:
//! - Artifact store: collision-free path allocation and tabular I/O
//! - Date normalizer: heterogeneous timestamp parsing, canonical rendering, hour flooring
//! - Extractors: fetch raw API bodies and stage them verbatim
//! - Cleaners, enrichers, merger: dataframe transforms between staged artifacts
//! - Loader: schema inference and (re)creation of the target table
//!
//! Ordering and dependency gating live in `tempest-runner`.

pub mod artifact;
pub mod dates;
pub mod error;
pub mod extract;
pub mod load;
pub mod transform;

pub use artifact::{Artifact, ArtifactError, ArtifactStore, Format, Stage};
pub use error::{ErrorKind, TaskError};
