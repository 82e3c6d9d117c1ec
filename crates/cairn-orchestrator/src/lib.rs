//! Cairn Orchestrator
//!
//! Ties the pipeline, config files, store, and artifacts together into a
//! project on disk:
//!
//! ```text
//! <root>/
//!   .cairn/pipeline.json    frozen pipeline shape
//!   .cairn/store.db         run and artifact records
//!   .cairn/artifacts/       one directory per artifact instance
//!   .cairn/working/         per-step scratch space
//!   <run_key>.toml          run config
//!   <run_key>/<variable>/   exported final outputs
//! ```

mod error;
mod layout;
mod orchestrator;
mod validate;

pub use error::{OrchestratorError, ShapeError};
pub use layout::{ProjectLayout, STATE_DIR};
pub use orchestrator::{ArtifactStatus, EngageReport, Orchestrator, Prepared};
pub use validate::{check_run_key, render, template, validate};
