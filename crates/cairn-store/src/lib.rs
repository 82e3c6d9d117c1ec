//! Cairn Store
//!
//! This crate provides the persistent fingerprint store for cairn. It keeps
//! one row per run configuration and tracks which artifact instances each
//! run references, so that equivalent upstream configurations share work.
//!
//! The [`Store`] trait defines operations for:
//! - Creating runs, collapsing identical parameter vectors onto one row
//! - Declaring a run's artifacts, reusing instances whose producer and
//!   ancestors were configured identically
//! - Reading a run's parameters, details, and artifact locations back
//! - Removing runs and collecting artifacts nothing references anymore

mod schema;
mod sqlite;

pub use schema::{Column, ColumnSource, RunSchema};
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use cairn_pipeline::{ParamMap, RunValues};

/// Surrogate key of a run row.
pub type RunId = i64;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested run, node, or artifact does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The run key is already taken by a different parameter vector.
  #[error("run key '{0}' already exists with different parameters")]
  RunKeyCollision(String),

  /// A run's values lack a column the schema requires.
  #[error("no value for column '{0}'")]
  MissingValue(String),

  /// A value's type does not match its column.
  #[error("column '{column}' expects {expected}, got {found}")]
  InvalidValue {
    column: String,
    expected: String,
    found: String,
  },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// An I/O error occurred while allocating artifact directories.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Result of [`Store::create_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRun {
  pub run_id: RunId,
  /// Run key of the pre-existing row when this exact parameter vector had
  /// already been stored. `None` when a new row was inserted.
  pub existing_run_key: Option<String>,
}

/// How an artifact came to be associated with a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
  /// A fresh instance and directory were allocated.
  Created,
  /// An instance produced under another run was linked.
  Reused,
  /// The run already referenced an instance.
  Existing,
}

/// One artifact association made by [`Store::declare_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredArtifact {
  pub variable: String,
  pub path: PathBuf,
  pub declaration: Declaration,
}

/// A persisted artifact instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
  pub id: i64,
  /// Output variable the instance belongs to.
  pub name: String,
  /// Node that produces it.
  pub producer: String,
  pub path: PathBuf,
  pub final_output: bool,
}

/// Storage trait for runs and artifact instances.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert a run, or find the row already holding this parameter vector.
  ///
  /// Fails with [`Error::RunKeyCollision`] when the run key is taken by a
  /// different vector.
  async fn create_run(&self, values: &RunValues) -> Result<CreatedRun, Error>;

  /// Associate the run with an instance of every output variable.
  async fn declare_artifacts(
    &self,
    values: &RunValues,
    run_id: RunId,
  ) -> Result<Vec<DeclaredArtifact>, Error>;

  /// Parameters of one node for a run.
  async fn parameters_for(&self, run_id: RunId, node: &str) -> Result<ParamMap, Error>;

  /// Run details for a run, including `run_key`.
  async fn details_for(&self, run_id: RunId) -> Result<ParamMap, Error>;

  async fn resolve_run_key(&self, run_key: &str) -> Result<RunId, Error>;

  /// Output variable → artifact directory for every artifact of a run.
  async fn artifact_paths(&self, run_id: RunId) -> Result<BTreeMap<String, PathBuf>, Error>;

  /// Full records of every artifact a run references.
  async fn artifacts_for(&self, run_id: RunId) -> Result<Vec<ArtifactRecord>, Error>;

  /// Delete a run and every artifact no run references afterwards.
  ///
  /// Returns the directories of the deleted artifacts; removing them from
  /// disk is the caller's job.
  async fn remove_run(&self, run_id: RunId) -> Result<Vec<PathBuf>, Error>;

  /// All runs as (id, run key), oldest first.
  async fn list_runs(&self) -> Result<Vec<(RunId, String)>, Error>;
}
