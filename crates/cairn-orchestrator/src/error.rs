//! Orchestrator error types.

use std::path::PathBuf;

/// A config document whose sections or keys don't match the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
  #[error("missing section [{0}]")]
  MissingSection(String),

  #[error("unexpected section [{0}]")]
  UnexpectedSection(String),

  #[error("section [{0}] appears more than once")]
  DuplicateSection(String),

  #[error("parameter {key} appears more than once in section [{section}]")]
  DuplicateParameter { section: String, key: String },

  #[error("missing parameter {key} in section [{section}]")]
  MissingParameter { section: String, key: String },

  #[error("unexpected parameter {key} in section [{section}]")]
  UnexpectedParameter { section: String, key: String },

  #[error("run_key is '{found}' but the config belongs to '{expected}'")]
  RunKeyMismatch { expected: String, found: String },
}

/// Errors that can occur while preparing or engaging runs.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  /// The config's sections or keys are wrong.
  #[error("invalid config: {0}")]
  ConfigShape(#[from] ShapeError),

  /// A config value failed its declared type's parser.
  #[error("[{section}] {field} = '{value}' is not a valid {expected}: {reason}")]
  FieldType {
    section: String,
    field: String,
    expected: String,
    value: String,
    reason: String,
  },

  /// A run key that can't name a config file or export directory.
  #[error("invalid run key '{0}'")]
  InvalidRunKey(String),

  /// A step returned an error.
  #[error("node '{node}' failed: {source:#}")]
  NodeExecution {
    node: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("project already initialized at {0}")]
  AlreadyInitialized(PathBuf),

  #[error("no project found at {0}")]
  NotInitialized(PathBuf),

  /// The pipeline differs from the one the project was initialized with.
  #[error("pipeline does not match the snapshot in {0}")]
  PipelineChanged(PathBuf),

  #[error("config already exists at {0}")]
  ConfigExists(PathBuf),

  #[error(transparent)]
  Store(#[from] cairn_store::Error),

  #[error(transparent)]
  Artifact(#[from] cairn_artifact::Error),

  #[error(transparent)]
  Config(#[from] cairn_config::ConfigError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid pipeline snapshot: {0}")]
  Json(#[from] serde_json::Error),
}

impl OrchestratorError {
  /// The run key maps to a different parameter vector already.
  pub fn is_run_key_collision(&self) -> bool {
    matches!(self, Self::Store(cairn_store::Error::RunKeyCollision(_)))
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::Store(cairn_store::Error::NotFound(_)))
  }
}
