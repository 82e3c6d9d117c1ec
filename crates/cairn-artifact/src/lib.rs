//! Cairn Artifact
//!
//! This crate provides the artifact handle used by cairn pipelines.
//! An artifact is a directory owned by exactly one producing node. Units of
//! work write whatever they like into it; the orchestrator only cares about
//! whether it is complete.
//!
//! Completion is recorded by a sentinel file (`.complete`) inside the
//! artifact directory. Once written, the artifact is treated as immutable and
//! may be shared by reference across any number of runs.

mod fs;

pub use fs::copy_dir_contents;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs as tfs;

/// Name of the completion marker written into every finished artifact.
pub const SENTINEL: &str = ".complete";

/// Error type for artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The sentinel exists but could not be decoded.
  #[error("corrupt completion marker at {path}: {source}")]
  Sentinel {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// The declared type of an artifact.
///
/// Every output slot of a node declares one kind. Whether completed
/// instances of the kind are exported to the user-visible run directory is
/// fixed per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKind {
  pub name: String,
  pub final_output: bool,
}

impl ArtifactKind {
  /// An intermediate artifact kind.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      final_output: false,
    }
  }

  /// An artifact kind whose completed instances are exported.
  pub fn final_output(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      final_output: true,
    }
  }
}

/// Contents of the completion marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentinel {
  pub kind: String,
  pub final_output: bool,
  pub completed_at: DateTime<Utc>,
}

/// A handle on one artifact instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  data_dir: PathBuf,
  kind: ArtifactKind,
}

impl Artifact {
  /// Create a handle for the artifact stored at `data_dir`.
  ///
  /// The directory itself is allocated by the store; this does not touch
  /// the filesystem.
  pub fn new(data_dir: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
    Self {
      data_dir: data_dir.into(),
      kind,
    }
  }

  /// Directory units of work read from and write into.
  pub fn data_dir(&self) -> &Path {
    &self.data_dir
  }

  pub fn kind(&self) -> &ArtifactKind {
    &self.kind
  }

  fn sentinel_path(&self) -> PathBuf {
    self.data_dir.join(SENTINEL)
  }

  /// Whether the completion marker exists.
  pub async fn is_complete(&self) -> Result<bool, Error> {
    Ok(tfs::try_exists(self.sentinel_path()).await?)
  }

  /// Mark the artifact complete.
  ///
  /// Always (re)writes the marker, so calling it again after a step already
  /// completed its own outputs is harmless.
  pub async fn complete(&self) -> Result<(), Error> {
    let sentinel = Sentinel {
      kind: self.kind.name.clone(),
      final_output: self.kind.final_output,
      completed_at: Utc::now(),
    };
    let path = self.sentinel_path();
    let body = serde_json::to_vec_pretty(&sentinel).map_err(|source| Error::Sentinel {
      path: path.clone(),
      source,
    })?;

    tfs::create_dir_all(&self.data_dir).await?;
    tfs::write(&path, body).await?;
    Ok(())
  }

  /// Read the completion marker, if there is one.
  pub async fn sentinel(&self) -> Result<Option<Sentinel>, Error> {
    let path = self.sentinel_path();
    let body = match tfs::read(&path).await {
      Ok(body) => body,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(Error::Io(e)),
    };
    serde_json::from_slice(&body)
      .map(Some)
      .map_err(|source| Error::Sentinel { path, source })
  }

  /// Whether this artifact is a completed final output.
  ///
  /// Incomplete artifacts are never final outputs.
  pub async fn is_final_output(&self) -> Result<bool, Error> {
    Ok(self.sentinel().await?.is_some_and(|s| s.final_output))
  }
}
