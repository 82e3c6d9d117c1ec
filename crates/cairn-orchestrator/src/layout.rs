use std::path::{Path, PathBuf};

/// Hidden directory holding everything cairn manages.
pub const STATE_DIR: &str = ".cairn";

/// Paths of a cairn project rooted at a user-visible directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
  root: PathBuf,
}

impl ProjectLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn state_dir(&self) -> PathBuf {
    self.root.join(STATE_DIR)
  }

  /// Frozen pipeline shape the store schema was generated from.
  pub fn pipeline_snapshot(&self) -> PathBuf {
    self.state_dir().join("pipeline.json")
  }

  pub fn store_db(&self) -> PathBuf {
    self.state_dir().join("store.db")
  }

  pub fn artifacts_dir(&self) -> PathBuf {
    self.state_dir().join("artifacts")
  }

  /// Parent of every per-node scratch directory.
  pub fn working_dir(&self) -> PathBuf {
    self.state_dir().join("working")
  }

  pub fn config_path(&self, run_key: &str) -> PathBuf {
    self.root.join(format!("{}.toml", run_key))
  }

  /// Where a run's final outputs are copied to.
  pub fn export_dir(&self, run_key: &str) -> PathBuf {
    self.root.join(run_key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_paths() {
    let layout = ProjectLayout::new("/data/project");

    assert_eq!(layout.store_db(), PathBuf::from("/data/project/.cairn/store.db"));
    assert_eq!(
      layout.artifacts_dir(),
      PathBuf::from("/data/project/.cairn/artifacts")
    );
    assert_eq!(
      layout.config_path("trial"),
      PathBuf::from("/data/project/trial.toml")
    );
    assert_eq!(layout.export_dir("trial"), PathBuf::from("/data/project/trial"));
  }
}
