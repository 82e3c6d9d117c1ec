//! Run lifecycle.
//!
//! The [`Orchestrator`] owns a project directory, the pipeline it was
//! initialized with, and the store. It turns config files into runs
//! (`prepare`), executes them with memoization (`engage`), and cleans them up
//! (`remove`).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_artifact::{Artifact, copy_dir_contents};
use cairn_config::{ConfigError, RunConfig};
use cairn_pipeline::{Node, PipelineSpec, RunValues, StepContext};
use cairn_store::{ArtifactRecord, RunId, SqliteStore, Store};
use tempfile::TempDir;
use tracing::{error, info, instrument, warn};

use crate::error::{OrchestratorError, ShapeError};
use crate::layout::ProjectLayout;
use crate::validate::{check_run_key, render, template, validate};

/// Outcome of [`Orchestrator::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
  pub run_id: RunId,
  /// Run key of an earlier run with exactly the same configuration. When
  /// set, nothing new will be produced; use that run instead.
  pub existing_run_key: Option<String>,
}

/// Outcome of [`Orchestrator::engage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngageReport {
  /// Nodes whose step was invoked, in execution order.
  pub executed: Vec<String>,
  /// Nodes skipped because all of their outputs were already complete.
  pub skipped: Vec<String>,
  /// Export directories written for final outputs.
  pub exported: Vec<PathBuf>,
}

/// Completion state of one artifact of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStatus {
  pub variable: String,
  pub producer: String,
  pub path: PathBuf,
  pub complete: bool,
  pub final_output: bool,
}

/// Prepares, engages, and removes runs of one pipeline in one project.
pub struct Orchestrator {
  layout: ProjectLayout,
  spec: Arc<PipelineSpec>,
  store: SqliteStore,
}

impl Orchestrator {
  /// Create a new project at `root` for `spec`.
  #[instrument(name = "orchestrator_init", skip_all, fields(root = %root.as_ref().display()))]
  pub async fn init(root: impl AsRef<Path>, spec: PipelineSpec) -> Result<Self, OrchestratorError> {
    let layout = ProjectLayout::new(root.as_ref());
    let state_dir = layout.state_dir();
    if tokio::fs::try_exists(&state_dir).await? {
      return Err(OrchestratorError::AlreadyInitialized(state_dir));
    }

    tokio::fs::create_dir_all(layout.artifacts_dir()).await?;
    tokio::fs::create_dir_all(layout.working_dir()).await?;
    let snapshot = serde_json::to_string_pretty(&spec.shape())?;
    tokio::fs::write(layout.pipeline_snapshot(), snapshot).await?;

    let spec = Arc::new(spec);
    let store = SqliteStore::open(&layout.store_db(), layout.artifacts_dir(), spec.clone()).await?;

    info!(
      root = %layout.root().display(),
      nodes = spec.nodes().len(),
      "project_initialized"
    );
    Ok(Self {
      layout,
      spec,
      store,
    })
  }

  /// Open an existing project. The pipeline must have the same shape as the
  /// one the project was initialized with.
  #[instrument(name = "orchestrator_open", skip_all, fields(root = %root.as_ref().display()))]
  pub async fn open(root: impl AsRef<Path>, spec: PipelineSpec) -> Result<Self, OrchestratorError> {
    let layout = ProjectLayout::new(root.as_ref());
    let state_dir = layout.state_dir();
    if !tokio::fs::try_exists(&state_dir).await? {
      return Err(OrchestratorError::NotInitialized(layout.root().to_path_buf()));
    }

    // Compared as JSON values so floats that JSON can't carry compare alike.
    let snapshot_path = layout.pipeline_snapshot();
    let frozen: serde_json::Value =
      serde_json::from_str(&tokio::fs::read_to_string(&snapshot_path).await?)?;
    if frozen != serde_json::to_value(spec.shape())? {
      return Err(OrchestratorError::PipelineChanged(snapshot_path));
    }

    tokio::fs::create_dir_all(layout.working_dir()).await?;
    let spec = Arc::new(spec);
    let store = SqliteStore::open(&layout.store_db(), layout.artifacts_dir(), spec.clone()).await?;

    Ok(Self {
      layout,
      spec,
      store,
    })
  }

  pub fn layout(&self) -> &ProjectLayout {
    &self.layout
  }

  pub fn spec(&self) -> &PipelineSpec {
    &self.spec
  }

  pub fn store(&self) -> &SqliteStore {
    &self.store
  }

  /// Write `<run_key>.toml` with every declared default pre-filled.
  pub async fn write_config(&self, run_key: &str) -> Result<PathBuf, OrchestratorError> {
    check_run_key(run_key)?;
    let path = self.layout.config_path(run_key);
    if tokio::fs::try_exists(&path).await? {
      return Err(OrchestratorError::ConfigExists(path));
    }

    let text = template(&self.spec, run_key).to_toml_string();
    tokio::fs::write(&path, text).await?;
    info!(run_key = %run_key, path = %path.display(), "config_written");
    Ok(path)
  }

  /// Parse and validate a config file. Its `run_key` must match the file
  /// name.
  pub async fn read_config(&self, path: &Path) -> Result<RunValues, OrchestratorError> {
    let text = tokio::fs::read_to_string(path).await?;
    let config = RunConfig::parse(&text).map_err(|e| match e {
      ConfigError::DuplicateSection(section) => {
        OrchestratorError::from(ShapeError::DuplicateSection(section))
      }
      ConfigError::DuplicateKey { section, key } => {
        OrchestratorError::from(ShapeError::DuplicateParameter { section, key })
      }
      other => OrchestratorError::from(other),
    })?;
    let run_key = path.file_stem().and_then(|s| s.to_str());
    validate(&self.spec, &config, run_key)
  }

  /// Render typed values as config text.
  pub fn render_config(&self, values: &RunValues) -> String {
    render(&self.spec, values).to_toml_string()
  }

  /// Validate `<run_key>.toml`, record the run, and allocate or share its
  /// artifacts.
  ///
  /// The run row is committed before its artifacts are declared. If declaring
  /// fails, preparing the same key again finishes the job and reports the
  /// run's own key as `existing_run_key`.
  #[instrument(name = "orchestrator_prepare", skip_all, fields(run_key = %run_key))]
  pub async fn prepare(&self, run_key: &str) -> Result<Prepared, OrchestratorError> {
    check_run_key(run_key)?;
    let values = self.read_config(&self.layout.config_path(run_key)).await?;

    let created = self.store.create_run(&values).await?;
    self
      .store
      .declare_artifacts(&values, created.run_id)
      .await?;

    info!(
      run_key = %run_key,
      run_id = created.run_id,
      existing_run_key = created.existing_run_key.as_deref().unwrap_or(""),
      "run_prepared"
    );
    Ok(Prepared {
      run_id: created.run_id,
      existing_run_key: created.existing_run_key,
    })
  }

  /// Execute every node of a prepared run whose outputs aren't complete yet,
  /// then export the run's final outputs.
  ///
  /// A failing step aborts the walk. Outputs completed before the failure
  /// stay complete, so engaging again resumes where this call stopped.
  #[instrument(name = "orchestrator_engage", skip_all, fields(run_key = %run_key))]
  pub async fn engage(&self, run_key: &str) -> Result<EngageReport, OrchestratorError> {
    let run_id = self.store.resolve_run_key(run_key).await?;
    let records: HashMap<String, ArtifactRecord> = self
      .store
      .artifacts_for(run_id)
      .await?
      .into_iter()
      .map(|r| (r.name.clone(), r))
      .collect();
    let details = self.store.details_for(run_id).await?;

    info!(run_key = %run_key, run_id, "run_started");

    let mut report = EngageReport::default();
    for node in self.spec.iterate() {
      let mut outputs = Vec::new();
      for output in node.outputs() {
        let record = record_of(&records, &output.variable)?;
        outputs.push(Artifact::new(&record.path, output.kind.clone()));
      }

      if all_complete(&outputs).await? {
        info!(run_id, node = %node.name(), "node_skipped");
        report.skipped.push(node.name().to_string());
        continue;
      }

      let mut inputs = BTreeMap::new();
      for (variable, formal) in node.bindings() {
        let record = record_of(&records, variable)?;
        let kind = node
          .input(formal)
          .map(|i| i.kind.clone())
          .ok_or_else(|| cairn_store::Error::NotFound(format!("input '{}'", formal)))?;
        inputs.insert(formal.clone(), Artifact::new(&record.path, kind));
      }
      let parameters = self.store.parameters_for(run_id, node.name()).await?;

      let scratch = tempfile::Builder::new()
        .prefix(&format!("{}_", node.name()))
        .tempdir_in(self.layout.working_dir())?;
      let ctx = StepContext {
        working_dir: scratch.path().to_path_buf(),
        outputs: outputs.clone(),
        details: details.clone(),
        inputs,
        parameters,
      };
      invoke(run_id, node, ctx, scratch).await?;

      for output in &outputs {
        output.complete().await?;
      }
      info!(run_id, node = %node.name(), "node_completed");
      report.executed.push(node.name().to_string());
    }

    report.exported = self.export(run_key, &records).await?;
    info!(
      run_id,
      executed = report.executed.len(),
      skipped = report.skipped.len(),
      "run_completed"
    );
    Ok(report)
  }

  /// Copy every complete final output into `<root>/<run_key>/<variable>/`,
  /// replacing earlier exports.
  async fn export(
    &self,
    run_key: &str,
    records: &HashMap<String, ArtifactRecord>,
  ) -> Result<Vec<PathBuf>, OrchestratorError> {
    let mut exported = Vec::new();
    for output in self.spec.outputs() {
      let Some(record) = records.get(output.variable) else {
        continue;
      };
      if !record.final_output {
        continue;
      }
      let artifact = Artifact::new(&record.path, output.kind.clone());
      if !artifact.is_complete().await? {
        continue;
      }

      let dest = self.layout.export_dir(run_key).join(output.variable);
      if tokio::fs::try_exists(&dest).await? {
        tokio::fs::remove_dir_all(&dest).await?;
      }
      copy_dir_contents(artifact.data_dir(), &dest).await?;

      info!(
        run_key = %run_key,
        variable = output.variable,
        dest = %dest.display(),
        "artifact_exported"
      );
      exported.push(dest);
    }
    Ok(exported)
  }

  /// Per-artifact completion state of a run.
  pub async fn status(&self, run_key: &str) -> Result<Vec<ArtifactStatus>, OrchestratorError> {
    let run_id = self.store.resolve_run_key(run_key).await?;
    let mut statuses = Vec::new();
    for record in self.store.artifacts_for(run_id).await? {
      let Some(output) = self.spec.output(&record.name) else {
        continue;
      };
      let artifact = Artifact::new(&record.path, output.kind.clone());
      statuses.push(ArtifactStatus {
        complete: artifact.is_complete().await?,
        variable: record.name,
        producer: record.producer,
        path: record.path,
        final_output: record.final_output,
      });
    }
    Ok(statuses)
  }

  /// Run keys of every prepared run, oldest first.
  pub async fn runs(&self) -> Result<Vec<String>, OrchestratorError> {
    let runs = self.store.list_runs().await?;
    Ok(runs.into_iter().map(|(_, run_key)| run_key).collect())
  }

  /// Forget a run. Artifact directories no other run references are
  /// deleted, as is the run's export directory. The config file is kept.
  #[instrument(name = "orchestrator_remove", skip_all, fields(run_key = %run_key))]
  pub async fn remove(&self, run_key: &str) -> Result<(), OrchestratorError> {
    let run_id = self.store.resolve_run_key(run_key).await?;
    let orphaned = self.store.remove_run(run_id).await?;

    for path in &orphaned {
      if tokio::fs::try_exists(path).await? {
        tokio::fs::remove_dir_all(path).await?;
      }
    }
    let export_dir = self.layout.export_dir(run_key);
    if tokio::fs::try_exists(&export_dir).await? {
      tokio::fs::remove_dir_all(&export_dir).await?;
    }

    info!(
      run_key = %run_key,
      run_id,
      artifacts_deleted = orphaned.len(),
      "run_removed"
    );
    Ok(())
  }
}

fn record_of<'a>(
  records: &'a HashMap<String, ArtifactRecord>,
  variable: &str,
) -> Result<&'a ArtifactRecord, OrchestratorError> {
  records
    .get(variable)
    .ok_or_else(|| cairn_store::Error::NotFound(format!("artifact '{}'", variable)).into())
}

/// Run one step. Its scratch directory is discarded afterwards, whatever the
/// outcome.
async fn invoke(
  run_id: RunId,
  node: &Node,
  ctx: StepContext,
  scratch: TempDir,
) -> Result<(), OrchestratorError> {
  info!(
    run_id,
    node = %node.name(),
    working_dir = %scratch.path().display(),
    "node_started"
  );
  let result = node.step().run(ctx).await;

  if let Err(e) = scratch.close() {
    warn!(node = %node.name(), error = %e, "scratch_cleanup_failed");
  }

  result.map_err(|source| {
    error!(run_id, node = %node.name(), error = %source, "node_failed");
    OrchestratorError::NodeExecution {
      node: node.name().to_string(),
      source,
    }
  })
}

async fn all_complete(artifacts: &[Artifact]) -> Result<bool, OrchestratorError> {
  for artifact in artifacts {
    if !artifact.is_complete().await? {
      return Ok(false);
    }
  }
  Ok(true)
}
