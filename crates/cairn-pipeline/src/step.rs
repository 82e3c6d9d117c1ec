//! The unit-of-work seam.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use cairn_artifact::Artifact;

use crate::param::ParamMap;

/// Everything a step receives for one invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
  /// Scratch directory owned exclusively by this call. It is deleted once
  /// the call returns, whatever the outcome.
  pub working_dir: PathBuf,
  /// Output artifacts, in the node's declared output order.
  pub outputs: Vec<Artifact>,
  /// Run details, including `run_key`.
  pub details: ParamMap,
  /// Input artifacts keyed by the node's formal input names.
  pub inputs: BTreeMap<String, Artifact>,
  /// The node's own parameters.
  pub parameters: ParamMap,
}

/// A pipeline step.
///
/// Implementations populate their output artifacts and may complete them;
/// the orchestrator completes every output after `run` returns `Ok` either
/// way. Returning an error aborts the engagement of the current run.
#[async_trait]
pub trait Step: Send + Sync {
  async fn run(&self, ctx: StepContext) -> anyhow::Result<()>;
}
