//! Cairn Pipeline
//!
//! This crate provides the declarative pipeline graph for cairn. A pipeline
//! is an ordered set of [`Node`]s wired together by named bindings: each
//! node produces artifacts into output variables, and other nodes consume
//! those variables as inputs.
//!
//! Key properties of a built [`PipelineSpec`]:
//! - Every consumed variable has exactly one producer
//! - All declarations of a variable agree on its artifact kind
//! - The graph is acyclic, so [`PipelineSpec::iterate`] visits every node
//!   strictly after all of its producers
//! - It is immutable and is injected into the orchestrator by value

mod error;
mod graph;
mod node;
mod param;
mod pipeline;
mod step;

pub use cairn_artifact::{Artifact, ArtifactKind};
pub use error::{GraphError, ParseError};
pub use node::{InputDecl, Node, NodeBuilder, OutputDecl, ParamDecl};
pub use param::{ParamMap, ParamType, ParamValue, RunValues};
pub use pipeline::{NodeShape, OutputRef, PipelineBuilder, PipelineShape, PipelineSpec};
pub use step::{Step, StepContext};

/// Section name reserved for run details in config files and the store.
pub const DETAILS_SECTION: &str = "details";

/// Detail key reserved for the run's caller-chosen label.
pub const RUN_KEY: &str = "run_key";

/// Whether `name` can be used for a node, parameter, or binding.
///
/// Names end up in store column names and config section headers, so they
/// are restricted to ASCII identifiers.
pub(crate) fn is_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
