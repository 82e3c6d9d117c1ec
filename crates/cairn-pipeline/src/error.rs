use thiserror::Error;

/// Errors raised while declaring nodes or building a pipeline.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("variable '{variable}' declared as '{expected}' but node '{node}' uses it as '{found}'")]
  TypeMismatch {
    variable: String,
    node: String,
    expected: String,
    found: String,
  },

  #[error("pipeline contains a cycle through nodes: {}", nodes.join(", "))]
  Cycle { nodes: Vec<String> },

  #[error("duplicate node name: {0}")]
  DuplicateNode(String),

  #[error("variable '{variable}' is produced by both '{first}' and '{second}'")]
  DuplicateOutput {
    variable: String,
    first: String,
    second: String,
  },

  #[error("duplicate declaration of '{name}' on '{owner}'")]
  DuplicateName { owner: String, name: String },

  #[error("node '{node}' consumes '{variable}', which no node produces")]
  UnknownVariable { node: String, variable: String },

  #[error("input '{input}' of node '{node}' is not bound to any variable")]
  UnboundInput { node: String, input: String },

  #[error("node '{node}' declares no outputs")]
  NoOutputs { node: String },

  #[error("node '{node}' binds '{variable}' to undeclared input '{input}'")]
  UnknownInput {
    node: String,
    variable: String,
    input: String,
  },

  #[error("invalid name '{0}': names must be ASCII identifiers")]
  InvalidName(String),

  #[error("'{0}' is reserved")]
  ReservedName(String),

  #[error("default for '{owner}.{name}' is {found}, expected {expected}")]
  DefaultTypeMismatch {
    owner: String,
    name: String,
    expected: String,
    found: String,
  },
}

/// A raw value that failed its declared type's parser.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct ParseError {
  pub reason: String,
}

impl ParseError {
  pub(crate) fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }
}
