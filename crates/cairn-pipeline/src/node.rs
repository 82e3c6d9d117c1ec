use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use cairn_artifact::ArtifactKind;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::is_identifier;
use crate::param::{ParamType, ParamValue};
use crate::step::Step;
use crate::{DETAILS_SECTION, RUN_KEY};

/// A declared parameter (node parameter or run detail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
  pub name: String,
  pub param_type: ParamType,
  pub default: Option<ParamValue>,
}

impl ParamDecl {
  pub(crate) fn checked(
    owner: &str,
    name: &str,
    param_type: ParamType,
    default: Option<ParamValue>,
  ) -> Result<Self, GraphError> {
    if !is_identifier(name) {
      return Err(GraphError::InvalidName(name.to_string()));
    }
    if let Some(value) = &default
      && value.param_type() != param_type
    {
      return Err(GraphError::DefaultTypeMismatch {
        owner: owner.to_string(),
        name: name.to_string(),
        expected: param_type.to_string(),
        found: value.param_type().to_string(),
      });
    }
    Ok(Self {
      name: name.to_string(),
      param_type,
      default,
    })
  }
}

/// A declared (formal) input artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDecl {
  pub name: String,
  pub kind: ArtifactKind,
}

/// An output slot: the variable it writes and the kind of artifact it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDecl {
  pub variable: String,
  pub kind: ArtifactKind,
}

/// One pipeline step with its typed schema.
///
/// Immutable once built; see [`Node::builder`].
#[derive(Clone)]
pub struct Node {
  name: String,
  step: Arc<dyn Step>,
  parameters: Vec<ParamDecl>,
  inputs: Vec<InputDecl>,
  /// (variable, formal input) pairs, in declaration order.
  bindings: Vec<(String, String)>,
  outputs: Vec<OutputDecl>,
}

impl Node {
  /// Start declaring a node backed by `step`.
  pub fn builder(name: impl Into<String>, step: Arc<dyn Step>) -> NodeBuilder {
    NodeBuilder {
      name: name.into(),
      step,
      parameters: Vec::new(),
      inputs: Vec::new(),
      bindings: Vec::new(),
      outputs: Vec::new(),
      pending_error: None,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn step(&self) -> &Arc<dyn Step> {
    &self.step
  }

  pub fn parameters(&self) -> &[ParamDecl] {
    &self.parameters
  }

  pub fn inputs(&self) -> &[InputDecl] {
    &self.inputs
  }

  /// (variable, formal input) pairs.
  pub fn bindings(&self) -> &[(String, String)] {
    &self.bindings
  }

  pub fn outputs(&self) -> &[OutputDecl] {
    &self.outputs
  }

  /// Whether the node consumes no variables.
  pub fn is_start(&self) -> bool {
    self.bindings.is_empty()
  }

  pub fn input(&self, formal: &str) -> Option<&InputDecl> {
    self.inputs.iter().find(|i| i.name == formal)
  }

  pub fn consumes(&self, variable: &str) -> bool {
    self.bindings.iter().any(|(v, _)| v == variable)
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("name", &self.name)
      .field("parameters", &self.parameters)
      .field("inputs", &self.inputs)
      .field("bindings", &self.bindings)
      .field("outputs", &self.outputs)
      .finish_non_exhaustive()
  }
}

/// Builder for [`Node`].
///
/// Declaration errors are deferred to [`NodeBuilder::build`] so declarations
/// can be chained.
pub struct NodeBuilder {
  name: String,
  step: Arc<dyn Step>,
  parameters: Vec<ParamDecl>,
  inputs: Vec<InputDecl>,
  bindings: Vec<(String, String)>,
  outputs: Vec<OutputDecl>,
  pending_error: Option<GraphError>,
}

impl NodeBuilder {
  fn record(&mut self, result: Result<(), GraphError>) {
    if let Err(e) = result
      && self.pending_error.is_none()
    {
      self.pending_error = Some(e);
    }
  }

  /// Declare a required parameter.
  pub fn param(self, name: &str, param_type: ParamType) -> Self {
    self.declare_param(name, param_type, None)
  }

  /// Declare a parameter with a default pre-filled into new config files.
  pub fn param_default(self, name: &str, param_type: ParamType, default: ParamValue) -> Self {
    self.declare_param(name, param_type, Some(default))
  }

  fn declare_param(
    mut self,
    name: &str,
    param_type: ParamType,
    default: Option<ParamValue>,
  ) -> Self {
    let result = if self.parameters.iter().any(|p| p.name == name) {
      Err(GraphError::DuplicateName {
        owner: self.name.clone(),
        name: name.to_string(),
      })
    } else {
      ParamDecl::checked(&self.name, name, param_type, default).map(|p| self.parameters.push(p))
    };
    self.record(result);
    self
  }

  /// Declare a formal input artifact.
  pub fn input(mut self, name: &str, kind: ArtifactKind) -> Self {
    let result = if !is_identifier(name) {
      Err(GraphError::InvalidName(name.to_string()))
    } else if self.inputs.iter().any(|i| i.name == name) {
      Err(GraphError::DuplicateName {
        owner: self.name.clone(),
        name: name.to_string(),
      })
    } else {
      self.inputs.push(InputDecl {
        name: name.to_string(),
        kind,
      });
      Ok(())
    };
    self.record(result);
    self
  }

  /// Bind the pipeline variable `variable` to the formal input `input`.
  pub fn bind(mut self, variable: &str, input: &str) -> Self {
    let result = if !is_identifier(variable) {
      Err(GraphError::InvalidName(variable.to_string()))
    } else {
      self.bindings.push((variable.to_string(), input.to_string()));
      Ok(())
    };
    self.record(result);
    self
  }

  /// Declare the next output slot, writing into `variable`.
  pub fn output(mut self, variable: &str, kind: ArtifactKind) -> Self {
    let result = if !is_identifier(variable) {
      Err(GraphError::InvalidName(variable.to_string()))
    } else if self.outputs.iter().any(|o| o.variable == variable) {
      Err(GraphError::DuplicateOutput {
        variable: variable.to_string(),
        first: self.name.clone(),
        second: self.name.clone(),
      })
    } else {
      self.outputs.push(OutputDecl {
        variable: variable.to_string(),
        kind,
      });
      Ok(())
    };
    self.record(result);
    self
  }

  /// Validate the declarations and build the node.
  pub fn build(self) -> Result<Node, GraphError> {
    if let Some(e) = self.pending_error {
      return Err(e);
    }
    if !is_identifier(&self.name) {
      return Err(GraphError::InvalidName(self.name));
    }
    if self.name == DETAILS_SECTION || self.name == RUN_KEY {
      return Err(GraphError::ReservedName(self.name));
    }

    let mut bound = HashSet::new();
    for (variable, input) in &self.bindings {
      if !self.inputs.iter().any(|i| &i.name == input) {
        return Err(GraphError::UnknownInput {
          node: self.name.clone(),
          variable: variable.clone(),
          input: input.clone(),
        });
      }
      if !bound.insert(input.as_str()) {
        return Err(GraphError::DuplicateName {
          owner: self.name.clone(),
          name: input.clone(),
        });
      }
    }
    if let Some(unbound) = self.inputs.iter().find(|i| !bound.contains(i.name.as_str())) {
      return Err(GraphError::UnboundInput {
        node: self.name.clone(),
        input: unbound.name.clone(),
      });
    }
    if self.outputs.is_empty() {
      return Err(GraphError::NoOutputs { node: self.name });
    }

    Ok(Node {
      name: self.name,
      step: self.step,
      parameters: self.parameters,
      inputs: self.inputs,
      bindings: self.bindings,
      outputs: self.outputs,
    })
  }
}
