use std::collections::HashMap;

use cairn_artifact::ArtifactKind;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{InputDecl, Node, OutputDecl, ParamDecl};
use crate::param::{ParamType, ParamValue};
use crate::{DETAILS_SECTION, RUN_KEY};

fn describe(kind: &ArtifactKind) -> String {
  if kind.final_output {
    format!("{} (final output)", kind.name)
  } else {
    kind.name.clone()
  }
}

/// Collects node and run-detail declarations.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
  nodes: Vec<Node>,
  details: Vec<ParamDecl>,
  /// variable -> declared kind, from whichever node declared it first.
  kinds: HashMap<String, ArtifactKind>,
  /// variable -> index of the producing node.
  producers: HashMap<String, usize>,
}

impl PipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare a required run detail.
  pub fn detail(&mut self, name: &str, param_type: ParamType) -> Result<&mut Self, GraphError> {
    self.declare_detail(name, param_type, None)
  }

  /// Declare a run detail with a default.
  pub fn detail_default(
    &mut self,
    name: &str,
    param_type: ParamType,
    default: ParamValue,
  ) -> Result<&mut Self, GraphError> {
    self.declare_detail(name, param_type, Some(default))
  }

  fn declare_detail(
    &mut self,
    name: &str,
    param_type: ParamType,
    default: Option<ParamValue>,
  ) -> Result<&mut Self, GraphError> {
    if name == RUN_KEY {
      return Err(GraphError::ReservedName(name.to_string()));
    }
    if self.details.iter().any(|d| d.name == name) {
      return Err(GraphError::DuplicateName {
        owner: DETAILS_SECTION.to_string(),
        name: name.to_string(),
      });
    }
    let decl = ParamDecl::checked(DETAILS_SECTION, name, param_type, default)?;
    self.details.push(decl);
    Ok(self)
  }

  /// Register a node.
  ///
  /// Fails without registering anything when the node's name is taken, when
  /// one of its outputs is already produced elsewhere, or when it declares a
  /// variable with a different kind than an earlier registration did.
  pub fn add_node(&mut self, node: Node) -> Result<&mut Self, GraphError> {
    if self.nodes.iter().any(|n| n.name() == node.name()) {
      return Err(GraphError::DuplicateNode(node.name().to_string()));
    }

    let mut declared: Vec<(&str, &ArtifactKind)> = Vec::new();
    for output in node.outputs() {
      if let Some(&first) = self.producers.get(&output.variable) {
        return Err(GraphError::DuplicateOutput {
          variable: output.variable.clone(),
          first: self.nodes[first].name().to_string(),
          second: node.name().to_string(),
        });
      }
      declared.push((output.variable.as_str(), &output.kind));
    }
    for (variable, formal) in node.bindings() {
      if let Some(input) = node.input(formal) {
        declared.push((variable.as_str(), &input.kind));
      }
    }

    let mut seen: HashMap<&str, &ArtifactKind> = HashMap::new();
    for (variable, kind) in &declared {
      let expected = self
        .kinds
        .get(*variable)
        .or_else(|| seen.get(variable).copied());
      if let Some(expected) = expected
        && expected != *kind
      {
        return Err(GraphError::TypeMismatch {
          variable: variable.to_string(),
          node: node.name().to_string(),
          expected: describe(expected),
          found: describe(kind),
        });
      }
      seen.insert(*variable, *kind);
    }

    for (variable, kind) in declared {
      self
        .kinds
        .entry(variable.to_string())
        .or_insert_with(|| kind.clone());
    }
    let idx = self.nodes.len();
    for output in node.outputs() {
      self.producers.insert(output.variable.clone(), idx);
    }
    self.nodes.push(node);
    Ok(self)
  }

  /// Validate the whole graph and freeze it.
  pub fn build(self) -> Result<PipelineSpec, GraphError> {
    for node in &self.nodes {
      for (variable, _) in node.bindings() {
        if !self.producers.contains_key(variable) {
          return Err(GraphError::UnknownVariable {
            node: node.name().to_string(),
            variable: variable.clone(),
          });
        }
      }
    }

    let graph = Graph::new(&self.nodes, &self.producers);

    let mut visited = vec![false; graph.len()];
    for idx in graph.topo() {
      visited[idx] = true;
    }
    let stuck: Vec<String> = self
      .nodes
      .iter()
      .zip(&visited)
      .filter(|(_, visited)| !**visited)
      .map(|(node, _)| node.name().to_string())
      .collect();
    if !stuck.is_empty() {
      return Err(GraphError::Cycle { nodes: stuck });
    }

    Ok(PipelineSpec {
      nodes: self.nodes,
      details: self.details,
      producers: self.producers,
      graph,
    })
  }
}

/// An output variable together with the node that produces it.
#[derive(Debug, Clone, Copy)]
pub struct OutputRef<'a> {
  pub variable: &'a str,
  pub kind: &'a ArtifactKind,
  pub producer: &'a Node,
}

/// An immutable, validated pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
  nodes: Vec<Node>,
  details: Vec<ParamDecl>,
  producers: HashMap<String, usize>,
  graph: Graph,
}

impl PipelineSpec {
  /// Nodes in registration order.
  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn node(&self, name: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.name() == name)
  }

  fn index_of(&self, name: &str) -> Option<usize> {
    self.nodes.iter().position(|n| n.name() == name)
  }

  /// Run-detail declarations (never includes `run_key`).
  pub fn details(&self) -> &[ParamDecl] {
    &self.details
  }

  /// Nodes with no input bindings.
  pub fn start_nodes(&self) -> Vec<&Node> {
    self
      .graph
      .start_nodes()
      .iter()
      .map(|&idx| &self.nodes[idx])
      .collect()
  }

  /// Every node paired with its direct dependents.
  pub fn adjacency(&self) -> Vec<(&Node, Vec<&Node>)> {
    self
      .nodes
      .iter()
      .enumerate()
      .map(|(idx, node)| {
        let dependents = self
          .graph
          .downstream(idx)
          .iter()
          .map(|&d| &self.nodes[d])
          .collect();
        (node, dependents)
      })
      .collect()
  }

  /// Visit every node after all of its producers.
  ///
  /// Lazy; call again to restart.
  pub fn iterate(&self) -> impl Iterator<Item = &Node> + '_ {
    self.graph.topo().map(move |idx| &self.nodes[idx])
  }

  /// Distinct producers of a node's inputs.
  pub fn upstream(&self, name: &str) -> Vec<&Node> {
    self
      .index_of(name)
      .map(|idx| {
        self
          .graph
          .upstream(idx)
          .iter()
          .map(|&u| &self.nodes[u])
          .collect()
      })
      .unwrap_or_default()
  }

  /// The node plus every node that transitively feeds it, in registration
  /// order. Empty for unknown names.
  pub fn ancestors(&self, name: &str) -> Vec<&Node> {
    self
      .index_of(name)
      .map(|idx| {
        self
          .graph
          .ancestors(idx)
          .into_iter()
          .map(|a| &self.nodes[a])
          .collect()
      })
      .unwrap_or_default()
  }

  /// Node producing `variable`.
  pub fn producer(&self, variable: &str) -> Option<&Node> {
    self.producers.get(variable).map(|&idx| &self.nodes[idx])
  }

  /// Every output variable, in node then slot order.
  pub fn outputs(&self) -> Vec<OutputRef<'_>> {
    self
      .nodes
      .iter()
      .flat_map(|node| {
        node.outputs().iter().map(move |o| OutputRef {
          variable: &o.variable,
          kind: &o.kind,
          producer: node,
        })
      })
      .collect()
  }

  pub fn output(&self, variable: &str) -> Option<OutputRef<'_>> {
    self.outputs().into_iter().find(|o| o.variable == variable)
  }

  /// Serializable description of everything the store schema and config
  /// files are derived from.
  pub fn shape(&self) -> PipelineShape {
    PipelineShape {
      details: self.details.clone(),
      nodes: self
        .nodes
        .iter()
        .map(|node| NodeShape {
          name: node.name().to_string(),
          parameters: node.parameters().to_vec(),
          inputs: node.inputs().to_vec(),
          bindings: node.bindings().to_vec(),
          outputs: node.outputs().to_vec(),
        })
        .collect(),
    }
  }
}

/// Frozen pipeline shape, persisted next to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineShape {
  pub details: Vec<ParamDecl>,
  pub nodes: Vec<NodeShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeShape {
  pub name: String,
  pub parameters: Vec<ParamDecl>,
  pub inputs: Vec<InputDecl>,
  pub bindings: Vec<(String, String)>,
  pub outputs: Vec<OutputDecl>,
}
