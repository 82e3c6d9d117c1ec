use std::collections::HashMap;

use crate::node::Node;

/// Derived graph structure over a pipeline's nodes, by node index.
#[derive(Debug, Clone)]
pub(crate) struct Graph {
  /// node -> direct dependents, deduplicated in discovery order.
  adjacency: Vec<Vec<usize>>,
  /// node -> distinct producers of its inputs.
  upstream: Vec<Vec<usize>>,
  /// Nodes with no input bindings.
  start_nodes: Vec<usize>,
}

impl Graph {
  /// Derive adjacency from the nodes' output variables and bindings.
  ///
  /// `producers` maps every output variable to the index of its node.
  pub(crate) fn new(nodes: &[Node], producers: &HashMap<String, usize>) -> Self {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut upstream: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (idx, node) in nodes.iter().enumerate() {
      for output in node.outputs() {
        for (consumer, other) in nodes.iter().enumerate() {
          if other.consumes(&output.variable) && !adjacency[idx].contains(&consumer) {
            adjacency[idx].push(consumer);
          }
        }
      }
    }

    for (idx, node) in nodes.iter().enumerate() {
      for (variable, _) in node.bindings() {
        if let Some(&producer) = producers.get(variable)
          && !upstream[idx].contains(&producer)
        {
          upstream[idx].push(producer);
        }
      }
    }

    let start_nodes = nodes
      .iter()
      .enumerate()
      .filter(|(_, node)| node.is_start())
      .map(|(idx, _)| idx)
      .collect();

    Self {
      adjacency,
      upstream,
      start_nodes,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.adjacency.len()
  }

  pub(crate) fn start_nodes(&self) -> &[usize] {
    &self.start_nodes
  }

  pub(crate) fn downstream(&self, node: usize) -> &[usize] {
    self.adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[])
  }

  pub(crate) fn upstream(&self, node: usize) -> &[usize] {
    self.upstream.get(node).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// Topological traversal from the start nodes.
  pub(crate) fn topo(&self) -> Topo<'_> {
    Topo {
      graph: self,
      eligible: self.start_nodes.clone(),
      remaining: self.upstream.iter().map(Vec::len).collect(),
    }
  }

  /// The node itself plus every node that transitively feeds it, in index
  /// order.
  pub(crate) fn ancestors(&self, node: usize) -> Vec<usize> {
    let mut seen = vec![false; self.len()];
    let mut stack = vec![node];
    while let Some(idx) = stack.pop() {
      if std::mem::replace(&mut seen[idx], true) {
        continue;
      }
      stack.extend(self.upstream(idx).iter().copied());
    }
    seen
      .iter()
      .enumerate()
      .filter(|(_, seen)| **seen)
      .map(|(idx, _)| idx)
      .collect()
  }
}

/// Lazy topological iterator over node indices.
///
/// A node becomes eligible once every distinct producer of its inputs has
/// been yielded. Ties are broken last-in first-out. Nodes on (or downstream
/// of) a cycle are never yielded; pipelines reject cycles at build time.
#[derive(Debug, Clone)]
pub struct Topo<'a> {
  graph: &'a Graph,
  eligible: Vec<usize>,
  remaining: Vec<usize>,
}

impl Iterator for Topo<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let node = self.eligible.pop()?;
    for &dependent in self.graph.downstream(node) {
      self.remaining[dependent] -= 1;
      if self.remaining[dependent] == 0 {
        self.eligible.push(dependent);
      }
    }
    Some(node)
  }
}
