use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// One node of the provenance DAG: a tool run with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
  pub execution_id: String,
  pub tool_name: String,
  pub tool_version: String,
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  /// Ids of the executions whose outputs this one consumed.
  #[serde(default)]
  pub predecessors: Vec<String>,
  /// Set for nodes that only brought data into the workspace.
  #[serde(default)]
  pub input_tool: bool,
  /// Job id on the execution backend.
  pub remote_job_id: String,
}

impl ToolExecution {
  /// Terminal nodes stand for original uploads.
  pub fn is_terminal(&self) -> bool {
    self.input_tool || self.predecessors.is_empty()
  }
}

/// Arena of [`ToolExecution`] nodes keyed by id.
///
/// Edges are predecessor id lists, so the graph is acyclic by construction
/// as long as ids are allocated before the nodes that reference them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceArena {
  nodes: BTreeMap<String, ToolExecution>,
}

impl ProvenanceArena {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, execution: ToolExecution) {
    self.nodes.insert(execution.execution_id.clone(), execution);
  }

  pub fn get(&self, execution_id: &str) -> Option<&ToolExecution> {
    self.nodes.get(execution_id)
  }

  pub fn contains(&self, execution_id: &str) -> bool {
    self.nodes.contains_key(execution_id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ToolExecution> {
    self.nodes.values()
  }

  /// All executions reachable from `root` through predecessor edges,
  /// in breadth-first order starting with `root` itself.
  ///
  /// Dangling predecessor ids are skipped.
  pub fn lineage(&self, root: &str) -> Vec<&ToolExecution> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(id) = queue.pop_front() {
      if !visited.insert(id) {
        continue;
      }
      let Some(node) = self.nodes.get(id) else {
        continue;
      };
      out.push(node);
      for pred in &node.predecessors {
        queue.push_back(pred.as_str());
      }
    }

    out
  }

  /// Terminal ancestors of `root` (the original uploads it was computed from).
  pub fn origins(&self, root: &str) -> Vec<&ToolExecution> {
    self
      .lineage(root)
      .into_iter()
      .filter(|node| node.is_terminal())
      .collect()
  }
}
