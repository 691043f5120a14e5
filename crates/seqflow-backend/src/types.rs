use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
  #[serde(rename = "list")]
  List,
  #[serde(rename = "list:paired")]
  ListPaired,
}

impl CollectionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      CollectionKind::List => "list",
      CollectionKind::ListPaired => "list:paired",
    }
  }
}

/// One named member of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionElement {
  Dataset {
    name: String,
    dataset_id: String,
  },
  Pair {
    name: String,
    forward: String,
    reverse: String,
  },
}

impl CollectionElement {
  pub fn name(&self) -> &str {
    match self {
      CollectionElement::Dataset { name, .. } | CollectionElement::Pair { name, .. } => name,
    }
  }
}

/// Everything needed to start a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInvocation {
  pub workflow_id: String,
  pub remote_workflow_id: String,
  pub workspace_id: String,
  /// Workflow input label -> dataset or collection id.
  pub inputs: BTreeMap<String, String>,
  pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Raw run status in the backend's own vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
  /// Overall state (`queued`, `running`, `ok`, `error`, ...).
  pub state: String,
  /// Item state -> ids of the items currently in it.
  #[serde(default)]
  pub state_ids: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  pub message: Option<String>,
}

impl RunStatus {
  pub fn new(state: impl Into<String>) -> Self {
    Self {
      state: state.into(),
      ..Default::default()
    }
  }

  pub fn with_items(mut self, state: impl Into<String>, ids: &[&str]) -> Self {
    self
      .state_ids
      .insert(state.into(), ids.iter().map(|id| id.to_string()).collect());
    self
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  pub fn item_count(&self) -> usize {
    self.state_ids.values().map(Vec::len).sum()
  }

  pub fn items_in(&self, state: &str) -> usize {
    self.state_ids.get(state).map_or(0, Vec::len)
  }
}

/// A dataset produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDataset {
  pub dataset_id: String,
  /// Workflow output label.
  pub label: String,
  pub file_name: String,
  /// Job that created the dataset.
  pub job_id: String,
}

/// A job node as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
  pub job_id: String,
  pub tool_name: String,
  pub tool_version: String,
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  /// Jobs whose outputs this job consumed.
  #[serde(default)]
  pub upstream: Vec<String>,
  #[serde(default)]
  pub input_tool: bool,
}

/// Job graph rooted at the job that produced one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGraph {
  pub root_job_id: String,
  pub jobs: BTreeMap<String, JobRecord>,
}
