use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provenance::ProvenanceArena;

/// Tag identifying what kind of analysis a workflow produces
/// (e.g. `phylogenomics`, `assembly-annotation`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisType(pub String);

impl AnalysisType {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for AnalysisType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A downloaded workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutputFile {
  pub file_name: String,
  pub path: PathBuf,
  pub remote_dataset_id: String,
  /// The [`ToolExecution`](crate::ToolExecution) that produced this file.
  pub tool_execution_id: String,
}

/// Immutable result of a completed submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
  pub analysis_id: String,
  pub submission_id: String,
  pub analysis_type: AnalysisType,
  /// Output role -> file.
  pub outputs: BTreeMap<String, AnalysisOutputFile>,
  pub provenance: ProvenanceArena,
  pub created_at: DateTime<Utc>,
}

impl Analysis {
  pub fn new(
    submission_id: impl Into<String>,
    analysis_type: AnalysisType,
    outputs: BTreeMap<String, AnalysisOutputFile>,
    provenance: ProvenanceArena,
  ) -> Self {
    Self {
      analysis_id: crate::new_id(),
      submission_id: submission_id.into(),
      analysis_type,
      outputs,
      provenance,
      created_at: Utc::now(),
    }
  }

  pub fn output(&self, role: &str) -> Option<&AnalysisOutputFile> {
    self.outputs.get(role)
  }
}
