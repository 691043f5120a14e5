use std::collections::{BTreeMap, BTreeSet};

use seqflow_model::AnalysisType;
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// A workflow as installed in the registry.
///
/// ```json
/// {
///   "workflowId": "snvphyl--1.0.1",
///   "name": "SNVPhyl",
///   "version": "1.0.1",
///   "remoteWorkflowId": "f2db41e1fa331b3e",
///   "analysisType": "phylogenomics",
///   "inputs": { "sequenceReadsPaired": "sequence_reads_paired", "reference": "reference" },
///   "parameters": [{ "name": "min_coverage", "defaultValue": "10" }],
///   "outputs": [{ "name": "tree", "fileName": "phylogeneticTree.newick" }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDescription {
  pub workflow_id: String,
  pub name: String,
  pub version: String,
  /// Id of the workflow on the execution backend.
  pub remote_workflow_id: String,
  pub analysis_type: AnalysisType,
  pub inputs: WorkflowInputs,
  #[serde(default)]
  pub parameters: Vec<WorkflowParameter>,
  pub outputs: Vec<WorkflowOutput>,
  /// Whether the workflow reads a backend-side tool data table.
  #[serde(default)]
  pub requires_tool_data_table: bool,
}

/// Input labels the workflow declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInputs {
  pub sequence_reads_single: Option<String>,
  pub sequence_reads_paired: Option<String>,
  pub reference: Option<String>,
  #[serde(default)]
  pub requires_single_sample: bool,
  /// Whether reads are passed as a collection. Non-batched workflows take
  /// exactly one sequencing object.
  #[serde(default = "default_batch")]
  pub batch: bool,
}

fn default_batch() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowParameter {
  pub name: String,
  pub default_value: serde_json::Value,
}

/// A declared output role and the file name it is saved under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutput {
  pub name: String,
  pub file_name: String,
}

impl WorkflowDescription {
  pub fn requires_reference(&self) -> bool {
    self.inputs.reference.is_some()
  }

  pub fn output_roles(&self) -> BTreeSet<String> {
    self.outputs.iter().map(|o| o.name.clone()).collect()
  }

  pub fn parameter_defaults(&self) -> BTreeMap<String, serde_json::Value> {
    self
      .parameters
      .iter()
      .map(|p| (p.name.clone(), p.default_value.clone()))
      .collect()
  }

  pub fn declares_parameter(&self, name: &str) -> bool {
    self.parameters.iter().any(|p| p.name == name)
  }

  /// Check the description is usable by the pipeline.
  pub fn validate(&self) -> Result<(), RegistryError> {
    let invalid = |message: &str| RegistryError::Invalid {
      workflow_id: self.workflow_id.clone(),
      message: message.to_string(),
    };

    if self.inputs.sequence_reads_single.is_none() && self.inputs.sequence_reads_paired.is_none() {
      return Err(invalid("no sequence read input declared"));
    }
    if self.outputs.is_empty() {
      return Err(invalid("no outputs declared"));
    }
    if self.output_roles().len() != self.outputs.len() {
      return Err(invalid("duplicate output name"));
    }
    Ok(())
  }
}
