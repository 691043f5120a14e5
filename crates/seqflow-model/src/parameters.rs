use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a submission's workflow parameters come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ParameterSource {
  /// Use the workflow's declared default values.
  #[default]
  Default,
  /// Load a saved parameter set verbatim.
  Named { parameter_set_id: String },
  /// Values supplied with the submission.
  AdHoc {
    values: BTreeMap<String, serde_json::Value>,
  },
}

/// A saved, reusable collection of workflow parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParameterSet {
  pub parameter_set_id: String,
  pub name: String,
  pub workflow_id: String,
  pub values: BTreeMap<String, serde_json::Value>,
}

impl NamedParameterSet {
  pub fn new(
    name: impl Into<String>,
    workflow_id: impl Into<String>,
    values: BTreeMap<String, serde_json::Value>,
  ) -> Self {
    Self {
      parameter_set_id: crate::new_id(),
      name: name.into(),
      workflow_id: workflow_id.into(),
      values,
    }
  }
}
