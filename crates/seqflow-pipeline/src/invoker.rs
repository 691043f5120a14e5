use std::collections::BTreeMap;
use std::sync::Arc;

use seqflow_backend::{ExecutionBackend, WorkflowInvocation};
use seqflow_model::ParameterSource;
use seqflow_registry::WorkflowDescription;
use seqflow_store::{Store, StoreError};
use tracing::info;

use crate::error::{StageError, ValidationError};
use crate::workspace::PreparedWorkspace;

/// Submits a workflow run into a prepared workspace.
pub struct WorkflowInvoker {
  store: Arc<dyn Store>,
  backend: Arc<dyn ExecutionBackend>,
}

impl WorkflowInvoker {
  pub fn new(store: Arc<dyn Store>, backend: Arc<dyn ExecutionBackend>) -> Self {
    Self { store, backend }
  }

  /// Resolve the parameter values a run will use.
  ///
  /// Ad-hoc values are overlaid on the declared defaults and may only name
  /// declared parameters. Named sets are used as saved.
  pub async fn resolve_parameters(
    &self,
    source: &ParameterSource,
    workflow: &WorkflowDescription,
  ) -> Result<BTreeMap<String, serde_json::Value>, StageError> {
    match source {
      ParameterSource::AdHoc { values } => {
        let mut resolved = workflow.parameter_defaults();
        for (name, value) in values {
          if !workflow.declares_parameter(name) {
            return Err(
              ValidationError::UnknownParameter {
                workflow_id: workflow.workflow_id.clone(),
                name: name.clone(),
              }
              .into(),
            );
          }
          resolved.insert(name.clone(), value.clone());
        }
        Ok(resolved)
      }
      ParameterSource::Named { parameter_set_id } => {
        let set = match self.store.get_parameter_set(parameter_set_id).await {
          Ok(set) => set,
          Err(StoreError::NotFound(_)) => {
            return Err(
              ValidationError::UnknownParameterSet {
                parameter_set_id: parameter_set_id.clone(),
              }
              .into(),
            );
          }
          Err(e) => return Err(e.into()),
        };
        if set.workflow_id != workflow.workflow_id {
          return Err(
            ValidationError::ParameterSetMismatch {
              parameter_set_id: parameter_set_id.clone(),
              owner: set.workflow_id,
            }
            .into(),
          );
        }
        Ok(set.values)
      }
      ParameterSource::Default => Ok(workflow.parameter_defaults()),
    }
  }

  /// Start the run and return its id.
  pub async fn invoke(
    &self,
    submission_id: &str,
    workflow: &WorkflowDescription,
    workspace: &PreparedWorkspace,
    parameters: BTreeMap<String, serde_json::Value>,
  ) -> Result<String, StageError> {
    let invocation = WorkflowInvocation {
      workflow_id: workflow.workflow_id.clone(),
      remote_workflow_id: workflow.remote_workflow_id.clone(),
      workspace_id: workspace.workspace_id.clone(),
      inputs: workspace.input_ids.clone(),
      parameters,
    };
    let run_id = self.backend.invoke_workflow(&invocation).await?;
    info!(
      submission_id = %submission_id,
      workflow_id = %workflow.workflow_id,
      run_id = %run_id,
      "workflow_invoked"
    );
    Ok(run_id)
  }
}
