use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use seqflow_model::AnalysisType;
use tokio::sync::RwLock;

use crate::{RegistryError, WorkflowDescription, WorkflowRegistry};

/// In-memory registry, populated by the embedding application or tests.
#[derive(Default)]
pub struct MemoryWorkflowRegistry {
  workflows: RwLock<BTreeMap<String, WorkflowDescription>>,
  analysis_types: RwLock<BTreeMap<AnalysisType, BTreeSet<String>>>,
}

impl MemoryWorkflowRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a workflow. Its declared outputs become the expected roles of
  /// its analysis type unless roles were set explicitly.
  pub async fn register(&self, description: WorkflowDescription) -> Result<(), RegistryError> {
    description.validate()?;
    self
      .analysis_types
      .write()
      .await
      .entry(description.analysis_type.clone())
      .or_insert_with(|| description.output_roles());
    self
      .workflows
      .write()
      .await
      .insert(description.workflow_id.clone(), description);
    Ok(())
  }

  pub async fn set_expected_roles(&self, analysis_type: AnalysisType, roles: BTreeSet<String>) {
    self
      .analysis_types
      .write()
      .await
      .insert(analysis_type, roles);
  }
}

#[async_trait]
impl WorkflowRegistry for MemoryWorkflowRegistry {
  async fn resolve(&self, workflow_id: &str) -> Result<WorkflowDescription, RegistryError> {
    self
      .workflows
      .read()
      .await
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| RegistryError::NotFound {
        workflow_id: workflow_id.to_string(),
      })
  }

  async fn expected_output_roles(
    &self,
    analysis_type: &AnalysisType,
  ) -> Result<BTreeSet<String>, RegistryError> {
    self
      .analysis_types
      .read()
      .await
      .get(analysis_type)
      .cloned()
      .ok_or_else(|| RegistryError::UnknownAnalysisType {
        analysis_type: analysis_type.to_string(),
      })
  }
}
