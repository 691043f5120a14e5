//! Seqflow Registry
//!
//! Resolves workflow identifiers to [`WorkflowDescription`]s and holds the
//! expected output-role set for every analysis type.

mod description;
mod error;
mod fs_registry;
mod memory;

pub use description::{WorkflowDescription, WorkflowInputs, WorkflowOutput, WorkflowParameter};
pub use error::RegistryError;
pub use fs_registry::FsWorkflowRegistry;
pub use memory::MemoryWorkflowRegistry;

use std::collections::BTreeSet;

use async_trait::async_trait;
use seqflow_model::AnalysisType;

/// Lookup of installed workflows.
#[async_trait]
pub trait WorkflowRegistry: Send + Sync {
  /// Get the description of a workflow by ID.
  async fn resolve(&self, workflow_id: &str) -> Result<WorkflowDescription, RegistryError>;

  /// Output roles every analysis of `analysis_type` must carry.
  async fn expected_output_roles(
    &self,
    analysis_type: &AnalysisType,
  ) -> Result<BTreeSet<String>, RegistryError>;
}
