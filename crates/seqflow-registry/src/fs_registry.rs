use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use seqflow_model::AnalysisType;
use tokio::fs;
use tracing::warn;

use crate::{RegistryError, WorkflowDescription, WorkflowRegistry};

const DESCRIPTION_FILE: &str = "workflow.json";
const ANALYSIS_TYPES_FILE: &str = "analysis-types.json";

/// Filesystem-based workflow registry.
///
/// Workflows are stored in a directory structure:
/// ```text
/// {root}/
/// ├── analysis-types.json (optional: type -> [roles])
/// ├── snvphyl--1.0.1/
/// │   └── workflow.json
/// └── assembly-annotation--0.5/
///     └── workflow.json
/// ```
///
/// Without an `analysis-types.json` entry, the expected roles of a type are
/// the outputs declared by its workflows.
pub struct FsWorkflowRegistry {
  root: PathBuf,
}

impl FsWorkflowRegistry {
  /// Create a new filesystem registry at the given root path.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Get the root directory of the registry.
  pub fn root(&self) -> &Path {
    &self.root
  }

  async fn read_description(&self, dir: &Path) -> Result<WorkflowDescription, RegistryError> {
    let content = fs::read_to_string(dir.join(DESCRIPTION_FILE)).await?;
    let description: WorkflowDescription = serde_json::from_str(&content)?;
    description.validate()?;
    Ok(description)
  }

  /// All readable descriptions. Broken entries are logged and skipped.
  pub async fn list(&self) -> Result<Vec<WorkflowDescription>, RegistryError> {
    let mut descriptions = Vec::new();

    if !self.root.exists() {
      return Ok(descriptions);
    }

    let mut entries = fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }
      match self.read_description(&path).await {
        Ok(description) => descriptions.push(description),
        Err(e) => warn!(path = %path.display(), error = %e, "workflow_description_skipped"),
      }
    }

    Ok(descriptions)
  }

  async fn read_analysis_types(
    &self,
  ) -> Result<Option<BTreeMap<String, BTreeSet<String>>>, RegistryError> {
    let path = self.root.join(ANALYSIS_TYPES_FILE);
    if !path.exists() {
      return Ok(None);
    }
    let content = fs::read_to_string(&path).await?;
    Ok(Some(serde_json::from_str(&content)?))
  }
}

#[async_trait]
impl WorkflowRegistry for FsWorkflowRegistry {
  async fn resolve(&self, workflow_id: &str) -> Result<WorkflowDescription, RegistryError> {
    // Directory name matches the id by convention; fall back to a scan.
    let direct = self.root.join(workflow_id);
    if direct.is_dir()
      && let Ok(description) = self.read_description(&direct).await
      && description.workflow_id == workflow_id
    {
      return Ok(description);
    }

    self
      .list()
      .await?
      .into_iter()
      .find(|d| d.workflow_id == workflow_id)
      .ok_or_else(|| RegistryError::NotFound {
        workflow_id: workflow_id.to_string(),
      })
  }

  async fn expected_output_roles(
    &self,
    analysis_type: &AnalysisType,
  ) -> Result<BTreeSet<String>, RegistryError> {
    if let Some(types) = self.read_analysis_types().await?
      && let Some(roles) = types.get(analysis_type.as_str())
    {
      return Ok(roles.clone());
    }

    self
      .list()
      .await?
      .into_iter()
      .find(|d| &d.analysis_type == analysis_type)
      .map(|d| d.output_roles())
      .ok_or_else(|| RegistryError::UnknownAnalysisType {
        analysis_type: analysis_type.to_string(),
      })
  }
}
