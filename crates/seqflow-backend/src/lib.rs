//! Seqflow Backend
//!
//! Capability-only facade over the remote workflow execution engine. The
//! pipeline never talks to the engine directly; it calls an
//! [`ExecutionBackend`] and branches on the [`BackendError`] classification:
//! transient failures are retried on the next scheduler tick, everything else
//! is terminal for the submission.
//!
//! Two implementations are provided:
//! - [`HttpBackend`]: JSON over HTTP, authenticated with an API key
//! - [`MemoryBackend`]: a scriptable in-process engine for tests

mod error;
mod http;
mod memory;
mod types;

pub use error::BackendError;
pub use http::HttpBackend;
pub use memory::{BackendOp, MemoryBackend, ScriptedOutput};
pub use types::{
  CollectionElement, CollectionKind, ExecutionGraph, JobRecord, OutputDataset, RunStatus,
  WorkflowInvocation,
};

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Operations the pipeline needs from the remote execution engine.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
  /// Create an isolated workspace and return its id.
  async fn create_workspace(&self, name: &str) -> Result<String, BackendError>;

  /// Upload a local file into a workspace and return the dataset id.
  async fn upload_dataset(&self, workspace_id: &str, path: &Path) -> Result<String, BackendError>;

  /// Whether datasets uploaded earlier can be linked into a new workspace.
  fn supports_dataset_reuse(&self) -> bool {
    false
  }

  /// Link an existing remote dataset into a workspace and return the new id.
  async fn link_dataset(
    &self,
    _workspace_id: &str,
    _dataset_id: &str,
  ) -> Result<String, BackendError> {
    Err(BackendError::Unsupported {
      operation: "link_dataset",
    })
  }

  /// Group datasets into a collection and return the collection id.
  async fn build_collection(
    &self,
    workspace_id: &str,
    kind: CollectionKind,
    elements: &[CollectionElement],
  ) -> Result<String, BackendError>;

  /// Start a workflow run and return the run id.
  async fn invoke_workflow(&self, invocation: &WorkflowInvocation) -> Result<String, BackendError>;

  async fn get_run_status(&self, run_id: &str) -> Result<RunStatus, BackendError>;

  async fn list_output_datasets(&self, run_id: &str) -> Result<Vec<OutputDataset>, BackendError>;

  /// Download an output into `dir` and return the local path.
  async fn download_dataset(
    &self,
    output: &OutputDataset,
    dir: &Path,
  ) -> Result<PathBuf, BackendError>;

  /// The job graph that produced `output`.
  async fn get_provenance(&self, output: &OutputDataset) -> Result<ExecutionGraph, BackendError>;

  async fn delete_workspace(&self, workspace_id: &str) -> Result<(), BackendError>;
}
