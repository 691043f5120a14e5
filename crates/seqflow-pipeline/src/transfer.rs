use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use seqflow_backend::ExecutionBackend;
use seqflow_model::{Analysis, AnalysisOutputFile, AnalysisSubmission, ProvenanceArena};
use seqflow_registry::{WorkflowDescription, WorkflowRegistry};
use tracing::{debug, info};

use crate::error::StageError;
use crate::provenance::build_provenance;

/// Downloads a finished run's outputs and assembles the [`Analysis`].
pub struct ResultTransfer {
  backend: Arc<dyn ExecutionBackend>,
  registry: Arc<dyn WorkflowRegistry>,
  work_dir: PathBuf,
}

impl ResultTransfer {
  pub fn new(
    backend: Arc<dyn ExecutionBackend>,
    registry: Arc<dyn WorkflowRegistry>,
    work_dir: impl Into<PathBuf>,
  ) -> Self {
    Self {
      backend,
      registry,
      work_dir: work_dir.into(),
    }
  }

  /// Directory outputs of `submission_id` are downloaded into.
  pub fn output_dir(&self, submission_id: &str) -> PathBuf {
    self.work_dir.join("analyses").join(submission_id)
  }

  pub async fn collect(
    &self,
    submission: &AnalysisSubmission,
    workflow: &WorkflowDescription,
  ) -> Result<Analysis, StageError> {
    let run_id = submission
      .remote_run_id
      .as_deref()
      .ok_or_else(|| StageError::unexpected("finished submission has no run id"))?;
    let datasets = self.backend.list_output_datasets(run_id).await?;
    let dir = self.output_dir(&submission.submission_id);

    let mut outputs = BTreeMap::new();
    let mut provenance = ProvenanceArena::new();
    let mut job_map = HashMap::new();

    for declared in &workflow.outputs {
      let dataset = datasets
        .iter()
        .find(|d| d.label == declared.name)
        .ok_or_else(|| StageError::OutputMismatch {
          message: format!("run {} produced no output '{}'", run_id, declared.name),
        })?;

      let path = self.backend.download_dataset(dataset, &dir).await?;
      let execution_id =
        build_provenance(self.backend.as_ref(), dataset, &mut provenance, &mut job_map).await?;
      debug!(
        submission_id = %submission.submission_id,
        role = %declared.name,
        path = %path.display(),
        "output_downloaded"
      );

      outputs.insert(
        declared.name.clone(),
        AnalysisOutputFile {
          file_name: declared.file_name.clone(),
          path,
          remote_dataset_id: dataset.dataset_id.clone(),
          tool_execution_id: execution_id,
        },
      );
    }

    let expected = self
      .registry
      .expected_output_roles(&workflow.analysis_type)
      .await?;
    let actual: BTreeSet<String> = outputs.keys().cloned().collect();
    if actual != expected {
      return Err(StageError::OutputMismatch {
        message: format!(
          "analysis type {} expects outputs {:?} but run produced {:?}",
          workflow.analysis_type, expected, actual
        ),
      });
    }

    info!(
      submission_id = %submission.submission_id,
      outputs = outputs.len(),
      tool_executions = provenance.len(),
      "outputs_transferred"
    );
    Ok(Analysis::new(
      submission.submission_id.clone(),
      workflow.analysis_type.clone(),
      outputs,
      provenance,
    ))
  }
}
