//! Remote workspace preparation.
//!
//! Validation reads only the store and the workflow description, so a
//! submission that can never run is refused before anything is allocated on
//! the backend. Building allocates the workspace and removes it again if any
//! later step fails.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use seqflow_backend::{BackendError, CollectionElement, CollectionKind, ExecutionBackend};
use seqflow_model::{
  AnalysisSubmission, ReferenceFile, SequenceFile, SequencingObject, SequencingObjectKind,
};
use seqflow_registry::WorkflowDescription;
use seqflow_store::{Store, StoreError};
use tracing::{debug, info, warn};

use crate::error::{StageError, ValidationError};

/// Inputs of a submission that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedInputs {
  pub single_end: Vec<SequencingObject>,
  pub paired_end: Vec<SequencingObject>,
  pub reference: Option<ReferenceFile>,
}

impl ValidatedInputs {
  pub fn object_count(&self) -> usize {
    self.single_end.len() + self.paired_end.len()
  }
}

/// A populated remote workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
  pub workspace_id: String,
  /// Workflow input label -> dataset or collection id.
  pub input_ids: BTreeMap<String, String>,
}

pub struct WorkspaceBuilder {
  store: Arc<dyn Store>,
  backend: Arc<dyn ExecutionBackend>,
}

impl WorkspaceBuilder {
  pub fn new(store: Arc<dyn Store>, backend: Arc<dyn ExecutionBackend>) -> Self {
    Self { store, backend }
  }

  /// Check the submission can run on `workflow` and load its inputs.
  pub async fn validate(
    &self,
    submission: &AnalysisSubmission,
    workflow: &WorkflowDescription,
  ) -> Result<ValidatedInputs, StageError> {
    let workflow_id = &workflow.workflow_id;

    if submission.single_end_inputs.is_empty() && submission.paired_end_inputs.is_empty() {
      return Err(ValidationError::NoInputs.into());
    }
    if workflow.requires_reference() && submission.reference_file_id.is_none() {
      return Err(
        ValidationError::MissingReference {
          workflow_id: workflow_id.clone(),
        }
        .into(),
      );
    }
    if !submission.single_end_inputs.is_empty() && workflow.inputs.sequence_reads_single.is_none() {
      return Err(
        ValidationError::UnsupportedInput {
          workflow_id: workflow_id.clone(),
          kind: "single-end",
        }
        .into(),
      );
    }
    if !submission.paired_end_inputs.is_empty() && workflow.inputs.sequence_reads_paired.is_none() {
      return Err(
        ValidationError::UnsupportedInput {
          workflow_id: workflow_id.clone(),
          kind: "paired-end",
        }
        .into(),
      );
    }

    let single_end = self
      .load_objects(submission.single_end_inputs.iter(), false)
      .await?;
    let paired_end = self
      .load_objects(submission.paired_end_inputs.iter(), true)
      .await?;

    let mut samples = HashSet::new();
    for object in single_end.iter().chain(&paired_end) {
      if !samples.insert(object.sample_id.as_str()) {
        return Err(
          ValidationError::DuplicateSample {
            sample_id: object.sample_id.clone(),
          }
          .into(),
        );
      }
    }
    if workflow.inputs.requires_single_sample && samples.len() > 1 {
      return Err(
        ValidationError::TooManySamples {
          workflow_id: workflow_id.clone(),
          count: samples.len(),
        }
        .into(),
      );
    }
    let count = single_end.len() + paired_end.len();
    if !workflow.inputs.batch && count > 1 {
      return Err(
        ValidationError::NotBatched {
          workflow_id: workflow_id.clone(),
          count,
        }
        .into(),
      );
    }

    let reference = match (&submission.reference_file_id, workflow.requires_reference()) {
      (Some(reference_id), true) => {
        Some(
          self
            .store
            .get_reference_file(reference_id)
            .await
            .map_err(|e| match e {
              StoreError::NotFound(_) => StageError::from(ValidationError::UnknownReference {
                reference_id: reference_id.clone(),
              }),
              other => other.into(),
            })?,
        )
      }
      _ => None,
    };

    Ok(ValidatedInputs {
      single_end,
      paired_end,
      reference,
    })
  }

  async fn load_objects<'a>(
    &self,
    object_ids: impl Iterator<Item = &'a String>,
    paired: bool,
  ) -> Result<Vec<SequencingObject>, StageError> {
    let mut objects = Vec::new();
    for object_id in object_ids {
      let object = match self.store.get_sequencing_object(object_id).await {
        Ok(object) => object,
        Err(StoreError::NotFound(_)) => {
          return Err(
            ValidationError::UnknownInput {
              object_id: object_id.clone(),
            }
            .into(),
          );
        }
        Err(e) => return Err(e.into()),
      };
      if object.is_paired() != paired {
        return Err(
          ValidationError::InputKindMismatch {
            object_id: object_id.clone(),
            expected: if paired { "paired-end" } else { "single-end" },
          }
          .into(),
        );
      }
      objects.push(object);
    }
    Ok(objects)
  }

  /// Create the workspace and populate it with the validated inputs.
  ///
  /// On failure the workspace is deleted before the error is returned.
  pub async fn build(
    &self,
    submission: &AnalysisSubmission,
    workflow: &WorkflowDescription,
    inputs: &ValidatedInputs,
  ) -> Result<PreparedWorkspace, StageError> {
    let name = format!("seqflow-{}", submission.submission_id);
    let workspace_id = self.backend.create_workspace(&name).await?;
    debug!(
      submission_id = %submission.submission_id,
      workspace_id = %workspace_id,
      "workspace_created"
    );

    match self.populate(&workspace_id, workflow, inputs).await {
      Ok(input_ids) => {
        info!(
          submission_id = %submission.submission_id,
          workspace_id = %workspace_id,
          inputs = input_ids.len(),
          "workspace_built"
        );
        Ok(PreparedWorkspace {
          workspace_id,
          input_ids,
        })
      }
      Err(e) => {
        self.discard(&workspace_id).await;
        Err(e)
      }
    }
  }

  /// Delete a workspace that will not be used. Absent workspaces are fine.
  pub async fn discard(&self, workspace_id: &str) {
    match self.backend.delete_workspace(workspace_id).await {
      Ok(()) | Err(BackendError::NotFound { .. }) => {
        debug!(workspace_id = %workspace_id, "workspace_discarded");
      }
      Err(e) => {
        warn!(workspace_id = %workspace_id, error = %e, "workspace_discard_failed");
      }
    }
  }

  async fn populate(
    &self,
    workspace_id: &str,
    workflow: &WorkflowDescription,
    inputs: &ValidatedInputs,
  ) -> Result<BTreeMap<String, String>, StageError> {
    let mut input_ids = BTreeMap::new();

    if let Some(label) = &workflow.inputs.sequence_reads_single
      && !inputs.single_end.is_empty()
    {
      let mut elements = Vec::new();
      for object in &inputs.single_end {
        if let SequencingObjectKind::Single { file } = &object.kind {
          let dataset_id = self.dataset_for(workspace_id, object, file).await?;
          elements.push(CollectionElement::Dataset {
            name: object.sample_id.clone(),
            dataset_id,
          });
        }
      }

      let id = match (workflow.inputs.batch, elements.as_slice()) {
        (false, [CollectionElement::Dataset { dataset_id, .. }]) => dataset_id.clone(),
        _ => {
          self
            .backend
            .build_collection(workspace_id, CollectionKind::List, &elements)
            .await?
        }
      };
      input_ids.insert(label.clone(), id);
    }

    if let Some(label) = &workflow.inputs.sequence_reads_paired
      && !inputs.paired_end.is_empty()
    {
      let mut elements = Vec::new();
      for object in &inputs.paired_end {
        if let SequencingObjectKind::Pair { forward, reverse } = &object.kind {
          let forward = self.dataset_for(workspace_id, object, forward).await?;
          let reverse = self.dataset_for(workspace_id, object, reverse).await?;
          elements.push(CollectionElement::Pair {
            name: object.sample_id.clone(),
            forward,
            reverse,
          });
        }
      }

      let id = self
        .backend
        .build_collection(workspace_id, CollectionKind::ListPaired, &elements)
        .await?;
      input_ids.insert(label.clone(), id);
    }

    if let (Some(label), Some(reference)) = (&workflow.inputs.reference, &inputs.reference) {
      let id = self
        .backend
        .upload_dataset(workspace_id, &reference.path)
        .await?;
      input_ids.insert(label.clone(), id);
    }

    Ok(input_ids)
  }

  /// Link a file's earlier upload when the backend allows it, else upload it.
  async fn dataset_for(
    &self,
    workspace_id: &str,
    object: &SequencingObject,
    file: &SequenceFile,
  ) -> Result<String, StageError> {
    let reuse = self.backend.supports_dataset_reuse();

    if reuse && let Some(remote_id) = &file.remote_dataset_id {
      match self.backend.link_dataset(workspace_id, remote_id).await {
        Ok(id) => {
          debug!(file_id = %file.file_id, dataset_id = %id, "dataset_linked");
          return Ok(id);
        }
        Err(BackendError::NotFound { .. }) => {
          debug!(file_id = %file.file_id, "linked_dataset_gone");
        }
        Err(e) => return Err(e.into()),
      }
    }

    let id = self.backend.upload_dataset(workspace_id, &file.path).await?;
    if reuse {
      let updated = SequenceFile {
        remote_dataset_id: Some(id.clone()),
        ..file.clone()
      };
      self
        .store
        .update_sequence_file(&object.object_id, &updated)
        .await?;
    }
    Ok(id)
  }
}
