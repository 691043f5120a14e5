use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seqflow_model::{
  Analysis, AnalysisSubmission, CleanupState, NamedParameterSet, QcEntry, ReferenceFile,
  SequenceFile, SequencingObject, SubmissionState,
};
use tokio::sync::RwLock;

use crate::update::apply_transition;
use crate::{Store, StoreError, SubmissionUpdate, is_schedulable, needs_cleanup};

#[derive(Default)]
struct Inner {
  submissions: HashMap<String, AnalysisSubmission>,
  analyses: HashMap<String, Analysis>,
  objects: HashMap<String, SequencingObject>,
  references: HashMap<String, ReferenceFile>,
  qc_entries: Vec<QcEntry>,
  parameter_sets: HashMap<String, NamedParameterSet>,
  sample_metadata: HashMap<String, BTreeMap<String, String>>,
  failing_transitions: Vec<SubmissionState>,
}

/// In-memory store. Every operation holds a single lock, so compare-and-set
/// is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make the next transition into `next` fail with a write conflict.
  pub async fn fail_next_transition(&self, next: SubmissionState) {
    self.inner.write().await.failing_transitions.push(next);
  }
}

fn oldest_first(mut subs: Vec<AnalysisSubmission>, limit: usize) -> Vec<AnalysisSubmission> {
  subs.sort_by(|a, b| a.modified_at.cmp(&b.modified_at));
  subs.truncate(limit);
  subs
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_submission(&self, submission: &AnalysisSubmission) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    if inner.submissions.contains_key(&submission.submission_id) {
      return Err(StoreError::AlreadyExists(submission.submission_id.clone()));
    }
    inner
      .submissions
      .insert(submission.submission_id.clone(), submission.clone());
    Ok(())
  }

  async fn get_submission(&self, submission_id: &str) -> Result<AnalysisSubmission, StoreError> {
    self
      .inner
      .read()
      .await
      .submissions
      .get(submission_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))
  }

  async fn find_by_state(
    &self,
    state: SubmissionState,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let inner = self.inner.read().await;
    let subs = inner
      .submissions
      .values()
      .filter(|s| s.state == state)
      .cloned()
      .collect();
    Ok(oldest_first(subs, limit))
  }

  async fn find_schedulable(
    &self,
    states: &[SubmissionState],
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let inner = self.inner.read().await;
    let subs = inner
      .submissions
      .values()
      .filter(|s| states.contains(&s.state) && is_schedulable(s))
      .cloned()
      .collect();
    Ok(oldest_first(subs, limit))
  }

  async fn find_cleanup_candidates(
    &self,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let inner = self.inner.read().await;
    let subs = inner
      .submissions
      .values()
      .filter(|s| needs_cleanup(s))
      .cloned()
      .collect();
    Ok(oldest_first(subs, limit))
  }

  async fn transition(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    next: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    if let Some(pos) = inner.failing_transitions.iter().position(|s| *s == next) {
      inner.failing_transitions.remove(pos);
      return Err(StoreError::Conflict {
        submission_id: submission_id.to_string(),
      });
    }
    let submission = inner
      .submissions
      .get_mut(submission_id)
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))?;
    apply_transition(submission, expected, next, &update)
  }

  async fn update_submission(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StoreError> {
    self
      .transition(submission_id, expected, expected, update)
      .await
  }

  async fn request_cancellation(&self, submission_id: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    let submission = inner
      .submissions
      .get_mut(submission_id)
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))?;
    submission.cancel_requested = true;
    submission.modified_at = Utc::now();
    Ok(())
  }

  async fn compare_and_set_cleanup_state(
    &self,
    submission_id: &str,
    expected: CleanupState,
    next: CleanupState,
  ) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    let submission = inner
      .submissions
      .get_mut(submission_id)
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))?;
    if submission.cleanup_state != expected {
      return Ok(false);
    }
    submission.cleanup_state = next;
    submission.modified_at = Utc::now();
    Ok(true)
  }

  async fn find_stale_cleanups(
    &self,
    claimed_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let inner = self.inner.read().await;
    let subs = inner
      .submissions
      .values()
      .filter(|s| s.cleanup_state == CleanupState::Cleaning && s.modified_at < claimed_before)
      .cloned()
      .collect();
    Ok(oldest_first(subs, limit))
  }

  async fn reclaim_cleanup(
    &self,
    submission_id: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    let submission = inner
      .submissions
      .get_mut(submission_id)
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))?;
    if submission.cleanup_state != CleanupState::Cleaning || submission.modified_at >= claimed_before
    {
      return Ok(false);
    }
    submission.modified_at = Utc::now();
    Ok(true)
  }

  async fn complete_submission(
    &self,
    submission_id: &str,
    analysis: &Analysis,
  ) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    let submission = inner
      .submissions
      .get_mut(submission_id)
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))?;
    let applied = apply_transition(
      submission,
      SubmissionState::Completing,
      SubmissionState::Completed,
      &SubmissionUpdate::default(),
    )?;
    if !applied {
      return Ok(false);
    }
    submission.analysis_id = Some(analysis.analysis_id.clone());
    inner
      .analyses
      .insert(analysis.analysis_id.clone(), analysis.clone());
    Ok(true)
  }

  async fn get_analysis(&self, analysis_id: &str) -> Result<Analysis, StoreError> {
    self
      .inner
      .read()
      .await
      .analyses
      .get(analysis_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(analysis_id.to_string()))
  }

  async fn create_sequencing_object(&self, object: &SequencingObject) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    if inner.objects.contains_key(&object.object_id) {
      return Err(StoreError::AlreadyExists(object.object_id.clone()));
    }
    inner
      .objects
      .insert(object.object_id.clone(), object.clone());
    Ok(())
  }

  async fn get_sequencing_object(&self, object_id: &str) -> Result<SequencingObject, StoreError> {
    self
      .inner
      .read()
      .await
      .objects
      .get(object_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(object_id.to_string()))
  }

  async fn sequencing_object_exists(&self, object_id: &str) -> Result<bool, StoreError> {
    Ok(self.inner.read().await.objects.contains_key(object_id))
  }

  async fn update_sequence_file(
    &self,
    object_id: &str,
    file: &SequenceFile,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    let object = inner
      .objects
      .get_mut(object_id)
      .ok_or_else(|| StoreError::NotFound(object_id.to_string()))?;
    let slot = object
      .file_mut(&file.file_id)
      .ok_or_else(|| StoreError::NotFound(file.file_id.clone()))?;
    *slot = file.clone();
    Ok(())
  }

  async fn create_reference_file(&self, reference: &ReferenceFile) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .references
      .insert(reference.reference_id.clone(), reference.clone());
    Ok(())
  }

  async fn get_reference_file(&self, reference_id: &str) -> Result<ReferenceFile, StoreError> {
    self
      .inner
      .read()
      .await
      .references
      .get(reference_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(reference_id.to_string()))
  }

  async fn create_qc_entry(&self, entry: &QcEntry) -> Result<(), StoreError> {
    self.inner.write().await.qc_entries.push(entry.clone());
    Ok(())
  }

  async fn list_qc_entries(&self, sample_id: &str) -> Result<Vec<QcEntry>, StoreError> {
    Ok(
      self
        .inner
        .read()
        .await
        .qc_entries
        .iter()
        .filter(|e| e.sample_id == sample_id)
        .cloned()
        .collect(),
    )
  }

  async fn create_parameter_set(&self, set: &NamedParameterSet) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .parameter_sets
      .insert(set.parameter_set_id.clone(), set.clone());
    Ok(())
  }

  async fn get_parameter_set(
    &self,
    parameter_set_id: &str,
  ) -> Result<NamedParameterSet, StoreError> {
    self
      .inner
      .read()
      .await
      .parameter_sets
      .get(parameter_set_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(parameter_set_id.to_string()))
  }

  async fn get_sample_metadata(
    &self,
    sample_id: &str,
  ) -> Result<BTreeMap<String, String>, StoreError> {
    Ok(
      self
        .inner
        .read()
        .await
        .sample_metadata
        .get(sample_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn merge_sample_metadata(
    &self,
    sample_id: &str,
    entries: &BTreeMap<String, String>,
  ) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .sample_metadata
      .entry(sample_id.to_string())
      .or_default()
      .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
  }
}
