//! Seqflow Store
//!
//! This crate provides the storage trait and implementations for analysis
//! submissions and the records the pipeline reads and writes around them.
//! Data is persisted to SQLite ([`SqliteStore`]) or kept in memory
//! ([`MemoryStore`]).
//!
//! Every submission state change goes through a compare-and-set on the
//! expected prior state, so concurrent stage tasks can never both advance
//! the same submission. Illegal transitions (skips, regressions, leaving a
//! terminal state) are rejected with [`StoreError::InvalidTransition`].

mod memory;
mod sqlite;
mod update;

use std::collections::BTreeMap;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use update::SubmissionUpdate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seqflow_model::{
  Analysis, AnalysisSubmission, CleanupState, NamedParameterSet, QcEntry, ReferenceFile,
  SequenceFile, SequencingObject, SubmissionState,
};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// The record already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// The requested state change is not a legal transition.
  #[error("invalid transition from {from} to {to}")]
  InvalidTransition {
    from: SubmissionState,
    to: SubmissionState,
  },

  /// Concurrent writers kept invalidating an update.
  #[error("write conflict on submission {submission_id}")]
  Conflict { submission_id: String },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage trait for submissions, sequencing data and analysis results.
#[async_trait]
pub trait Store: Send + Sync {
  /// Persist a new submission.
  async fn create_submission(&self, submission: &AnalysisSubmission) -> Result<(), StoreError>;

  /// Get a submission by ID.
  async fn get_submission(&self, submission_id: &str) -> Result<AnalysisSubmission, StoreError>;

  /// Submissions currently in `state`, least recently modified first.
  async fn find_by_state(
    &self,
    state: SubmissionState,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError>;

  /// Submissions a stage may pick up: in one of `states`, not cancelled, and
  /// for `New` not held by a validation failure. Least recently modified
  /// first, at most `limit` across all `states`.
  async fn find_schedulable(
    &self,
    states: &[SubmissionState],
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError>;

  /// Submissions whose remote resources still need releasing: terminal ones
  /// and cancelled ones that got past `New`, all with cleanup `NotCleaned`.
  async fn find_cleanup_candidates(
    &self,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError>;

  /// Move `expected -> next` and apply `update` in one step.
  ///
  /// Returns `Ok(false)` without writing when the stored state is no longer
  /// `expected`.
  async fn transition(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    next: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StoreError>;

  /// Move `expected -> next` with no other field changes.
  async fn compare_and_set_state(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    next: SubmissionState,
  ) -> Result<bool, StoreError> {
    self
      .transition(submission_id, expected, next, SubmissionUpdate::default())
      .await
  }

  /// Apply `update` while the submission is still in `expected`, without
  /// changing its state.
  async fn update_submission(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StoreError>;

  /// Set the cooperative cancellation flag.
  async fn request_cancellation(&self, submission_id: &str) -> Result<(), StoreError>;

  async fn compare_and_set_cleanup_state(
    &self,
    submission_id: &str,
    expected: CleanupState,
    next: CleanupState,
  ) -> Result<bool, StoreError>;

  /// Submissions left in `Cleaning` since before `claimed_before`.
  async fn find_stale_cleanups(
    &self,
    claimed_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError>;

  /// Take over a `Cleaning` claim last touched before `claimed_before`.
  /// Refreshes the claim, so only one caller wins.
  async fn reclaim_cleanup(
    &self,
    submission_id: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<bool, StoreError>;

  /// Persist `analysis` and move its submission `Completing -> Completed`
  /// atomically. Returns `Ok(false)` and writes nothing if the submission is
  /// no longer `Completing`.
  async fn complete_submission(
    &self,
    submission_id: &str,
    analysis: &Analysis,
  ) -> Result<bool, StoreError>;

  async fn get_analysis(&self, analysis_id: &str) -> Result<Analysis, StoreError>;

  async fn create_sequencing_object(&self, object: &SequencingObject) -> Result<(), StoreError>;

  async fn get_sequencing_object(&self, object_id: &str) -> Result<SequencingObject, StoreError>;

  /// Whether the object is visible to this store yet.
  async fn sequencing_object_exists(&self, object_id: &str) -> Result<bool, StoreError>;

  /// Replace one file of a sequencing object (matched by file id).
  async fn update_sequence_file(
    &self,
    object_id: &str,
    file: &SequenceFile,
  ) -> Result<(), StoreError>;

  async fn create_reference_file(&self, reference: &ReferenceFile) -> Result<(), StoreError>;

  async fn get_reference_file(&self, reference_id: &str) -> Result<ReferenceFile, StoreError>;

  async fn create_qc_entry(&self, entry: &QcEntry) -> Result<(), StoreError>;

  async fn list_qc_entries(&self, sample_id: &str) -> Result<Vec<QcEntry>, StoreError>;

  async fn create_parameter_set(&self, set: &NamedParameterSet) -> Result<(), StoreError>;

  async fn get_parameter_set(
    &self,
    parameter_set_id: &str,
  ) -> Result<NamedParameterSet, StoreError>;

  async fn get_sample_metadata(
    &self,
    sample_id: &str,
  ) -> Result<BTreeMap<String, String>, StoreError>;

  /// Insert or overwrite metadata entries on a sample.
  async fn merge_sample_metadata(
    &self,
    sample_id: &str,
    entries: &BTreeMap<String, String>,
  ) -> Result<(), StoreError>;
}

/// Whether a stage scan may pick up the submission.
pub fn is_schedulable(submission: &AnalysisSubmission) -> bool {
  !submission.cancel_requested
    && !(submission.state == SubmissionState::New && submission.last_error.is_some())
}

/// Whether a submission needs the cleanup handler.
pub fn needs_cleanup(submission: &AnalysisSubmission) -> bool {
  submission.cleanup_state == CleanupState::NotCleaned
    && (submission.state.is_terminal()
      || (submission.cancel_requested && submission.state != SubmissionState::New))
}
