use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parameters::ParameterSource;

/// Lifecycle state of an [`AnalysisSubmission`].
///
/// Submissions only ever move to their direct successor, or to `Error` from
/// any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
  New,
  Preparing,
  Submitted,
  Running,
  FinishedRunning,
  Completing,
  Completed,
  Error,
}

impl SubmissionState {
  pub const ALL: [SubmissionState; 8] = [
    SubmissionState::New,
    SubmissionState::Preparing,
    SubmissionState::Submitted,
    SubmissionState::Running,
    SubmissionState::FinishedRunning,
    SubmissionState::Completing,
    SubmissionState::Completed,
    SubmissionState::Error,
  ];

  /// Whether no further transitions are possible.
  pub fn is_terminal(self) -> bool {
    matches!(self, SubmissionState::Completed | SubmissionState::Error)
  }

  /// The next state on the success path, if any.
  pub fn successor(self) -> Option<SubmissionState> {
    match self {
      SubmissionState::New => Some(SubmissionState::Preparing),
      SubmissionState::Preparing => Some(SubmissionState::Submitted),
      SubmissionState::Submitted => Some(SubmissionState::Running),
      SubmissionState::Running => Some(SubmissionState::FinishedRunning),
      SubmissionState::FinishedRunning => Some(SubmissionState::Completing),
      SubmissionState::Completing => Some(SubmissionState::Completed),
      SubmissionState::Completed | SubmissionState::Error => None,
    }
  }

  /// Whether `self -> next` is a legal transition.
  pub fn can_transition_to(self, next: SubmissionState) -> bool {
    if self.is_terminal() {
      return false;
    }
    next == SubmissionState::Error || self.successor() == Some(next)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      SubmissionState::New => "NEW",
      SubmissionState::Preparing => "PREPARING",
      SubmissionState::Submitted => "SUBMITTED",
      SubmissionState::Running => "RUNNING",
      SubmissionState::FinishedRunning => "FINISHED_RUNNING",
      SubmissionState::Completing => "COMPLETING",
      SubmissionState::Completed => "COMPLETED",
      SubmissionState::Error => "ERROR",
    }
  }
}

impl fmt::Display for SubmissionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for SubmissionState {
  type Err = ParseStateError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SubmissionState::ALL
      .into_iter()
      .find(|state| state.as_str() == s)
      .ok_or_else(|| ParseStateError(s.to_string()))
  }
}

/// Progress of remote resource release for a terminal submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupState {
  #[default]
  NotCleaned,
  Cleaning,
  Cleaned,
  CleaningError,
}

impl CleanupState {
  pub fn as_str(self) -> &'static str {
    match self {
      CleanupState::NotCleaned => "NOT_CLEANED",
      CleanupState::Cleaning => "CLEANING",
      CleanupState::Cleaned => "CLEANED",
      CleanupState::CleaningError => "CLEANING_ERROR",
    }
  }
}

impl FromStr for CleanupState {
  type Err = ParseStateError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    [
      CleanupState::NotCleaned,
      CleanupState::Cleaning,
      CleanupState::Cleaned,
      CleanupState::CleaningError,
    ]
    .into_iter()
    .find(|state| state.as_str() == s)
    .ok_or_else(|| ParseStateError(s.to_string()))
  }
}

/// An undo action for a remote resource allocated on behalf of a submission.
///
/// Registered by the stage that allocates the resource and executed once by
/// the cleanup handler after the submission becomes terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
  DeleteWorkspace { workspace_id: String },
}

impl fmt::Display for Compensation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Compensation::DeleteWorkspace { workspace_id } => {
        write!(f, "delete_workspace({})", workspace_id)
      }
    }
  }
}

/// A request to run one workflow over a set of sequencing objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSubmission {
  pub submission_id: String,
  pub name: String,
  pub workflow_id: String,
  pub state: SubmissionState,
  /// Principal that created the submission.
  pub submitter: String,
  /// Sequencing object ids of single-end inputs.
  pub single_end_inputs: BTreeSet<String>,
  /// Sequencing object ids of paired-end inputs.
  pub paired_end_inputs: BTreeSet<String>,
  pub reference_file_id: Option<String>,
  pub parameters: ParameterSource,
  pub remote_workspace_id: Option<String>,
  /// Workflow input label -> remote dataset or collection id.
  #[serde(default)]
  pub remote_input_ids: BTreeMap<String, String>,
  pub remote_run_id: Option<String>,
  pub analysis_id: Option<String>,
  pub last_error: Option<String>,
  #[serde(default)]
  pub cancel_requested: bool,
  #[serde(default)]
  pub cleanup_state: CleanupState,
  #[serde(default)]
  pub compensations: Vec<Compensation>,
  pub created_at: DateTime<Utc>,
  pub modified_at: DateTime<Utc>,
}

impl AnalysisSubmission {
  /// Create a submission in state `New` with no inputs and default parameters.
  pub fn new(
    name: impl Into<String>,
    workflow_id: impl Into<String>,
    submitter: impl Into<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      submission_id: crate::new_id(),
      name: name.into(),
      workflow_id: workflow_id.into(),
      state: SubmissionState::New,
      submitter: submitter.into(),
      single_end_inputs: BTreeSet::new(),
      paired_end_inputs: BTreeSet::new(),
      reference_file_id: None,
      parameters: ParameterSource::Default,
      remote_workspace_id: None,
      remote_input_ids: BTreeMap::new(),
      remote_run_id: None,
      analysis_id: None,
      last_error: None,
      cancel_requested: false,
      cleanup_state: CleanupState::NotCleaned,
      compensations: Vec::new(),
      created_at: now,
      modified_at: now,
    }
  }

  pub fn with_single_end<I, S>(mut self, object_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .single_end_inputs
      .extend(object_ids.into_iter().map(Into::into));
    self
  }

  pub fn with_paired_end<I, S>(mut self, object_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .paired_end_inputs
      .extend(object_ids.into_iter().map(Into::into));
    self
  }

  pub fn with_reference(mut self, reference_file_id: impl Into<String>) -> Self {
    self.reference_file_id = Some(reference_file_id.into());
    self
  }

  pub fn with_parameters(mut self, parameters: ParameterSource) -> Self {
    self.parameters = parameters;
    self
  }

  /// All input sequencing object ids, single-end first.
  pub fn input_object_ids(&self) -> impl Iterator<Item = &String> {
    self
      .single_end_inputs
      .iter()
      .chain(self.paired_end_inputs.iter())
  }
}
