use std::collections::BTreeMap;

use chrono::Utc;
use seqflow_model::{AnalysisSubmission, Compensation, SubmissionState};

use crate::StoreError;

/// Field changes written together with a state transition.
///
/// `None` leaves a field untouched; compensations are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionUpdate {
  pub remote_workspace_id: Option<String>,
  pub remote_input_ids: Option<BTreeMap<String, String>>,
  pub remote_run_id: Option<String>,
  pub last_error: Option<String>,
  pub compensations: Vec<Compensation>,
}

impl SubmissionUpdate {
  pub fn workspace(mut self, workspace_id: impl Into<String>) -> Self {
    self.remote_workspace_id = Some(workspace_id.into());
    self
  }

  pub fn input_ids(mut self, ids: BTreeMap<String, String>) -> Self {
    self.remote_input_ids = Some(ids);
    self
  }

  pub fn run(mut self, run_id: impl Into<String>) -> Self {
    self.remote_run_id = Some(run_id.into());
    self
  }

  pub fn error(mut self, message: impl Into<String>) -> Self {
    self.last_error = Some(message.into());
    self
  }

  pub fn compensate(mut self, compensation: Compensation) -> Self {
    self.compensations.push(compensation);
    self
  }

  pub(crate) fn apply(&self, submission: &mut AnalysisSubmission) {
    if let Some(ws) = &self.remote_workspace_id {
      submission.remote_workspace_id = Some(ws.clone());
    }
    if let Some(ids) = &self.remote_input_ids {
      submission.remote_input_ids = ids.clone();
    }
    if let Some(run) = &self.remote_run_id {
      submission.remote_run_id = Some(run.clone());
    }
    if let Some(err) = &self.last_error {
      submission.last_error = Some(err.clone());
    }
    for c in &self.compensations {
      if !submission.compensations.contains(c) {
        submission.compensations.push(c.clone());
      }
    }
  }
}

/// Shared compare-and-set logic for both store implementations.
///
/// Returns `Ok(false)` if the submission is not in `expected`.
pub(crate) fn apply_transition(
  submission: &mut AnalysisSubmission,
  expected: SubmissionState,
  next: SubmissionState,
  update: &SubmissionUpdate,
) -> Result<bool, StoreError> {
  if expected != next && !expected.can_transition_to(next) {
    return Err(StoreError::InvalidTransition {
      from: expected,
      to: next,
    });
  }
  if submission.state != expected {
    return Ok(false);
  }
  // A workspace handle is only ever set once.
  if let (Some(current), Some(new)) = (
    &submission.remote_workspace_id,
    &update.remote_workspace_id,
  ) && current != new
  {
    return Ok(false);
  }

  submission.state = next;
  update.apply(submission);
  submission.modified_at = Utc::now();
  Ok(true)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_skip_rejected() {
    let mut sub = AnalysisSubmission::new("s", "wf", "alice");
    let err = apply_transition(
      &mut sub,
      SubmissionState::New,
      SubmissionState::Submitted,
      &SubmissionUpdate::default(),
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
    assert_eq!(sub.state, SubmissionState::New);
  }

  #[test]
  fn test_stale_expected_state_is_noop() {
    let mut sub = AnalysisSubmission::new("s", "wf", "alice");
    sub.state = SubmissionState::Preparing;
    let applied = apply_transition(
      &mut sub,
      SubmissionState::New,
      SubmissionState::Preparing,
      &SubmissionUpdate::default().workspace("ws-1"),
    )
    .unwrap();
    assert!(!applied);
    assert!(sub.remote_workspace_id.is_none());
  }

  #[test]
  fn test_second_workspace_refused() {
    let mut sub = AnalysisSubmission::new("s", "wf", "alice");
    sub.remote_workspace_id = Some("ws-1".to_string());
    let applied = apply_transition(
      &mut sub,
      SubmissionState::New,
      SubmissionState::Preparing,
      &SubmissionUpdate::default().workspace("ws-2"),
    )
    .unwrap();
    assert!(!applied);
    assert_eq!(sub.remote_workspace_id.as_deref(), Some("ws-1"));
  }

  #[test]
  fn test_compensations_appended_once() {
    let mut sub = AnalysisSubmission::new("s", "wf", "alice");
    let comp = Compensation::DeleteWorkspace {
      workspace_id: "ws-1".to_string(),
    };
    let update = SubmissionUpdate::default().compensate(comp.clone());
    update.apply(&mut sub);
    update.apply(&mut sub);
    assert_eq!(sub.compensations, vec![comp]);
  }
}
