use seqflow_backend::RunStatus;

use crate::error::StageError;

const RUNNING_STATES: &[&str] = &[
  "new",
  "upload",
  "queued",
  "running",
  "paused",
  "setting_metadata",
  "resubmitted",
];
const ERROR_STATES: &[&str] = &["error", "failed_metadata", "empty", "discarded"];
const OK_STATE: &str = "ok";

/// Where a run stands, in pipeline terms.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
  /// `progress` is the share of items already `ok`.
  Running { progress: f64 },
  Finished,
  Failed { message: String },
}

/// Map the backend's status vocabulary onto a [`RunPhase`].
pub fn classify_run_status(status: &RunStatus) -> Result<RunPhase, StageError> {
  let state = status.state.as_str();
  let failed_items: usize = ERROR_STATES.iter().map(|s| status.items_in(s)).sum();

  if ERROR_STATES.contains(&state) || failed_items > 0 {
    let message = status.message.clone().unwrap_or_else(|| {
      if failed_items > 0 {
        format!("workflow run has {} failed item(s)", failed_items)
      } else {
        format!("workflow run ended in state '{}'", state)
      }
    });
    return Ok(RunPhase::Failed { message });
  }
  if state == OK_STATE {
    return Ok(RunPhase::Finished);
  }
  if RUNNING_STATES.contains(&state) {
    return Ok(RunPhase::Running {
      progress: progress(status),
    });
  }

  Err(StageError::TerminalBackend {
    message: format!("unknown workflow run state '{}'", state),
  })
}

fn progress(status: &RunStatus) -> f64 {
  let total = status.item_count();
  if total == 0 {
    return 0.0;
  }
  status.items_in(OK_STATE) as f64 / total as f64
}
