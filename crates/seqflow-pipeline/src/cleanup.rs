use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use seqflow_backend::{BackendError, ExecutionBackend};
use seqflow_model::{AnalysisSubmission, CleanupState, Compensation};
use seqflow_store::{Store, StoreError};
use tracing::{info, warn};

/// Executes the compensations registered on a submission.
pub struct CleanupHandler {
  store: Arc<dyn Store>,
  backend: Arc<dyn ExecutionBackend>,
  claim_timeout: Duration,
}

impl CleanupHandler {
  pub fn new(
    store: Arc<dyn Store>,
    backend: Arc<dyn ExecutionBackend>,
    claim_timeout: Duration,
  ) -> Self {
    Self {
      store,
      backend,
      claim_timeout,
    }
  }

  /// Claims taken before this instant are considered abandoned.
  pub fn stale_claim_cutoff(&self) -> DateTime<Utc> {
    claim_cutoff(self.claim_timeout)
  }

  /// Claim the submission and release its remote resources.
  ///
  /// A `Cleaning` claim older than the claim timeout is taken over. Returns
  /// `None` if another task holds a live claim. Compensation failures end
  /// in `CleaningError` and are not escalated.
  pub async fn run(
    &self,
    submission: &AnalysisSubmission,
  ) -> Result<Option<CleanupState>, StoreError> {
    let id = &submission.submission_id;
    let claimed = match submission.cleanup_state {
      CleanupState::NotCleaned => {
        self
          .store
          .compare_and_set_cleanup_state(id, CleanupState::NotCleaned, CleanupState::Cleaning)
          .await?
      }
      CleanupState::Cleaning => {
        let reclaimed = self
          .store
          .reclaim_cleanup(id, self.stale_claim_cutoff())
          .await?;
        if reclaimed {
          warn!(submission_id = %id, "stale_cleanup_claim_reclaimed");
        }
        reclaimed
      }
      CleanupState::Cleaned | CleanupState::CleaningError => false,
    };
    if !claimed {
      return Ok(None);
    }

    let mut failed = 0;
    for compensation in &submission.compensations {
      if let Err(e) = self.compensate(compensation).await {
        failed += 1;
        warn!(
          submission_id = %id,
          compensation = %compensation,
          error = %e,
          "compensation_failed"
        );
      }
    }

    let outcome = if failed == 0 {
      CleanupState::Cleaned
    } else {
      CleanupState::CleaningError
    };
    self
      .store
      .compare_and_set_cleanup_state(id, CleanupState::Cleaning, outcome)
      .await?;
    info!(
      submission_id = %id,
      compensations = submission.compensations.len(),
      failed,
      cleanup_state = outcome.as_str(),
      "submission_cleaned"
    );
    Ok(Some(outcome))
  }

  async fn compensate(&self, compensation: &Compensation) -> Result<(), BackendError> {
    match compensation {
      Compensation::DeleteWorkspace { workspace_id } => {
        match self.backend.delete_workspace(workspace_id).await {
          // Already gone counts as released.
          Ok(()) | Err(BackendError::NotFound { .. }) => Ok(()),
          Err(e) => Err(e),
        }
      }
    }
  }
}

pub(crate) fn claim_cutoff(timeout: Duration) -> DateTime<Utc> {
  let age = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
  Utc::now()
    .checked_sub_signed(age)
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
