use std::sync::Arc;

use futures::future::join_all;
use seqflow_config::{CleanupPolicy, EngineConfig};
use seqflow_model::{AnalysisSubmission, AuthContext, SubmissionState};
use seqflow_store::{Store, StoreError};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cleanup::claim_cutoff;
use crate::events::EventNotifier;
use crate::stages::{Pipeline, Stage};

/// Periodic driver that dispatches stage functions onto a bounded pool.
///
/// Each tick runs the stages in [`Stage::ORDER`]. Within a stage every
/// eligible submission gets its own task, and all of them are joined before
/// the next stage is scanned.
pub struct Scheduler<N: EventNotifier + 'static> {
  pipeline: Arc<Pipeline<N>>,
  config: EngineConfig,
  semaphore: Arc<Semaphore>,
}

impl<N: EventNotifier + 'static> Scheduler<N> {
  pub fn new(pipeline: Arc<Pipeline<N>>, config: EngineConfig) -> Self {
    let semaphore = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
    Self {
      pipeline,
      config,
      semaphore,
    }
  }

  pub fn pipeline(&self) -> &Arc<Pipeline<N>> {
    &self.pipeline
  }

  /// Tick until `cancel` fires.
  pub async fn run(&self, cancel: CancellationToken) {
    info!(
      poll_interval_seconds = self.config.poll_interval_seconds,
      batch_size = self.config.batch_size,
      worker_pool_size = self.config.worker_pool_size,
      "scheduler_started"
    );
    if self.config.cleanup_policy == CleanupPolicy::Never {
      warn!("cleanup_disabled: remote workspaces of finished submissions will be kept");
    }

    let mut ticker = interval(self.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("scheduler_stopped");
          break;
        }
        _ = ticker.tick() => {
          let dispatched = self.tick().await;
          debug!(dispatched, "scheduler_tick");
        }
      }
    }
  }

  /// Run every stage once. Returns the number of tasks dispatched.
  pub async fn tick(&self) -> usize {
    let mut dispatched = 0;
    for stage in Stage::ORDER {
      dispatched += self.run_stage(stage).await;
    }
    dispatched
  }

  async fn run_stage(&self, stage: Stage) -> usize {
    let submissions = match self.candidates(stage).await {
      Ok(submissions) => submissions,
      Err(e) => {
        error!(stage = stage.as_str(), error = %e, "stage_scan_failed");
        return 0;
      }
    };
    if submissions.is_empty() {
      return 0;
    }

    let mut handles = Vec::with_capacity(submissions.len());
    for submission in submissions {
      let permit = match self.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => break,
      };
      let pipeline = self.pipeline.clone();
      let submission_id = submission.submission_id;
      let task_id = submission_id.clone();
      let span = info_span!("stage_task", stage = stage.as_str(), submission_id = %submission_id);

      let handle = tokio::spawn(
        async move {
          let _permit = permit;
          let auth = AuthContext::system();
          pipeline.run_stage(stage, &auth, &task_id).await
        }
        .instrument(span),
      );
      handles.push(async move { (submission_id, handle.await) });
    }

    let count = handles.len();
    for (submission_id, result) in join_all(handles).await {
      match result {
        Ok(Ok(())) => {}
        // Dispositions were applied inside the stage.
        Ok(Err(e)) => {
          debug!(stage = stage.as_str(), submission_id = %submission_id, error = %e, "stage_failed");
        }
        Err(join_error) => self.task_aborted(stage, &submission_id, join_error).await,
      }
    }
    count
  }

  /// A stage task panicked or was cancelled: fail its submission and carry on.
  async fn task_aborted(&self, stage: Stage, submission_id: &str, join_error: JoinError) {
    let message = if join_error.is_panic() {
      let payload = join_error.into_panic();
      if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
      } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
      } else {
        "stage task panicked".to_string()
      }
    } else {
      "stage task was cancelled".to_string()
    };

    error!(
      stage = stage.as_str(),
      submission_id = %submission_id,
      error = %message,
      "stage_task_aborted"
    );
    if let Err(e) = self.pipeline.fail_submission(submission_id, &message).await {
      error!(submission_id = %submission_id, error = %e, "stage_failure_not_recorded");
    }
  }

  /// Submissions `stage` should run for this tick, at most `batch_size`.
  async fn candidates(&self, stage: Stage) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let store = self.pipeline.store();
    let limit = self.config.batch_size;

    let states: &[SubmissionState] = match stage {
      Stage::Prepare => &[SubmissionState::New],
      Stage::Submit => &[SubmissionState::Preparing],
      Stage::Monitor => &[SubmissionState::Submitted, SubmissionState::Running],
      Stage::Transfer => &[SubmissionState::FinishedRunning, SubmissionState::Completing],
      Stage::Cleanup => {
        if self.config.cleanup_policy == CleanupPolicy::Never {
          return Ok(Vec::new());
        }
        let mut submissions = store.find_cleanup_candidates(limit).await?;
        let remaining = limit.saturating_sub(submissions.len());
        if remaining > 0 {
          let cutoff = claim_cutoff(self.config.cleanup_claim_timeout());
          submissions.extend(store.find_stale_cleanups(cutoff, remaining).await?);
        }
        return Ok(submissions);
      }
    };
    store.find_schedulable(states, limit).await
  }
}
