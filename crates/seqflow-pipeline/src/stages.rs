//! Stage functions driving a submission through its lifecycle.
//!
//! Each stage reads the submission, does its remote work, then commits the
//! result with a compare-and-set on the state it read. A stage that loses the
//! race discards its result. Failures are mapped to a [`Disposition`] and
//! applied to the submission before the error is returned to the caller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use seqflow_backend::ExecutionBackend;
use seqflow_config::EngineConfig;
use seqflow_model::{
  Analysis, AnalysisSubmission, AuthContext, CleanupState, Compensation, SubmissionState,
};
use seqflow_registry::{WorkflowDescription, WorkflowRegistry};
use seqflow_store::{Store, SubmissionUpdate, needs_cleanup};
use tracing::{debug, error, info, instrument, warn};

use crate::cleanup::CleanupHandler;
use crate::error::{Disposition, StageError};
use crate::events::{EventNotifier, NoopNotifier, PipelineEvent};
use crate::invoker::WorkflowInvoker;
use crate::monitor::{RunPhase, classify_run_status};
use crate::transfer::ResultTransfer;
use crate::updater::SampleUpdaterRegistry;
use crate::workspace::{PreparedWorkspace, WorkspaceBuilder};

/// One of the functions the scheduler dispatches per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  Prepare,
  Submit,
  Monitor,
  Transfer,
  Cleanup,
}

impl Stage {
  /// Order in which a tick runs the stages.
  pub const ORDER: [Stage; 5] = [
    Stage::Prepare,
    Stage::Submit,
    Stage::Monitor,
    Stage::Transfer,
    Stage::Cleanup,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Stage::Prepare => "prepare",
      Stage::Submit => "submit",
      Stage::Monitor => "monitor",
      Stage::Transfer => "transfer",
      Stage::Cleanup => "cleanup",
    }
  }
}

/// The submission pipeline.
///
/// Generic over `N: EventNotifier` like the engine it is driven by. Use
/// `Pipeline::new()` to discard events or `Pipeline::with_notifier()` to
/// observe them.
pub struct Pipeline<N: EventNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  backend: Arc<dyn ExecutionBackend>,
  registry: Arc<dyn WorkflowRegistry>,
  builder: WorkspaceBuilder,
  invoker: WorkflowInvoker,
  transfer: ResultTransfer,
  cleanup: CleanupHandler,
  updaters: SampleUpdaterRegistry,
  notifier: N,
}

impl Pipeline<NoopNotifier> {
  pub fn new(
    store: Arc<dyn Store>,
    backend: Arc<dyn ExecutionBackend>,
    registry: Arc<dyn WorkflowRegistry>,
    config: &EngineConfig,
  ) -> Self {
    Self::with_notifier(store, backend, registry, config, NoopNotifier)
  }
}

impl<N: EventNotifier> Pipeline<N> {
  pub fn with_notifier(
    store: Arc<dyn Store>,
    backend: Arc<dyn ExecutionBackend>,
    registry: Arc<dyn WorkflowRegistry>,
    config: &EngineConfig,
    notifier: N,
  ) -> Self {
    Self {
      builder: WorkspaceBuilder::new(store.clone(), backend.clone()),
      invoker: WorkflowInvoker::new(store.clone(), backend.clone()),
      transfer: ResultTransfer::new(backend.clone(), registry.clone(), config.work_dir.clone()),
      cleanup: CleanupHandler::new(store.clone(), backend.clone(), config.cleanup_claim_timeout()),
      updaters: SampleUpdaterRegistry::from_config(store.clone(), &config.sample_updaters),
      store,
      backend,
      registry,
      notifier,
    }
  }

  /// Replace the sample updaters built from the configuration.
  pub fn with_updaters(mut self, updaters: SampleUpdaterRegistry) -> Self {
    self.updaters = updaters;
    self
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Directory outputs of `submission_id` are downloaded into.
  pub fn output_dir(&self, submission_id: &str) -> PathBuf {
    self.transfer.output_dir(submission_id)
  }

  /// Run `stage` for one submission.
  pub async fn run_stage(
    &self,
    stage: Stage,
    auth: &AuthContext,
    submission_id: &str,
  ) -> Result<(), StageError> {
    match stage {
      Stage::Prepare => self.prepare(auth, submission_id).await,
      Stage::Submit => self.submit(auth, submission_id).await,
      Stage::Monitor => self.monitor(auth, submission_id).await,
      Stage::Transfer => self.transfer(auth, submission_id).await,
      Stage::Cleanup => self.cleanup(auth, submission_id).await,
    }
  }

  /// Validate a `New` submission, build its workspace and start its run.
  ///
  /// Validation errors are returned to the caller and recorded on the
  /// submission, which stays `New`.
  #[instrument(
    name = "stage_prepare",
    skip(self, auth),
    fields(principal = %auth.principal)
  )]
  pub async fn prepare(&self, auth: &AuthContext, submission_id: &str) -> Result<(), StageError> {
    let result = self.prepare_inner(submission_id).await;
    self.settle(Stage::Prepare, submission_id, result).await
  }

  /// Retry starting the run of a `Preparing` submission.
  #[instrument(
    name = "stage_submit",
    skip(self, auth),
    fields(principal = %auth.principal)
  )]
  pub async fn submit(&self, auth: &AuthContext, submission_id: &str) -> Result<(), StageError> {
    let result = self.submit_inner(submission_id).await;
    self.settle(Stage::Submit, submission_id, result).await
  }

  /// Poll the run of a `Submitted` or `Running` submission once.
  #[instrument(
    name = "stage_monitor",
    skip(self, auth),
    fields(principal = %auth.principal)
  )]
  pub async fn monitor(&self, auth: &AuthContext, submission_id: &str) -> Result<(), StageError> {
    let result = self.monitor_inner(submission_id).await;
    self.settle(Stage::Monitor, submission_id, result).await
  }

  /// Download the outputs of a finished run and complete the submission.
  #[instrument(
    name = "stage_transfer",
    skip(self, auth),
    fields(principal = %auth.principal)
  )]
  pub async fn transfer(&self, auth: &AuthContext, submission_id: &str) -> Result<(), StageError> {
    let result = self.transfer_inner(submission_id).await;
    self.settle(Stage::Transfer, submission_id, result).await
  }

  /// Release the remote resources of a terminal or cancelled submission.
  ///
  /// Never moves the submission's lifecycle state.
  #[instrument(
    name = "stage_cleanup",
    skip(self, auth),
    fields(principal = %auth.principal)
  )]
  pub async fn cleanup(&self, auth: &AuthContext, submission_id: &str) -> Result<(), StageError> {
    let submission = self.store.get_submission(submission_id).await?;
    if !needs_cleanup(&submission) && submission.cleanup_state != CleanupState::Cleaning {
      return Ok(());
    }
    match self.cleanup.run(&submission).await {
      Ok(Some(cleanup_state)) => {
        self.notifier.notify(PipelineEvent::CleanupFinished {
          submission_id: submission_id.to_string(),
          cleanup_state,
        });
        Ok(())
      }
      Ok(None) => Ok(()),
      Err(e) => {
        warn!(submission_id = %submission_id, error = %e, "cleanup_store_failed");
        Err(e.into())
      }
    }
  }

  /// Move a submission to `Error` from whatever non-terminal state it is in.
  ///
  /// Returns whether this call made the transition.
  pub async fn fail_submission(
    &self,
    submission_id: &str,
    message: &str,
  ) -> Result<bool, StageError> {
    let submission = self.store.get_submission(submission_id).await?;
    if submission.state.is_terminal() {
      return Ok(false);
    }
    let failed = self
      .store
      .transition(
        submission_id,
        submission.state,
        SubmissionState::Error,
        SubmissionUpdate::default().error(message),
      )
      .await?;
    if failed {
      error!(
        submission_id = %submission_id,
        from = %submission.state,
        error = %message,
        "submission_failed"
      );
      self.notifier.notify(PipelineEvent::StateChanged {
        submission_id: submission_id.to_string(),
        from: submission.state,
        to: SubmissionState::Error,
      });
    }
    Ok(failed)
  }

  /// Apply the failure disposition of a stage result and hand it back.
  async fn settle(
    &self,
    stage: Stage,
    submission_id: &str,
    result: Result<(), StageError>,
  ) -> Result<(), StageError> {
    let Err(err) = result else {
      return Ok(());
    };

    let applied = match err.disposition() {
      Disposition::Retry => {
        warn!(
          submission_id = %submission_id,
          stage = stage.as_str(),
          error = %err,
          "stage_retry"
        );
        Ok(())
      }
      Disposition::Hold => self.hold(stage, submission_id, &err).await,
      Disposition::Fail => self
        .fail_submission(submission_id, &err.to_string())
        .await
        .map(|_| ()),
    };
    if let Err(e) = applied {
      error!(
        submission_id = %submission_id,
        stage = stage.as_str(),
        error = %e,
        "stage_failure_not_recorded"
      );
    }
    Err(err)
  }

  /// Record a validation failure on a `New` submission.
  async fn hold(
    &self,
    stage: Stage,
    submission_id: &str,
    err: &StageError,
  ) -> Result<(), StageError> {
    let message = err.to_string();
    let held = self
      .store
      .update_submission(
        submission_id,
        SubmissionState::New,
        SubmissionUpdate::default().error(message.clone()),
      )
      .await?;
    if !held {
      // Past New a validation failure cannot be fixed by the submitter.
      self.fail_submission(submission_id, &message).await?;
      return Ok(());
    }

    warn!(
      submission_id = %submission_id,
      stage = stage.as_str(),
      error = %message,
      "submission_invalid"
    );
    self.notifier.notify(PipelineEvent::ValidationFailed {
      submission_id: submission_id.to_string(),
      error: message,
    });
    Ok(())
  }

  /// Compare-and-set `from -> to`, announcing the change if it committed.
  async fn advance(
    &self,
    submission_id: &str,
    from: SubmissionState,
    to: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StageError> {
    let moved = self
      .store
      .transition(submission_id, from, to, update)
      .await?;
    if moved {
      info!(
        submission_id = %submission_id,
        from = %from,
        to = %to,
        "submission_state_changed"
      );
      self.notifier.notify(PipelineEvent::StateChanged {
        submission_id: submission_id.to_string(),
        from,
        to,
      });
    } else {
      debug!(
        submission_id = %submission_id,
        from = %from,
        to = %to,
        "transition_lost"
      );
    }
    Ok(moved)
  }

  /// Re-read the submission and report whether it was cancelled meanwhile.
  async fn cancelled(&self, submission_id: &str) -> Result<bool, StageError> {
    let submission = self.store.get_submission(submission_id).await?;
    if submission.cancel_requested {
      info!(submission_id = %submission_id, state = %submission.state, "stage_result_discarded");
    }
    Ok(submission.cancel_requested)
  }

  async fn load(
    &self,
    submission_id: &str,
    expected: &[SubmissionState],
  ) -> Result<Option<AnalysisSubmission>, StageError> {
    let submission = self.store.get_submission(submission_id).await?;
    if !expected.contains(&submission.state) {
      debug!(
        submission_id = %submission_id,
        state = %submission.state,
        "stage_skipped_stale_state"
      );
      return Ok(None);
    }
    if submission.cancel_requested {
      debug!(submission_id = %submission_id, "stage_skipped_cancelled");
      return Ok(None);
    }
    Ok(Some(submission))
  }

  async fn prepare_inner(&self, submission_id: &str) -> Result<(), StageError> {
    let Some(submission) = self.load(submission_id, &[SubmissionState::New]).await? else {
      return Ok(());
    };

    let workflow = self.registry.resolve(&submission.workflow_id).await?;
    let inputs = self.builder.validate(&submission, &workflow).await?;
    let parameters = self
      .invoker
      .resolve_parameters(&submission.parameters, &workflow)
      .await?;

    let workspace = self.builder.build(&submission, &workflow, &inputs).await?;

    match self.claim_workspace(submission_id, &workspace).await {
      Ok(true) => {}
      Ok(false) => {
        self.builder.discard(&workspace.workspace_id).await;
        return Ok(());
      }
      Err(e) => {
        self.builder.discard(&workspace.workspace_id).await;
        return Err(e);
      }
    }

    info!(
      submission_id = %submission_id,
      workspace_id = %workspace.workspace_id,
      objects = inputs.object_count(),
      "submission_prepared"
    );
    self
      .start_run(submission_id, &workflow, &workspace, parameters)
      .await
  }

  /// Move `New -> Preparing` recording the workspace and its compensation.
  /// Returns false if the submission was cancelled or taken by another task.
  async fn claim_workspace(
    &self,
    submission_id: &str,
    workspace: &PreparedWorkspace,
  ) -> Result<bool, StageError> {
    if self.cancelled(submission_id).await? {
      return Ok(false);
    }
    let update = SubmissionUpdate::default()
      .workspace(workspace.workspace_id.clone())
      .input_ids(workspace.input_ids.clone())
      .compensate(Compensation::DeleteWorkspace {
        workspace_id: workspace.workspace_id.clone(),
      });
    self
      .advance(
        submission_id,
        SubmissionState::New,
        SubmissionState::Preparing,
        update,
      )
      .await
  }

  async fn submit_inner(&self, submission_id: &str) -> Result<(), StageError> {
    let Some(submission) = self
      .load(submission_id, &[SubmissionState::Preparing])
      .await?
    else {
      return Ok(());
    };
    let workspace_id = submission
      .remote_workspace_id
      .clone()
      .ok_or_else(|| StageError::unexpected("preparing submission has no workspace"))?;

    let workflow = self.registry.resolve(&submission.workflow_id).await?;
    let parameters = self
      .invoker
      .resolve_parameters(&submission.parameters, &workflow)
      .await?;
    let workspace = PreparedWorkspace {
      workspace_id,
      input_ids: submission.remote_input_ids.clone(),
    };
    self
      .start_run(submission_id, &workflow, &workspace, parameters)
      .await
  }

  async fn start_run(
    &self,
    submission_id: &str,
    workflow: &WorkflowDescription,
    workspace: &PreparedWorkspace,
    parameters: BTreeMap<String, serde_json::Value>,
  ) -> Result<(), StageError> {
    if self.cancelled(submission_id).await? {
      return Ok(());
    }
    let run_id = self
      .invoker
      .invoke(submission_id, workflow, workspace, parameters)
      .await?;
    // The run exists remotely from here on: an unrecorded run is never
    // retried, it fails the submission and goes away with the workspace.
    match self
      .advance(
        submission_id,
        SubmissionState::Preparing,
        SubmissionState::Submitted,
        SubmissionUpdate::default().run(run_id.clone()),
      )
      .await
    {
      Ok(_) => Ok(()),
      Err(e) => Err(StageError::unexpected(format!(
        "run {} started but not recorded: {}",
        run_id, e
      ))),
    }
  }

  async fn monitor_inner(&self, submission_id: &str) -> Result<(), StageError> {
    let Some(submission) = self
      .load(
        submission_id,
        &[SubmissionState::Submitted, SubmissionState::Running],
      )
      .await?
    else {
      return Ok(());
    };
    let run_id = submission
      .remote_run_id
      .as_deref()
      .ok_or_else(|| StageError::unexpected("submitted submission has no run id"))?;

    let status = self.backend.get_run_status(run_id).await?;
    let phase = classify_run_status(&status)?;

    match phase {
      RunPhase::Failed { message } => Err(StageError::TerminalBackend { message }),
      RunPhase::Running { progress } => {
        if submission.state == SubmissionState::Submitted {
          self
            .advance(
              submission_id,
              SubmissionState::Submitted,
              SubmissionState::Running,
              SubmissionUpdate::default(),
            )
            .await?;
        }
        debug!(
          submission_id = %submission_id,
          run_state = %status.state,
          progress,
          "submission_progress"
        );
        self.notifier.notify(PipelineEvent::Progress {
          submission_id: submission_id.to_string(),
          progress,
        });
        Ok(())
      }
      RunPhase::Finished => {
        if submission.state == SubmissionState::Submitted
          && !self
            .advance(
              submission_id,
              SubmissionState::Submitted,
              SubmissionState::Running,
              SubmissionUpdate::default(),
            )
            .await?
        {
          return Ok(());
        }
        self
          .advance(
            submission_id,
            SubmissionState::Running,
            SubmissionState::FinishedRunning,
            SubmissionUpdate::default(),
          )
          .await?;
        Ok(())
      }
    }
  }

  async fn transfer_inner(&self, submission_id: &str) -> Result<(), StageError> {
    let Some(submission) = self
      .load(
        submission_id,
        &[SubmissionState::FinishedRunning, SubmissionState::Completing],
      )
      .await?
    else {
      return Ok(());
    };

    let workflow = self.registry.resolve(&submission.workflow_id).await?;
    let analysis = self.transfer.collect(&submission, &workflow).await?;

    if self.cancelled(submission_id).await? {
      return Ok(());
    }
    if submission.state == SubmissionState::FinishedRunning
      && !self
        .advance(
          submission_id,
          SubmissionState::FinishedRunning,
          SubmissionState::Completing,
          SubmissionUpdate::default(),
        )
        .await?
    {
      return Ok(());
    }

    if !self
      .store
      .complete_submission(submission_id, &analysis)
      .await?
    {
      debug!(submission_id = %submission_id, "completion_lost");
      return Ok(());
    }
    info!(
      submission_id = %submission_id,
      analysis_id = %analysis.analysis_id,
      analysis_type = %analysis.analysis_type,
      outputs = analysis.outputs.len(),
      "submission_completed"
    );
    self.notifier.notify(PipelineEvent::StateChanged {
      submission_id: submission_id.to_string(),
      from: SubmissionState::Completing,
      to: SubmissionState::Completed,
    });

    self.update_samples(&submission, &analysis).await;
    Ok(())
  }

  /// Run the sample updater registered for the analysis type, if any.
  /// Failures are logged only; the submission is already complete.
  async fn update_samples(&self, submission: &AnalysisSubmission, analysis: &Analysis) {
    let Some(updater) = self.updaters.get(&analysis.analysis_type) else {
      return;
    };

    let mut sample_ids = Vec::new();
    for object_id in submission.input_object_ids() {
      match self.store.get_sequencing_object(object_id).await {
        Ok(object) => sample_ids.push(object.sample_id),
        Err(e) => {
          warn!(
            submission_id = %submission.submission_id,
            object_id = %object_id,
            error = %e,
            "sample_lookup_failed"
          );
        }
      }
    }

    if let Err(e) = updater.update(&sample_ids, analysis).await {
      warn!(
        submission_id = %submission.submission_id,
        analysis_type = %analysis.analysis_type,
        error = %e,
        "sample_update_failed"
      );
    }
  }
}
