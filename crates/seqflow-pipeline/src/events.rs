//! Pipeline events and notifiers for observability.
//!
//! Events are emitted after every committed state change, so consumers can
//! follow submissions without polling the store.

use seqflow_model::{CleanupState, SubmissionState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while driving submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
  /// A compare-and-set transition committed.
  StateChanged {
    submission_id: String,
    from: SubmissionState,
    to: SubmissionState,
  },

  /// Preparation refused the submission; it stays `New`.
  ValidationFailed {
    submission_id: String,
    error: String,
  },

  /// Share of workflow items finished, 0.0 to 1.0.
  Progress { submission_id: String, progress: f64 },

  /// The cleanup handler finished with the given outcome.
  CleanupFinished {
    submission_id: String,
    cleanup_state: CleanupState,
  },
}

/// Receives pipeline events.
///
/// The pipeline calls `notify` for each event; implementations decide what
/// to do with them.
pub trait EventNotifier: Send + Sync {
  fn notify(&self, event: PipelineEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
  fn notify(&self, _event: PipelineEvent) {}
}

/// Sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a stage; volume is a handful of
/// events per submission.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<PipelineEvent>) -> Self {
    Self { sender }
  }
}

impl EventNotifier for ChannelNotifier {
  fn notify(&self, event: PipelineEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
