use seqflow_backend::BackendError;
use seqflow_registry::RegistryError;
use seqflow_store::StoreError;
use thiserror::Error;

/// A submission that cannot be prepared as submitted. Raised before any
/// remote call; the submission stays `New`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("submission has no sequencing inputs")]
  NoInputs,

  #[error("workflow {workflow_id} requires a reference file but none is attached")]
  MissingReference { workflow_id: String },

  #[error("sample {sample_id} contributes more than one sequencing object")]
  DuplicateSample { sample_id: String },

  #[error("workflow {workflow_id} does not accept {kind} input")]
  UnsupportedInput {
    workflow_id: String,
    kind: &'static str,
  },

  #[error("sequencing object {object_id} is not a {expected} read set")]
  InputKindMismatch {
    object_id: String,
    expected: &'static str,
  },

  #[error("sequencing object {object_id} does not exist")]
  UnknownInput { object_id: String },

  #[error("reference file {reference_id} does not exist")]
  UnknownReference { reference_id: String },

  #[error("workflow {workflow_id} accepts a single sample but {count} were given")]
  TooManySamples { workflow_id: String, count: usize },

  #[error("workflow {workflow_id} takes one sequencing object but {count} were given")]
  NotBatched { workflow_id: String, count: usize },

  #[error("unknown parameter '{name}' for workflow {workflow_id}")]
  UnknownParameter { workflow_id: String, name: String },

  #[error("parameter set {parameter_set_id} does not exist")]
  UnknownParameterSet { parameter_set_id: String },

  #[error("parameter set {parameter_set_id} belongs to workflow {owner}")]
  ParameterSetMismatch {
    parameter_set_id: String,
    owner: String,
  },
}

/// Failure of a stage function.
#[derive(Debug, Error)]
pub enum StageError {
  #[error("validation failed: {0}")]
  Validation(#[from] ValidationError),

  /// Retried on the next tick.
  #[error("transient backend failure: {message}")]
  TransientBackend { message: String },

  #[error("{message}")]
  TerminalBackend { message: String },

  /// The run's outputs do not match what the analysis type requires.
  #[error("output mismatch: {message}")]
  OutputMismatch { message: String },

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("registry error: {0}")]
  Registry(#[from] RegistryError),

  #[error("{message}")]
  Unexpected { message: String },
}

/// What the pipeline does with a submission after a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  /// Stay in `New` with the error recorded.
  Hold,
  /// Leave the state unchanged and try again next tick.
  Retry,
  /// Move to `Error`.
  Fail,
}

impl StageError {
  pub fn unexpected(message: impl Into<String>) -> Self {
    Self::Unexpected {
      message: message.into(),
    }
  }

  pub fn disposition(&self) -> Disposition {
    match self {
      StageError::Validation(_) => Disposition::Hold,
      StageError::TransientBackend { .. } | StageError::Store(_) => Disposition::Retry,
      StageError::TerminalBackend { .. }
      | StageError::OutputMismatch { .. }
      | StageError::Registry(_)
      | StageError::Unexpected { .. } => Disposition::Fail,
    }
  }
}

impl From<BackendError> for StageError {
  fn from(err: BackendError) -> Self {
    if err.is_transient() {
      StageError::TransientBackend {
        message: err.to_string(),
      }
    } else {
      StageError::TerminalBackend {
        message: err.to_string(),
      }
    }
  }
}

/// Failure of a sample updater. Logged, never escalated.
#[derive(Debug, Error)]
pub enum UpdaterError {
  #[error("analysis has no output for role '{role}'")]
  MissingOutput { role: String },

  #[error("malformed output: {message}")]
  Malformed { message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}
