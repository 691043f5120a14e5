use seqflow_store::StoreError;
use thiserror::Error;

/// Failure of a single processor.
#[derive(Debug, Error)]
pub enum ProcessorError {
  #[error("{message}")]
  Failed { message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

impl ProcessorError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }
}

/// A processor failure the chain recorded and continued past.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorFailure {
  pub processor: String,
  pub message: String,
}

#[derive(Debug, Error)]
pub enum ChainError {
  /// The object never became visible. No processor ran.
  #[error("sequencing object {object_id} not visible after {attempts} checks ({waited_ms}ms)")]
  Timeout {
    object_id: String,
    attempts: u32,
    waited_ms: u64,
  },

  #[error("processor '{processor}' failed: {source}")]
  Processor {
    processor: String,
    #[source]
    source: ProcessorError,
  },

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("processing pool closed")]
  PoolClosed,
}
