use thiserror::Error;

/// Classified failure of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
  /// The call may succeed if repeated (timeouts, 5xx, rate limiting).
  #[error("transient backend failure: {message}")]
  Transient { message: String },

  /// The backend refused the request permanently.
  #[error("backend rejected request: {message}")]
  Rejected { message: String },

  #[error("not found: {resource}")]
  NotFound { resource: String },

  #[error("operation not supported: {operation}")]
  Unsupported { operation: &'static str },
}

impl BackendError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self::Transient {
      message: message.into(),
    }
  }

  pub fn rejected(message: impl Into<String>) -> Self {
    Self::Rejected {
      message: message.into(),
    }
  }

  pub fn not_found(resource: impl Into<String>) -> Self {
    Self::NotFound {
      resource: resource.into(),
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, BackendError::Transient { .. })
  }
}

impl From<std::io::Error> for BackendError {
  fn from(err: std::io::Error) -> Self {
    BackendError::transient(format!("io error: {}", err))
  }
}
