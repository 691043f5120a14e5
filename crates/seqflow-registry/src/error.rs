use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("workflow not found: {workflow_id}")]
  NotFound { workflow_id: String },

  #[error("unknown analysis type: {analysis_type}")]
  UnknownAnalysisType { analysis_type: String },

  #[error("invalid workflow description '{workflow_id}': {message}")]
  Invalid {
    workflow_id: String,
    message: String,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("parse error: {0}")]
  Parse(#[from] serde_json::Error),
}
