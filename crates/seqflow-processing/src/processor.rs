use async_trait::async_trait;
use seqflow_model::AuthContext;

use crate::ProcessorError;

/// Per-launch context handed to every processor in the chain.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
  /// Caller the chain runs on behalf of.
  pub auth: AuthContext,
  pub object_id: String,
}

/// One step of the file processing chain.
#[async_trait]
pub trait FileProcessor: Send + Sync {
  fn name(&self) -> &str;

  /// Whether the processor rewrites file contents. A failing modifying
  /// processor always aborts the chain.
  fn modifies_file(&self) -> bool;

  async fn should_process(&self, _ctx: &ProcessingContext) -> Result<bool, ProcessorError> {
    Ok(true)
  }

  async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError>;
}
