use std::sync::Arc;

use seqflow_model::AuthContext;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use crate::{ChainError, FileProcessingChain, ProcessorFailure};

/// Runs processing chains on a bounded pool, separate from the caller and
/// from the scheduler's stage workers.
pub struct ProcessingLauncher {
  chain: Arc<FileProcessingChain>,
  permits: Arc<Semaphore>,
}

impl ProcessingLauncher {
  pub fn new(chain: Arc<FileProcessingChain>, pool_size: usize) -> Self {
    Self {
      chain,
      permits: Arc::new(Semaphore::new(pool_size.max(1))),
    }
  }

  /// Start the chain for `object_id` in the background.
  ///
  /// `auth` is moved into the task and dropped when the chain finishes.
  pub fn launch(
    &self,
    auth: AuthContext,
    object_id: String,
  ) -> JoinHandle<Result<Vec<ProcessorFailure>, ChainError>> {
    let chain = Arc::clone(&self.chain);
    let permits = Arc::clone(&self.permits);
    let span = info_span!(
      "processing_task",
      object_id = %object_id,
      principal = %auth.principal,
    );

    tokio::spawn(
      async move {
        let _permit = permits
          .acquire_owned()
          .await
          .map_err(|_| ChainError::PoolClosed)?;
        chain.launch_chain(&auth, &object_id).await
      }
      .instrument(span),
    )
  }
}
