use std::sync::Arc;
use std::time::Duration;

use seqflow_config::EngineConfig;
use seqflow_model::{AuthContext, QcEntry};
use seqflow_store::Store;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{ChainError, FileProcessor, ProcessingContext, ProcessorFailure};

/// Ordered processors run once per uploaded sequencing object.
pub struct FileProcessingChain {
  store: Arc<dyn Store>,
  processors: Vec<Arc<dyn FileProcessor>>,
  poll_interval: Duration,
  max_attempts: u32,
  fast_fail: bool,
}

impl FileProcessingChain {
  pub fn new(
    store: Arc<dyn Store>,
    processors: Vec<Arc<dyn FileProcessor>>,
    config: &EngineConfig,
  ) -> Self {
    Self {
      store,
      processors,
      poll_interval: config.file_processing_poll(),
      max_attempts: config.file_processing_max_attempts,
      fast_fail: config.fast_fail,
    }
  }

  pub fn processors(&self) -> &[Arc<dyn FileProcessor>] {
    &self.processors
  }

  /// Run every processor over `object_id` and return the failures that were
  /// recorded but did not abort the chain.
  #[instrument(
    name = "processing_chain",
    skip(self, auth),
    fields(
      object_id = %object_id,
      principal = %auth.principal,
    )
  )]
  pub async fn launch_chain(
    &self,
    auth: &AuthContext,
    object_id: &str,
  ) -> Result<Vec<ProcessorFailure>, ChainError> {
    self.wait_until_visible(object_id).await?;

    let object = self.store.get_sequencing_object(object_id).await?;
    let ctx = ProcessingContext {
      auth: auth.clone(),
      object_id: object_id.to_string(),
    };

    let mut ignored = Vec::new();
    for processor in &self.processors {
      let name = processor.name().to_string();
      let outcome = match processor.should_process(&ctx).await {
        Ok(true) => processor.process(&ctx).await,
        Ok(false) => {
          debug!(processor = %name, "processor_skipped");
          continue;
        }
        Err(e) => Err(e),
      };

      let Err(e) = outcome else {
        debug!(processor = %name, "processor_completed");
        continue;
      };

      let entry = QcEntry::processor_error(&object.sample_id, object_id, &name, e.to_string());
      self.store.create_qc_entry(&entry).await?;

      if processor.modifies_file() || self.fast_fail {
        error!(processor = %name, error = %e, "processor_failed");
        return Err(ChainError::Processor {
          processor: name,
          source: e,
        });
      }

      warn!(processor = %name, error = %e, "processor_failure_ignored");
      ignored.push(ProcessorFailure {
        processor: name,
        message: e.to_string(),
      });
    }

    info!(ignored = ignored.len(), "chain_completed");
    Ok(ignored)
  }

  async fn wait_until_visible(&self, object_id: &str) -> Result<(), ChainError> {
    let started = Instant::now();
    for attempt in 1..=self.max_attempts {
      if self.store.sequencing_object_exists(object_id).await? {
        return Ok(());
      }
      if attempt < self.max_attempts {
        tokio::time::sleep(self.poll_interval).await;
      }
    }

    let waited_ms = started.elapsed().as_millis() as u64;
    error!(waited_ms, "sequencing_object_not_visible");
    Err(ChainError::Timeout {
      object_id: object_id.to_string(),
      attempts: self.max_attempts,
      waited_ms,
    })
  }
}
