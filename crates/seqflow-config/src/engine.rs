use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("invalid config value for '{key}': {message}")]
  Invalid { key: &'static str, message: String },
}

/// Whether remote resources are released once a submission is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupPolicy {
  #[default]
  Always,
  /// Leave workspaces in place. Intended for debugging remote runs only.
  Never,
}

/// A tabular sample updater: copies the two-line TSV written under
/// `outputRole` onto the analysed samples, keys prefixed with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleUpdaterConfig {
  pub analysis_type: String,
  pub output_role: String,
  #[serde(default)]
  pub prefix: String,
}

/// Configuration for the scheduler, the stage worker pool and the file
/// processing chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
  /// Delay between scheduler ticks.
  pub poll_interval_seconds: u64,
  /// Delay between visibility checks in the file processing chain.
  pub file_processing_poll_ms: u64,
  /// Number of visibility checks before the chain gives up.
  pub file_processing_max_attempts: u32,
  pub cleanup_policy: CleanupPolicy,
  /// Upper bound on concurrently running stage tasks.
  pub worker_pool_size: usize,
  /// Abort the processing chain on the first failing processor.
  pub fast_fail: bool,
  /// Maximum submissions a stage dispatches per tick.
  pub batch_size: usize,
  /// Upper bound on concurrently running processing chains.
  pub processing_pool_size: usize,
  /// Directory receiving downloaded analysis outputs. Relative paths are
  /// resolved against the data directory by the binary.
  pub work_dir: PathBuf,
  /// Age after which a `Cleaning` claim left by a crashed process is taken
  /// over by the next cleanup scan.
  pub cleanup_claim_timeout_seconds: u64,
  pub sample_updaters: Vec<SampleUpdaterConfig>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      poll_interval_seconds: 10,
      file_processing_poll_ms: 1000,
      file_processing_max_attempts: 60,
      cleanup_policy: CleanupPolicy::Always,
      worker_pool_size: 4,
      fast_fail: false,
      batch_size: 100,
      processing_pool_size: 2,
      work_dir: PathBuf::from("work"),
      cleanup_claim_timeout_seconds: 3600,
      sample_updaters: Vec::new(),
    }
  }
}

impl EngineConfig {
  /// Parse configuration from a JSON string.
  pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
    let config: EngineConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Load configuration from a JSON file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&content)
  }

  /// Reject values that would stall the engine.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.poll_interval_seconds == 0 {
      return Err(ConfigError::Invalid {
        key: "pollIntervalSeconds",
        message: "must be at least 1".to_string(),
      });
    }
    if self.worker_pool_size == 0 {
      return Err(ConfigError::Invalid {
        key: "workerPoolSize",
        message: "must be at least 1".to_string(),
      });
    }
    if self.processing_pool_size == 0 {
      return Err(ConfigError::Invalid {
        key: "processingPoolSize",
        message: "must be at least 1".to_string(),
      });
    }
    if self.batch_size == 0 {
      return Err(ConfigError::Invalid {
        key: "batchSize",
        message: "must be at least 1".to_string(),
      });
    }
    Ok(())
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_seconds)
  }

  pub fn file_processing_poll(&self) -> Duration {
    Duration::from_millis(self.file_processing_poll_ms)
  }

  pub fn cleanup_claim_timeout(&self) -> Duration {
    Duration::from_secs(self.cleanup_claim_timeout_seconds)
  }
}
