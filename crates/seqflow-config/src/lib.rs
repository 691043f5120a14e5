//! Seqflow Config
//!
//! This crate contains the serializable configuration types for the seqflow
//! engine. Configuration is loaded from a JSON file (via the CLI with
//! `--config=engine.json`); every key is optional and falls back to the
//! defaults below.
//!
//! ```json
//! {
//!   "pollIntervalSeconds": 10,
//!   "fileProcessingPollMs": 1000,
//!   "fileProcessingMaxAttempts": 60,
//!   "cleanupPolicy": "ALWAYS",
//!   "workerPoolSize": 4,
//!   "fastFail": false,
//!   "cleanupClaimTimeoutSeconds": 3600,
//!   "sampleUpdaters": [
//!     { "analysisType": "sistr", "outputRole": "serovar_table", "prefix": "sistr/" }
//!   ]
//! }
//! ```

mod engine;

pub use engine::{CleanupPolicy, ConfigError, EngineConfig, SampleUpdaterConfig};
