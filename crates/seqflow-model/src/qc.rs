use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QcEntryKind {
  /// A file processor failed on one of the sample's files.
  FileProcessorError { processor: String, message: String },
}

/// Quality-control record attached to a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcEntry {
  pub qc_entry_id: String,
  pub sample_id: String,
  pub object_id: String,
  pub kind: QcEntryKind,
  pub created_at: DateTime<Utc>,
}

impl QcEntry {
  pub fn processor_error(
    sample_id: impl Into<String>,
    object_id: impl Into<String>,
    processor: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      qc_entry_id: crate::new_id(),
      sample_id: sample_id.into(),
      object_id: object_id.into(),
      kind: QcEntryKind::FileProcessorError {
        processor: processor.into(),
        message: message.into(),
      },
      created_at: Utc::now(),
    }
  }
}
