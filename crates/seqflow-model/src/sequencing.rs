use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality score encoding guessed from the lowest quality character seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityEncoding {
  /// Phred+33 (Sanger / Illumina 1.8+).
  Phred33,
  /// Phred+64 (Illumina 1.3 to 1.7).
  Phred64,
}

impl QualityEncoding {
  /// Guess the encoding from the lowest quality byte in a file.
  pub fn from_lowest_quality(lowest: u8) -> Self {
    if lowest < 59 {
      QualityEncoding::Phred33
    } else {
      QualityEncoding::Phred64
    }
  }
}

/// Basic per-file FASTQ statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStatistics {
  pub read_count: u64,
  pub total_bases: u64,
  pub min_length: u32,
  pub max_length: u32,
  /// Percentage of G and C among called bases, 0 to 100.
  pub gc_content: f64,
  pub encoding: QualityEncoding,
}

/// One sequencing file on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFile {
  pub file_id: String,
  pub path: PathBuf,
  /// Existing copy on the execution backend, if already uploaded once.
  #[serde(default)]
  pub remote_dataset_id: Option<String>,
  #[serde(default)]
  pub statistics: Option<ReadStatistics>,
}

impl SequenceFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      file_id: crate::new_id(),
      path: path.into(),
      remote_dataset_id: None,
      statistics: None,
    }
  }

  /// File name used when uploading, falling back to the file id.
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.file_id.clone())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SequencingObjectKind {
  Single { file: SequenceFile },
  Pair {
    forward: SequenceFile,
    reverse: SequenceFile,
  },
}

/// A read set for exactly one sample: a single-end file or a forward/reverse pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingObject {
  pub object_id: String,
  pub sample_id: String,
  pub kind: SequencingObjectKind,
  pub created_at: DateTime<Utc>,
}

impl SequencingObject {
  pub fn single(sample_id: impl Into<String>, file: SequenceFile) -> Self {
    Self {
      object_id: crate::new_id(),
      sample_id: sample_id.into(),
      kind: SequencingObjectKind::Single { file },
      created_at: Utc::now(),
    }
  }

  pub fn pair(sample_id: impl Into<String>, forward: SequenceFile, reverse: SequenceFile) -> Self {
    Self {
      object_id: crate::new_id(),
      sample_id: sample_id.into(),
      kind: SequencingObjectKind::Pair { forward, reverse },
      created_at: Utc::now(),
    }
  }

  pub fn is_paired(&self) -> bool {
    matches!(self.kind, SequencingObjectKind::Pair { .. })
  }

  /// Files in upload order (forward before reverse).
  pub fn files(&self) -> Vec<&SequenceFile> {
    match &self.kind {
      SequencingObjectKind::Single { file } => vec![file],
      SequencingObjectKind::Pair { forward, reverse } => vec![forward, reverse],
    }
  }

  pub fn file(&self, file_id: &str) -> Option<&SequenceFile> {
    self.files().into_iter().find(|f| f.file_id == file_id)
  }

  pub fn file_mut(&mut self, file_id: &str) -> Option<&mut SequenceFile> {
    match &mut self.kind {
      SequencingObjectKind::Single { file } => Some(file).filter(|f| f.file_id == file_id),
      SequencingObjectKind::Pair { forward, reverse } => {
        if forward.file_id == file_id {
          Some(forward)
        } else if reverse.file_id == file_id {
          Some(reverse)
        } else {
          None
        }
      }
    }
  }
}

/// A reference genome or assembly supplied to workflows that require one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFile {
  pub reference_id: String,
  pub path: PathBuf,
  #[serde(default)]
  pub remote_dataset_id: Option<String>,
}

impl ReferenceFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      reference_id: crate::new_id(),
      path: path.into(),
      remote_dataset_id: None,
    }
  }
}
