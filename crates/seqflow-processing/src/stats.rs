use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bio::io::fastq;
use flate2::read::MultiGzDecoder;
use seqflow_model::{QualityEncoding, ReadStatistics, SequenceFile};
use seqflow_store::Store;
use tracing::info;

use crate::gzip::is_gzipped;
use crate::{FileProcessor, ProcessingContext, ProcessorError};

/// Computes basic FASTQ statistics for each file and saves them on it.
pub struct ReadStatisticsProcessor {
  store: Arc<dyn Store>,
}

impl ReadStatisticsProcessor {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }
}

/// Parse a FASTQ stream and summarize it.
pub fn compute_statistics<R: Read>(reader: R) -> Result<ReadStatistics, String> {
  let mut read_count = 0u64;
  let mut total_bases = 0u64;
  let mut min_length = u32::MAX;
  let mut max_length = 0u32;
  let mut gc = 0u64;
  let mut called = 0u64;
  let mut lowest_quality = u8::MAX;

  for (index, record) in fastq::Reader::new(reader).records().enumerate() {
    let record = record.map_err(|e| format!("record {}: {}", index + 1, e))?;
    record
      .check()
      .map_err(|e| format!("record {} ({}): {}", index + 1, record.id(), e))?;

    let sequence = record.seq();
    let length = sequence.len() as u32;
    read_count += 1;
    total_bases += u64::from(length);
    min_length = min_length.min(length);
    max_length = max_length.max(length);
    for base in sequence {
      match base.to_ascii_uppercase() {
        b'G' | b'C' => {
          gc += 1;
          called += 1;
        }
        b'A' | b'T' => called += 1,
        _ => {}
      }
    }
    if let Some(q) = record.qual().iter().min() {
      lowest_quality = lowest_quality.min(*q);
    }
  }

  Ok(ReadStatistics {
    read_count,
    total_bases,
    min_length: if read_count == 0 { 0 } else { min_length },
    max_length,
    gc_content: if called == 0 {
      0.0
    } else {
      gc as f64 * 100.0 / called as f64
    },
    encoding: QualityEncoding::from_lowest_quality(lowest_quality),
  })
}

fn statistics_for(path: &Path) -> Result<ReadStatistics, ProcessorError> {
  let file = File::open(path)?;
  let result = if is_gzipped(path)? {
    compute_statistics(MultiGzDecoder::new(file))
  } else {
    compute_statistics(file)
  };
  result.map_err(|message| ProcessorError::failed(format!("{}: {}", path.display(), message)))
}

#[async_trait]
impl FileProcessor for ReadStatisticsProcessor {
  fn name(&self) -> &str {
    "read_statistics"
  }

  fn modifies_file(&self) -> bool {
    false
  }

  async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
    let object = self.store.get_sequencing_object(&ctx.object_id).await?;

    for file in object.files() {
      let path = file.path.clone();
      let statistics = tokio::task::spawn_blocking(move || statistics_for(&path))
        .await
        .map_err(|e| ProcessorError::failed(format!("statistics task failed: {}", e)))??;

      info!(
        file_id = %file.file_id,
        read_count = statistics.read_count,
        total_bases = statistics.total_bases,
        "read_statistics_computed"
      );
      let updated = SequenceFile {
        statistics: Some(statistics),
        ..file.clone()
      };
      self
        .store
        .update_sequence_file(&ctx.object_id, &updated)
        .await?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_statistics() {
    let fastq = b"@r1\nACGTAC\n+\nIIIII#\n@r2\nGGCC\n+\nIIII\n";
    let stats = compute_statistics(&fastq[..]).unwrap();
    assert_eq!(stats.read_count, 2);
    assert_eq!(stats.total_bases, 10);
    assert_eq!(stats.min_length, 4);
    assert_eq!(stats.max_length, 6);
    assert!((stats.gc_content - 70.0).abs() < 1e-9);
    assert_eq!(stats.encoding, QualityEncoding::Phred33);
  }

  #[test]
  fn test_empty_input() {
    let stats = compute_statistics(&b""[..]).unwrap();
    assert_eq!(stats.read_count, 0);
    assert_eq!(stats.min_length, 0);
    assert_eq!(stats.gc_content, 0.0);
  }

  #[test]
  fn test_missing_header_marker_rejected() {
    assert!(compute_statistics(&b"r1\nACGT\n+\nIIII\n"[..]).is_err());
  }

  #[test]
  fn test_truncated_record_rejected() {
    let err = compute_statistics(&b"@r1\nACGT\n+\n"[..]).unwrap_err();
    assert!(err.starts_with("record 1"), "{err}");
  }

  #[test]
  fn test_quality_length_mismatch_rejected() {
    let err = compute_statistics(&b"@r1\nACGT\n+\nII\n"[..]).unwrap_err();
    assert!(err.starts_with("record 1 (r1)"), "{err}");
  }
}
