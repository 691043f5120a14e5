use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use seqflow_model::SequenceFile;
use seqflow_store::Store;
use tracing::info;

use crate::{FileProcessor, ProcessingContext, ProcessorError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_EXTENSION: &str = "gz";

/// Decompresses gzipped uploads in place and points the stored file at the
/// decompressed copy.
pub struct GzipFileProcessor {
  store: Arc<dyn Store>,
  remove_compressed: bool,
}

impl GzipFileProcessor {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self {
      store,
      remove_compressed: false,
    }
  }

  /// Delete the compressed original after decompressing.
  pub fn with_remove_compressed(mut self, remove: bool) -> Self {
    self.remove_compressed = remove;
    self
  }
}

pub(crate) fn is_gzipped(path: &Path) -> io::Result<bool> {
  let mut magic = [0u8; 2];
  let mut file = File::open(path)?;
  match file.read_exact(&mut magic) {
    Ok(()) => Ok(magic == GZIP_MAGIC),
    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
    Err(e) => Err(e),
  }
}

/// Decompress `path` beside itself and return the decompressed path.
///
/// A gzipped file without a `.gz` extension is renamed first so the
/// decompressed copy can take the original name.
fn decompress(path: &Path, remove_compressed: bool) -> io::Result<PathBuf> {
  let compressed = if path.extension().is_some_and(|ext| ext == GZIP_EXTENSION) {
    path.to_path_buf()
  } else {
    let mut renamed = path.as_os_str().to_owned();
    renamed.push(".");
    renamed.push(GZIP_EXTENSION);
    let renamed = PathBuf::from(renamed);
    std::fs::rename(path, &renamed)?;
    renamed
  };
  let target = compressed.with_extension("");

  let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(&compressed)?));
  let mut out = File::create(&target)?;
  io::copy(&mut decoder, &mut out)?;

  if remove_compressed {
    std::fs::remove_file(&compressed)?;
  }
  Ok(target)
}

#[async_trait]
impl FileProcessor for GzipFileProcessor {
  fn name(&self) -> &str {
    "gzip"
  }

  fn modifies_file(&self) -> bool {
    true
  }

  async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
    let object = self.store.get_sequencing_object(&ctx.object_id).await?;

    for file in object.files() {
      let path = file.path.clone();
      let remove = self.remove_compressed;
      let decompressed = tokio::task::spawn_blocking(move || -> io::Result<Option<PathBuf>> {
        if !is_gzipped(&path)? {
          return Ok(None);
        }
        decompress(&path, remove).map(Some)
      })
      .await
      .map_err(|e| ProcessorError::failed(format!("decompression task failed: {}", e)))??;

      if let Some(target) = decompressed {
        info!(
          file_id = %file.file_id,
          path = %target.display(),
          "file_decompressed"
        );
        let updated = SequenceFile {
          path: target,
          ..file.clone()
        };
        self
          .store
          .update_sequence_file(&ctx.object_id, &updated)
          .await?;
      }
    }

    Ok(())
  }
}
