use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use seqflow_config::EngineConfig;
use seqflow_model::{AuthContext, QcEntryKind, SequenceFile, SequencingObject};
use seqflow_processing::{
  ChainError, FileProcessingChain, FileProcessor, GzipFileProcessor, ProcessingContext,
  ProcessingLauncher, ProcessorError, ReadStatisticsProcessor,
};
use seqflow_store::{MemoryStore, Store};

type Log = Arc<Mutex<Vec<String>>>;

struct Recording {
  name: &'static str,
  modifies: bool,
  fail: bool,
  log: Log,
}

#[async_trait]
impl FileProcessor for Recording {
  fn name(&self) -> &str {
    self.name
  }

  fn modifies_file(&self) -> bool {
    self.modifies
  }

  async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
    self
      .log
      .lock()
      .unwrap()
      .push(format!("{}:{}", self.name, ctx.auth.principal));
    if self.fail {
      return Err(ProcessorError::failed(format!("{} exploded", self.name)));
    }
    Ok(())
  }
}

fn processor(name: &'static str, modifies: bool, fail: bool, log: &Log) -> Arc<dyn FileProcessor> {
  Arc::new(Recording {
    name,
    modifies,
    fail,
    log: Arc::clone(log),
  })
}

fn config(fast_fail: bool) -> EngineConfig {
  EngineConfig {
    file_processing_poll_ms: 100,
    file_processing_max_attempts: 5,
    fast_fail,
    ..EngineConfig::default()
  }
}

async fn stored_object(store: &Arc<MemoryStore>) -> SequencingObject {
  let object = SequencingObject::single("sample-1", SequenceFile::new("/data/reads.fastq"));
  store.create_sequencing_object(&object).await.unwrap();
  object
}

#[tokio::test]
async fn test_non_modifying_failure_is_ignored() {
  let store = Arc::new(MemoryStore::new());
  let object = stored_object(&store).await;
  let log: Log = Arc::default();
  let chain = FileProcessingChain::new(
    store.clone(),
    vec![
      processor("a", false, true, &log),
      processor("b", false, false, &log),
      processor("c", false, false, &log),
    ],
    &config(false),
  );

  let ignored = chain
    .launch_chain(&AuthContext::new("alice"), &object.object_id)
    .await
    .unwrap();

  assert_eq!(*log.lock().unwrap(), vec!["a:alice", "b:alice", "c:alice"]);
  assert_eq!(ignored.len(), 1);
  assert_eq!(ignored[0].processor, "a");

  let entries = store.list_qc_entries("sample-1").await.unwrap();
  assert_eq!(entries.len(), 1);
  assert!(matches!(
    &entries[0].kind,
    QcEntryKind::FileProcessorError { processor, .. } if processor == "a"
  ));
}

#[tokio::test]
async fn test_modifying_failure_aborts() {
  let store = Arc::new(MemoryStore::new());
  let object = stored_object(&store).await;
  let log: Log = Arc::default();
  let chain = FileProcessingChain::new(
    store.clone(),
    vec![
      processor("a", true, true, &log),
      processor("b", false, false, &log),
      processor("c", false, false, &log),
    ],
    &config(false),
  );

  let err = chain
    .launch_chain(&AuthContext::new("alice"), &object.object_id)
    .await
    .unwrap_err();

  assert!(matches!(err, ChainError::Processor { ref processor, .. } if processor == "a"));
  assert_eq!(*log.lock().unwrap(), vec!["a:alice"]);
  assert_eq!(store.list_qc_entries("sample-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fast_fail_aborts_on_any_failure() {
  let store = Arc::new(MemoryStore::new());
  let object = stored_object(&store).await;
  let log: Log = Arc::default();
  let chain = FileProcessingChain::new(
    store.clone(),
    vec![
      processor("a", false, true, &log),
      processor("b", false, false, &log),
    ],
    &config(true),
  );

  let result = chain
    .launch_chain(&AuthContext::new("alice"), &object.object_id)
    .await;

  assert!(matches!(result, Err(ChainError::Processor { .. })));
  assert_eq!(*log.lock().unwrap(), vec!["a:alice"]);
}

#[tokio::test(start_paused = true)]
async fn test_invisible_object_times_out_without_running_processors() {
  let store = Arc::new(MemoryStore::new());
  let log: Log = Arc::default();
  let chain = FileProcessingChain::new(
    store.clone(),
    vec![processor("a", false, false, &log)],
    &config(false),
  );

  let err = chain
    .launch_chain(&AuthContext::new("alice"), "never-created")
    .await
    .unwrap_err();

  match err {
    ChainError::Timeout {
      attempts,
      waited_ms,
      ..
    } => {
      assert_eq!(attempts, 5);
      assert_eq!(waited_ms, 400);
    }
    other => panic!("expected timeout, got {other:?}"),
  }
  assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_late_visibility() {
  let store = Arc::new(MemoryStore::new());
  let log: Log = Arc::default();
  let chain = Arc::new(FileProcessingChain::new(
    store.clone(),
    vec![processor("a", false, false, &log)],
    &config(false),
  ));
  let object = SequencingObject::single("sample-1", SequenceFile::new("/data/reads.fastq"));

  let launcher = ProcessingLauncher::new(chain, 2);
  let handle = launcher.launch(AuthContext::new("bob"), object.object_id.clone());

  tokio::time::sleep(Duration::from_millis(250)).await;
  store.create_sequencing_object(&object).await.unwrap();

  let ignored = handle.await.unwrap().unwrap();
  assert!(ignored.is_empty());
  assert_eq!(*log.lock().unwrap(), vec!["a:bob"]);
}

#[tokio::test]
async fn test_gzip_then_statistics() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("reads.fastq.gz");
  let mut encoder = GzEncoder::new(
    std::fs::File::create(&path).unwrap(),
    Compression::default(),
  );
  encoder
    .write_all(b"@r1\nACGT\n+\nIIII\n@r2\nGGGCCA\n+\nIIIIII\n")
    .unwrap();
  encoder.finish().unwrap();

  let store = Arc::new(MemoryStore::new());
  let object = SequencingObject::single("sample-1", SequenceFile::new(&path));
  store.create_sequencing_object(&object).await.unwrap();

  let chain = FileProcessingChain::new(
    store.clone(),
    vec![
      Arc::new(GzipFileProcessor::new(store.clone())) as Arc<dyn FileProcessor>,
      Arc::new(ReadStatisticsProcessor::new(store.clone())),
    ],
    &config(false),
  );
  let ignored = chain
    .launch_chain(&AuthContext::new("alice"), &object.object_id)
    .await
    .unwrap();
  assert!(ignored.is_empty());

  let stored = store.get_sequencing_object(&object.object_id).await.unwrap();
  let file = stored.files()[0];
  assert_eq!(file.path, dir.path().join("reads.fastq"));
  let stats = file.statistics.as_ref().unwrap();
  assert_eq!(stats.read_count, 2);
  assert_eq!(stats.total_bases, 10);
}

#[tokio::test]
async fn test_corrupt_fastq_is_recorded_not_fatal() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("broken.fastq");
  std::fs::write(&path, b"not a fastq file\n").unwrap();

  let store = Arc::new(MemoryStore::new());
  let object = SequencingObject::single("sample-9", SequenceFile::new(&path));
  store.create_sequencing_object(&object).await.unwrap();

  let chain = FileProcessingChain::new(
    store.clone(),
    vec![Arc::new(ReadStatisticsProcessor::new(store.clone())) as Arc<dyn FileProcessor>],
    &config(false),
  );
  let ignored = chain
    .launch_chain(&AuthContext::new("alice"), &object.object_id)
    .await
    .unwrap();

  assert_eq!(ignored.len(), 1);
  assert_eq!(ignored[0].processor, "read_statistics");
  assert_eq!(store.list_qc_entries("sample-9").await.unwrap().len(), 1);
}
