#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use seqflow_backend::{ExecutionBackend, MemoryBackend, ScriptedOutput};
use seqflow_config::EngineConfig;
use seqflow_model::{
  AnalysisSubmission, AnalysisType, SequenceFile, SequencingObject, SubmissionState,
};
use seqflow_pipeline::{ChannelNotifier, Pipeline, PipelineEvent, Scheduler};
use seqflow_registry::{
  MemoryWorkflowRegistry, WorkflowDescription, WorkflowInputs, WorkflowOutput, WorkflowParameter,
};
use seqflow_store::{MemoryStore, Store};
use tokio::sync::mpsc;

pub const ASSEMBLY: &str = "assembly--1.0";
pub const ASSEMBLY_REMOTE: &str = "remote-assembly";
pub const PHYLO: &str = "phylo--1.0";
pub const PHYLO_REMOTE: &str = "remote-phylo";

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub backend: Arc<MemoryBackend>,
  pub registry: Arc<MemoryWorkflowRegistry>,
  pub pipeline: Arc<Pipeline<ChannelNotifier>>,
  pub config: EngineConfig,
  pub events: mpsc::UnboundedReceiver<PipelineEvent>,
  pub work_dir: tempfile::TempDir,
}

/// Single-end, batched, no reference, two outputs.
pub fn assembly_workflow() -> WorkflowDescription {
  WorkflowDescription {
    workflow_id: ASSEMBLY.to_string(),
    name: "Assembly".to_string(),
    version: "1.0".to_string(),
    remote_workflow_id: ASSEMBLY_REMOTE.to_string(),
    analysis_type: AnalysisType::new("assembly"),
    inputs: WorkflowInputs {
      sequence_reads_single: Some("sequence_reads_single".to_string()),
      batch: true,
      ..WorkflowInputs::default()
    },
    parameters: vec![
      WorkflowParameter {
        name: "min_contig_length".to_string(),
        default_value: serde_json::json!(1000),
      },
      WorkflowParameter {
        name: "kmer".to_string(),
        default_value: serde_json::json!(21),
      },
    ],
    outputs: vec![
      WorkflowOutput {
        name: "contigs".to_string(),
        file_name: "contigs.fasta".to_string(),
      },
      WorkflowOutput {
        name: "report".to_string(),
        file_name: "report.tsv".to_string(),
      },
    ],
    requires_tool_data_table: false,
  }
}

/// Paired-end with a required reference.
pub fn phylo_workflow() -> WorkflowDescription {
  WorkflowDescription {
    workflow_id: PHYLO.to_string(),
    name: "Phylogenomics".to_string(),
    version: "1.0".to_string(),
    remote_workflow_id: PHYLO_REMOTE.to_string(),
    analysis_type: AnalysisType::new("phylogenomics"),
    inputs: WorkflowInputs {
      sequence_reads_paired: Some("sequence_reads_paired".to_string()),
      reference: Some("reference".to_string()),
      batch: true,
      ..WorkflowInputs::default()
    },
    parameters: Vec::new(),
    outputs: vec![WorkflowOutput {
      name: "tree".to_string(),
      file_name: "tree.newick".to_string(),
    }],
    requires_tool_data_table: false,
  }
}

impl Harness {
  pub async fn new() -> Self {
    Self::with_backend_config(Arc::new(MemoryBackend::new()), EngineConfig::default()).await
  }

  pub async fn with_config(config: EngineConfig) -> Self {
    Self::with_backend_config(Arc::new(MemoryBackend::new()), config).await
  }

  pub async fn with_backend_config(backend: Arc<MemoryBackend>, config: EngineConfig) -> Self {
    Self::build(backend.clone(), backend, config).await
  }

  /// Build a harness whose pipeline talks to `execution`, while `backend`
  /// stays available for scripting and inspection.
  pub async fn build(
    backend: Arc<MemoryBackend>,
    execution: Arc<dyn ExecutionBackend>,
    mut config: EngineConfig,
  ) -> Self {
    let work_dir = tempfile::tempdir().unwrap();
    config.work_dir = work_dir.path().to_path_buf();

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(MemoryWorkflowRegistry::new());
    registry.register(assembly_workflow()).await.unwrap();
    registry.register(phylo_workflow()).await.unwrap();

    backend
      .script_outputs(
        ASSEMBLY_REMOTE,
        vec![
          ScriptedOutput::new("contigs", "contigs.fasta", ">c1\nACGT\n"),
          ScriptedOutput::new("report", "report.tsv", "n50\tcontigs\n5000\t12\n"),
        ],
      )
      .await;
    backend
      .script_outputs(
        PHYLO_REMOTE,
        vec![ScriptedOutput::new("tree", "tree.newick", "(a,b);")],
      )
      .await;

    let (sender, events) = mpsc::unbounded_channel();
    let pipeline = Arc::new(Pipeline::with_notifier(
      store.clone(),
      execution,
      registry.clone(),
      &config,
      ChannelNotifier::new(sender),
    ));

    Self {
      store,
      backend,
      registry,
      pipeline,
      config,
      events,
      work_dir,
    }
  }

  pub fn scheduler(&self) -> Scheduler<ChannelNotifier> {
    Scheduler::new(self.pipeline.clone(), self.config.clone())
  }

  pub async fn single_end(&self, sample_id: &str) -> String {
    let object = SequencingObject::single(
      sample_id,
      SequenceFile::new(format!("/data/{}.fastq", sample_id)),
    );
    self.store.create_sequencing_object(&object).await.unwrap();
    object.object_id
  }

  pub async fn paired_end(&self, sample_id: &str) -> String {
    let object = SequencingObject::pair(
      sample_id,
      SequenceFile::new(format!("/data/{}_R1.fastq", sample_id)),
      SequenceFile::new(format!("/data/{}_R2.fastq", sample_id)),
    );
    self.store.create_sequencing_object(&object).await.unwrap();
    object.object_id
  }

  pub async fn submit(&self, submission: AnalysisSubmission) -> String {
    self.store.create_submission(&submission).await.unwrap();
    submission.submission_id
  }

  pub async fn submission(&self, submission_id: &str) -> AnalysisSubmission {
    self.store.get_submission(submission_id).await.unwrap()
  }

  pub async fn state(&self, submission_id: &str) -> SubmissionState {
    self.submission(submission_id).await.state
  }

  /// Drain emitted events.
  pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = self.events.try_recv() {
      out.push(event);
    }
    out
  }

  /// State transitions announced for `submission_id`, in order.
  pub fn transitions(&mut self, submission_id: &str) -> Vec<(SubmissionState, SubmissionState)> {
    self
      .drain_events()
      .into_iter()
      .filter_map(|event| match event {
        PipelineEvent::StateChanged {
          submission_id: id,
          from,
          to,
        } if id == submission_id => Some((from, to)),
        _ => None,
      })
      .collect()
  }
}

pub fn ad_hoc(values: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
  values
    .iter()
    .map(|(k, v)| (k.to_string(), v.clone()))
    .collect()
}
