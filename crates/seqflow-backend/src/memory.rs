use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
  BackendError, CollectionElement, CollectionKind, ExecutionBackend, ExecutionGraph, JobRecord,
  OutputDataset, RunStatus, WorkflowInvocation,
};

/// Backend operations, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
  CreateWorkspace,
  Upload,
  Link,
  BuildCollection,
  Invoke,
  Status,
  ListOutputs,
  Download,
  Provenance,
  DeleteWorkspace,
}

/// An output a scripted workflow produces when invoked.
#[derive(Debug, Clone)]
pub struct ScriptedOutput {
  pub label: String,
  pub file_name: String,
  pub content: Vec<u8>,
}

impl ScriptedOutput {
  pub fn new(label: &str, file_name: &str, content: impl Into<Vec<u8>>) -> Self {
    Self {
      label: label.to_string(),
      file_name: file_name.to_string(),
      content: content.into(),
    }
  }
}

struct Run {
  statuses: VecDeque<RunStatus>,
  outputs: Vec<OutputDataset>,
}

#[derive(Default)]
struct State {
  next_id: u64,
  workspaces: BTreeMap<String, Vec<String>>,
  deleted: Vec<String>,
  runs: HashMap<String, Run>,
  invocations: Vec<WorkflowInvocation>,
  uploads: Vec<PathBuf>,
  collections: Vec<(CollectionKind, Vec<CollectionElement>)>,
  contents: HashMap<String, Vec<u8>>,
  graphs: HashMap<String, ExecutionGraph>,
  status_scripts: HashMap<String, Vec<RunStatus>>,
  output_scripts: HashMap<String, Vec<ScriptedOutput>>,
  failures: HashMap<BackendOp, VecDeque<BackendError>>,
  calls: HashMap<BackendOp, usize>,
}

impl State {
  fn id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}-{}", prefix, self.next_id)
  }

  fn enter(&mut self, op: BackendOp) -> Result<(), BackendError> {
    *self.calls.entry(op).or_default() += 1;
    match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn workspace(&mut self, workspace_id: &str) -> Result<&mut Vec<String>, BackendError> {
    self
      .workspaces
      .get_mut(workspace_id)
      .ok_or_else(|| BackendError::not_found(format!("workspace {}", workspace_id)))
  }
}

/// In-process execution engine with scripted run behavior.
///
/// Runs report the statuses scripted for their remote workflow id in order,
/// repeating the last one; with no script a run is immediately `ok`.
#[derive(Default)]
pub struct MemoryBackend {
  state: Mutex<State>,
  dataset_reuse: bool,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_dataset_reuse(mut self) -> Self {
    self.dataset_reuse = true;
    self
  }

  /// Fail the next call of `op` with `err`. Queued failures are consumed in order.
  pub async fn fail_next(&self, op: BackendOp, err: BackendError) {
    self
      .state
      .lock()
      .await
      .failures
      .entry(op)
      .or_default()
      .push_back(err);
  }

  pub async fn script_status(&self, remote_workflow_id: &str, statuses: Vec<RunStatus>) {
    self
      .state
      .lock()
      .await
      .status_scripts
      .insert(remote_workflow_id.to_string(), statuses);
  }

  pub async fn script_outputs(&self, remote_workflow_id: &str, outputs: Vec<ScriptedOutput>) {
    self
      .state
      .lock()
      .await
      .output_scripts
      .insert(remote_workflow_id.to_string(), outputs);
  }

  pub async fn calls(&self, op: BackendOp) -> usize {
    self
      .state
      .lock()
      .await
      .calls
      .get(&op)
      .copied()
      .unwrap_or(0)
  }

  pub async fn live_workspaces(&self) -> Vec<String> {
    self.state.lock().await.workspaces.keys().cloned().collect()
  }

  pub async fn deleted_workspaces(&self) -> Vec<String> {
    self.state.lock().await.deleted.clone()
  }

  pub async fn invocations(&self) -> Vec<WorkflowInvocation> {
    self.state.lock().await.invocations.clone()
  }

  pub async fn uploads(&self) -> Vec<PathBuf> {
    self.state.lock().await.uploads.clone()
  }

  pub async fn collections(&self) -> Vec<(CollectionKind, Vec<CollectionElement>)> {
    self.state.lock().await.collections.clone()
  }
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
  async fn create_workspace(&self, _name: &str) -> Result<String, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::CreateWorkspace)?;
    let id = state.id("ws");
    state.workspaces.insert(id.clone(), Vec::new());
    Ok(id)
  }

  async fn upload_dataset(&self, workspace_id: &str, path: &Path) -> Result<String, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::Upload)?;
    let id = state.id("ds");
    state.workspace(workspace_id)?.push(id.clone());
    state.uploads.push(path.to_path_buf());
    Ok(id)
  }

  fn supports_dataset_reuse(&self) -> bool {
    self.dataset_reuse
  }

  async fn link_dataset(&self, workspace_id: &str, dataset_id: &str) -> Result<String, BackendError> {
    if !self.dataset_reuse {
      return Err(BackendError::Unsupported {
        operation: "link_dataset",
      });
    }
    let mut state = self.state.lock().await;
    state.enter(BackendOp::Link)?;
    let id = format!("{}@{}", dataset_id, workspace_id);
    state.workspace(workspace_id)?.push(id.clone());
    Ok(id)
  }

  async fn build_collection(
    &self,
    workspace_id: &str,
    kind: CollectionKind,
    elements: &[CollectionElement],
  ) -> Result<String, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::BuildCollection)?;
    let id = state.id("hdca");
    state.workspace(workspace_id)?.push(id.clone());
    state.collections.push((kind, elements.to_vec()));
    Ok(id)
  }

  async fn invoke_workflow(&self, invocation: &WorkflowInvocation) -> Result<String, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::Invoke)?;
    state.workspace(&invocation.workspace_id)?;

    let run_id = state.id("run");
    let statuses = state
      .status_scripts
      .get(&invocation.remote_workflow_id)
      .cloned()
      .unwrap_or_else(|| vec![RunStatus::new("ok")]);
    let scripted = state
      .output_scripts
      .get(&invocation.remote_workflow_id)
      .cloned()
      .unwrap_or_default();

    let upload_job = state.id("job");
    let mut outputs = Vec::new();
    for output in scripted {
      let dataset_id = state.id("ds");
      let job_id = state.id("job");
      let graph = ExecutionGraph {
        root_job_id: job_id.clone(),
        jobs: BTreeMap::from([
          (
            upload_job.clone(),
            JobRecord {
              job_id: upload_job.clone(),
              tool_name: "upload1".to_string(),
              tool_version: "1.1.6".to_string(),
              parameters: BTreeMap::new(),
              upstream: Vec::new(),
              input_tool: true,
            },
          ),
          (
            job_id.clone(),
            JobRecord {
              job_id: job_id.clone(),
              tool_name: format!("{}-tool", output.label),
              tool_version: "1.0".to_string(),
              parameters: invocation
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
              upstream: vec![upload_job.clone()],
              input_tool: false,
            },
          ),
        ]),
      };
      state.graphs.insert(dataset_id.clone(), graph);
      state.contents.insert(dataset_id.clone(), output.content);
      outputs.push(OutputDataset {
        dataset_id,
        label: output.label,
        file_name: output.file_name,
        job_id,
      });
    }

    state.invocations.push(invocation.clone());
    state.runs.insert(
      run_id.clone(),
      Run {
        statuses: statuses.into(),
        outputs,
      },
    );
    Ok(run_id)
  }

  async fn get_run_status(&self, run_id: &str) -> Result<RunStatus, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::Status)?;
    let run = state
      .runs
      .get_mut(run_id)
      .ok_or_else(|| BackendError::not_found(format!("run {}", run_id)))?;
    let status = if run.statuses.len() > 1 {
      run.statuses.pop_front()
    } else {
      run.statuses.front().cloned()
    };
    status.ok_or_else(|| BackendError::transient(format!("run {} has no status yet", run_id)))
  }

  async fn list_output_datasets(&self, run_id: &str) -> Result<Vec<OutputDataset>, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::ListOutputs)?;
    state
      .runs
      .get(run_id)
      .map(|run| run.outputs.clone())
      .ok_or_else(|| BackendError::not_found(format!("run {}", run_id)))
  }

  async fn download_dataset(
    &self,
    output: &OutputDataset,
    dir: &Path,
  ) -> Result<PathBuf, BackendError> {
    let content = {
      let mut state = self.state.lock().await;
      state.enter(BackendOp::Download)?;
      state
        .contents
        .get(&output.dataset_id)
        .cloned()
        .ok_or_else(|| BackendError::not_found(format!("dataset {}", output.dataset_id)))?
    };

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&output.file_name);
    tokio::fs::write(&path, content).await?;
    Ok(path)
  }

  async fn get_provenance(&self, output: &OutputDataset) -> Result<ExecutionGraph, BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::Provenance)?;
    state
      .graphs
      .get(&output.dataset_id)
      .cloned()
      .ok_or_else(|| BackendError::not_found(format!("dataset {}", output.dataset_id)))
  }

  async fn delete_workspace(&self, workspace_id: &str) -> Result<(), BackendError> {
    let mut state = self.state.lock().await;
    state.enter(BackendOp::DeleteWorkspace)?;
    if state.workspaces.remove(workspace_id).is_none() {
      return Err(BackendError::not_found(format!("workspace {}", workspace_id)));
    }
    state.deleted.push(workspace_id.to_string());
    Ok(())
  }
}
