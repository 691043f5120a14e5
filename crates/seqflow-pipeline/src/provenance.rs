use std::collections::{HashMap, HashSet, VecDeque};

use seqflow_backend::{ExecutionBackend, ExecutionGraph, OutputDataset};
use seqflow_model::{ProvenanceArena, ToolExecution};

use crate::error::StageError;

/// Add the jobs of `graph` reachable from its root to `arena`.
///
/// Walks upstream edges breadth-first and stops at input tools. Jobs already
/// recorded in `job_map` (remote job id -> execution id) are reused, so
/// outputs sharing an ancestry share nodes. Returns the root's execution id.
pub fn add_graph(
  graph: &ExecutionGraph,
  arena: &mut ProvenanceArena,
  job_map: &mut HashMap<String, String>,
) -> Result<String, StageError> {
  let mut reachable = Vec::new();
  let mut visited = HashSet::new();
  let mut queue = VecDeque::from([graph.root_job_id.as_str()]);

  while let Some(job_id) = queue.pop_front() {
    if !visited.insert(job_id) || job_map.contains_key(job_id) {
      continue;
    }
    let job = graph.jobs.get(job_id).ok_or_else(|| StageError::TerminalBackend {
      message: format!("provenance graph references unknown job {}", job_id),
    })?;
    reachable.push(job);
    if !job.input_tool {
      queue.extend(job.upstream.iter().map(String::as_str));
    }
  }

  // Ids first, so every upstream edge can be resolved below.
  for job in &reachable {
    job_map.insert(job.job_id.clone(), seqflow_model::new_id());
  }

  for job in reachable {
    let predecessors = if job.input_tool {
      Vec::new()
    } else {
      job
        .upstream
        .iter()
        .filter_map(|upstream| job_map.get(upstream).cloned())
        .collect()
    };
    arena.insert(ToolExecution {
      execution_id: job_map[&job.job_id].clone(),
      tool_name: job.tool_name.clone(),
      tool_version: job.tool_version.clone(),
      parameters: job.parameters.clone(),
      predecessors,
      input_tool: job.input_tool,
      remote_job_id: job.job_id.clone(),
    });
  }

  job_map
    .get(&graph.root_job_id)
    .cloned()
    .ok_or_else(|| StageError::unexpected("provenance root was not recorded"))
}

/// Fetch the execution graph behind `output` and add it to `arena`.
pub async fn build_provenance(
  backend: &dyn ExecutionBackend,
  output: &OutputDataset,
  arena: &mut ProvenanceArena,
  job_map: &mut HashMap<String, String>,
) -> Result<String, StageError> {
  let graph = backend.get_provenance(output).await?;
  add_graph(&graph, arena, job_map)
}
