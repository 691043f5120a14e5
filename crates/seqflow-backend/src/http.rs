use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::{
  BackendError, CollectionElement, CollectionKind, ExecutionBackend, ExecutionGraph,
  OutputDataset, RunStatus, WorkflowInvocation,
};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
struct IdResponse {
  id: String,
}

/// JSON-over-HTTP client for a Galaxy-style execution engine.
pub struct HttpBackend {
  client: Client,
  base_url: Url,
  api_key: Option<String>,
}

impl HttpBackend {
  /// Create a client for the engine at `base_url`. `timeout` bounds every request.
  pub fn new(
    base_url: &str,
    api_key: Option<String>,
    timeout: Duration,
  ) -> Result<Self, BackendError> {
    let mut base = base_url.to_string();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url = Url::parse(&base)
      .map_err(|e| BackendError::rejected(format!("invalid backend url '{}': {}", base_url, e)))?;
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| BackendError::rejected(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      api_key,
    })
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| BackendError::rejected(format!("invalid path '{}': {}", path, e)))?;
    let mut request = self.client.request(method, url);
    if let Some(key) = &self.api_key {
      request = request.header(API_KEY_HEADER, key);
    }
    Ok(request)
  }

  async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
    let response = request.send().await.map_err(classify_reqwest)?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
    self
      .send(request)
      .await?
      .json()
      .await
      .map_err(classify_reqwest)
  }
}

/// Map a non-success HTTP status onto the backend error taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
  let message = if body.is_empty() {
    status.to_string()
  } else {
    format!("{}: {}", status, body)
  };

  if status == StatusCode::NOT_FOUND {
    BackendError::NotFound { resource: message }
  } else if status.is_server_error()
    || status == StatusCode::TOO_MANY_REQUESTS
    || status == StatusCode::REQUEST_TIMEOUT
  {
    BackendError::Transient { message }
  } else {
    BackendError::Rejected { message }
  }
}

fn classify_reqwest(err: reqwest::Error) -> BackendError {
  if let Some(status) = err.status() {
    return classify_status(status, "");
  }
  if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
    BackendError::transient(err.to_string())
  } else {
    BackendError::rejected(err.to_string())
  }
}

fn element_json(element: &CollectionElement) -> serde_json::Value {
  match element {
    CollectionElement::Dataset { name, dataset_id } => {
      json!({ "name": name, "src": "hda", "id": dataset_id })
    }
    CollectionElement::Pair {
      name,
      forward,
      reverse,
    } => json!({
      "name": name,
      "src": "new_collection",
      "collection_type": "paired",
      "element_identifiers": [
        { "name": "forward", "src": "hda", "id": forward },
        { "name": "reverse", "src": "hda", "id": reverse },
      ],
    }),
  }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
  async fn create_workspace(&self, name: &str) -> Result<String, BackendError> {
    let request = self
      .request(Method::POST, "api/histories")?
      .json(&json!({ "name": name }));
    let created: IdResponse = self.send_json(request).await?;
    debug!(workspace_id = %created.id, "workspace_created");
    Ok(created.id)
  }

  async fn upload_dataset(&self, workspace_id: &str, path: &Path) -> Result<String, BackendError> {
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let bytes = tokio::fs::read(path).await?;
    let request = self
      .request(
        Method::POST,
        &format!("api/histories/{}/contents/uploads", workspace_id),
      )?
      .query(&[("name", name.as_str())])
      .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
      .body(bytes);
    let uploaded: IdResponse = self.send_json(request).await?;
    Ok(uploaded.id)
  }

  fn supports_dataset_reuse(&self) -> bool {
    true
  }

  async fn link_dataset(&self, workspace_id: &str, dataset_id: &str) -> Result<String, BackendError> {
    let request = self
      .request(Method::POST, &format!("api/histories/{}/contents", workspace_id))?
      .json(&json!({ "source": "hda", "content": dataset_id }));
    let linked: IdResponse = self.send_json(request).await?;
    Ok(linked.id)
  }

  async fn build_collection(
    &self,
    workspace_id: &str,
    kind: CollectionKind,
    elements: &[CollectionElement],
  ) -> Result<String, BackendError> {
    let identifiers: Vec<_> = elements.iter().map(element_json).collect();
    let request = self
      .request(Method::POST, &format!("api/histories/{}/contents", workspace_id))?
      .json(&json!({
        "type": "dataset_collection",
        "collection_type": kind.as_str(),
        "name": kind.as_str(),
        "element_identifiers": identifiers,
      }));
    let created: IdResponse = self.send_json(request).await?;
    Ok(created.id)
  }

  async fn invoke_workflow(&self, invocation: &WorkflowInvocation) -> Result<String, BackendError> {
    let inputs: serde_json::Map<String, serde_json::Value> = invocation
      .inputs
      .iter()
      .map(|(label, id)| (label.clone(), json!({ "id": id })))
      .collect();
    let request = self
      .request(
        Method::POST,
        &format!("api/workflows/{}/invocations", invocation.remote_workflow_id),
      )?
      .json(&json!({
        "history_id": invocation.workspace_id,
        "inputs": inputs,
        "inputs_by": "name",
        "parameters": invocation.parameters,
      }));
    let run: IdResponse = self.send_json(request).await?;
    Ok(run.id)
  }

  async fn get_run_status(&self, run_id: &str) -> Result<RunStatus, BackendError> {
    let request = self.request(Method::GET, &format!("api/invocations/{}/status", run_id))?;
    self.send_json(request).await
  }

  async fn list_output_datasets(&self, run_id: &str) -> Result<Vec<OutputDataset>, BackendError> {
    let request = self.request(Method::GET, &format!("api/invocations/{}/outputs", run_id))?;
    self.send_json(request).await
  }

  async fn download_dataset(
    &self,
    output: &OutputDataset,
    dir: &Path,
  ) -> Result<PathBuf, BackendError> {
    let request = self.request(
      Method::GET,
      &format!("api/datasets/{}/display", output.dataset_id),
    )?;
    let bytes = self
      .send(request)
      .await?
      .bytes()
      .await
      .map_err(classify_reqwest)?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&output.file_name);
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
  }

  async fn get_provenance(&self, output: &OutputDataset) -> Result<ExecutionGraph, BackendError> {
    let request = self.request(
      Method::GET,
      &format!("api/datasets/{}/provenance", output.dataset_id),
    )?;
    self.send_json(request).await
  }

  async fn delete_workspace(&self, workspace_id: &str) -> Result<(), BackendError> {
    let request = self
      .request(Method::DELETE, &format!("api/histories/{}", workspace_id))?
      .query(&[("purge", "true")]);
    self.send(request).await?;
    Ok(())
  }
}
