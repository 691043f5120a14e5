//! Post-completion updates of sample metadata from analysis outputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use seqflow_config::SampleUpdaterConfig;
use seqflow_model::{Analysis, AnalysisType};
use seqflow_store::Store;
use tracing::debug;

use crate::error::UpdaterError;

/// Writes results of a completed analysis back onto its samples.
#[async_trait]
pub trait SampleUpdater: Send + Sync {
  /// The analysis type this updater handles.
  fn analysis_type(&self) -> &AnalysisType;

  async fn update(&self, sample_ids: &[String], analysis: &Analysis) -> Result<(), UpdaterError>;
}

/// Sample updaters keyed by analysis type.
#[derive(Default, Clone)]
pub struct SampleUpdaterRegistry {
  updaters: HashMap<AnalysisType, Arc<dyn SampleUpdater>>,
}

impl SampleUpdaterRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Tabular updaters declared in the engine configuration.
  pub fn from_config(store: Arc<dyn Store>, configs: &[SampleUpdaterConfig]) -> Self {
    let mut registry = Self::new();
    for config in configs {
      registry.register(Arc::new(TabularMetadataUpdater::new(
        store.clone(),
        AnalysisType::new(config.analysis_type.clone()),
        config.output_role.clone(),
        config.prefix.clone(),
      )));
    }
    registry
  }

  /// Register an updater, replacing any earlier one for the same type.
  pub fn register(&mut self, updater: Arc<dyn SampleUpdater>) {
    self
      .updaters
      .insert(updater.analysis_type().clone(), updater);
  }

  pub fn get(&self, analysis_type: &AnalysisType) -> Option<&Arc<dyn SampleUpdater>> {
    self.updaters.get(analysis_type)
  }

  pub fn is_empty(&self) -> bool {
    self.updaters.is_empty()
  }
}

/// Copies a two-line tab-separated output (header row, value row) onto every
/// sample as metadata, with each key prefixed.
pub struct TabularMetadataUpdater {
  store: Arc<dyn Store>,
  analysis_type: AnalysisType,
  output_role: String,
  prefix: String,
}

impl TabularMetadataUpdater {
  pub fn new(
    store: Arc<dyn Store>,
    analysis_type: AnalysisType,
    output_role: impl Into<String>,
    prefix: impl Into<String>,
  ) -> Self {
    Self {
      store,
      analysis_type,
      output_role: output_role.into(),
      prefix: prefix.into(),
    }
  }

  fn parse(&self, content: &str) -> Result<BTreeMap<String, String>, UpdaterError> {
    let malformed = |e: csv::Error| UpdaterError::Malformed {
      message: e.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
      .delimiter(b'\t')
      .trim(csv::Trim::All)
      .from_reader(content.as_bytes());

    let header = reader.headers().map_err(malformed)?.clone();
    let Some(values) = reader.records().next() else {
      return Err(UpdaterError::Malformed {
        message: "expected a header row and a value row".to_string(),
      });
    };
    let values = values.map_err(malformed)?;

    Ok(
      header
        .iter()
        .zip(values.iter())
        .map(|(key, value)| (format!("{}{}", self.prefix, key), value.to_string()))
        .collect(),
    )
  }
}

#[async_trait]
impl SampleUpdater for TabularMetadataUpdater {
  fn analysis_type(&self) -> &AnalysisType {
    &self.analysis_type
  }

  async fn update(&self, sample_ids: &[String], analysis: &Analysis) -> Result<(), UpdaterError> {
    let output = analysis
      .output(&self.output_role)
      .ok_or_else(|| UpdaterError::MissingOutput {
        role: self.output_role.clone(),
      })?;
    let content = tokio::fs::read_to_string(&output.path).await?;
    let entries = self.parse(&content)?;

    for sample_id in sample_ids {
      self.store.merge_sample_metadata(sample_id, &entries).await?;
    }
    debug!(
      analysis_id = %analysis.analysis_id,
      samples = sample_ids.len(),
      entries = entries.len(),
      "sample_metadata_updated"
    );
    Ok(())
  }
}
