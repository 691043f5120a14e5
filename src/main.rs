use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use seqflow_backend::HttpBackend;
use seqflow_config::EngineConfig;
use seqflow_model::AuthContext;
use seqflow_pipeline::{Pipeline, Scheduler};
use seqflow_processing::{
  FileProcessingChain, FileProcessor, GzipFileProcessor, ProcessingLauncher,
  ReadStatisticsProcessor,
};
use seqflow_registry::FsWorkflowRegistry;
use seqflow_store::{SqliteStore, Store};

/// seqflow - submits sequencing analyses to a remote workflow engine
#[derive(Parser)]
#[command(name = "seqflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.seqflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine configuration file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Database URL (default: sqlite in the data directory)
  #[arg(long, global = true)]
  database_url: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the scheduler until interrupted
  Run {
    /// Base URL of the execution backend
    #[arg(long)]
    backend_url: String,

    /// API key for the execution backend
    #[arg(long, env = "SEQFLOW_API_KEY")]
    api_key: Option<String>,

    /// Backend request timeout in seconds
    #[arg(long, default_value_t = 60)]
    backend_timeout: u64,

    /// Directory of installed workflows (default: <data-dir>/workflows)
    #[arg(long)]
    workflows_dir: Option<PathBuf>,
  },

  /// Print a submission as JSON
  Status {
    submission_id: String,
  },

  /// Run the file processing chain for one sequencing object
  Process {
    object_id: String,
  },

  /// Request cancellation of a submission
  Cancel {
    submission_id: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".seqflow"),
  };

  let Some(command) = cli.command else {
    println!("seqflow - use --help to see available commands");
    return Ok(());
  };

  let mut config = match &cli.config {
    Some(path) => EngineConfig::from_file(path)
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => EngineConfig::default(),
  };
  if config.work_dir.is_relative() {
    config.work_dir = data_dir.join(&config.work_dir);
  }
  let database_url = cli.database_url.unwrap_or_else(|| {
    format!("sqlite://{}", data_dir.join("seqflow.db").display())
  });

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    std::fs::create_dir_all(&data_dir)
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let store = open_store(&database_url).await?;

    match command {
      Commands::Run {
        backend_url,
        api_key,
        backend_timeout,
        workflows_dir,
      } => {
        let workflows_dir = workflows_dir.unwrap_or_else(|| data_dir.join("workflows"));
        run_scheduler(
          store,
          config,
          &backend_url,
          api_key,
          Duration::from_secs(backend_timeout),
          workflows_dir,
        )
        .await
      }
      Commands::Status { submission_id } => print_status(store, &submission_id).await,
      Commands::Process { object_id } => process_object(store, config, object_id).await,
      Commands::Cancel { submission_id } => {
        store
          .request_cancellation(&submission_id)
          .await
          .with_context(|| format!("failed to cancel submission {}", submission_id))?;
        eprintln!("Cancellation requested for {}", submission_id);
        Ok(())
      }
    }
  })
}

async fn open_store(database_url: &str) -> Result<Arc<dyn Store>> {
  let store = SqliteStore::connect(database_url)
    .await
    .with_context(|| format!("failed to open database: {}", database_url))?;
  store
    .migrate()
    .await
    .context("failed to run database migrations")?;
  Ok(Arc::new(store))
}

async fn run_scheduler(
  store: Arc<dyn Store>,
  config: EngineConfig,
  backend_url: &str,
  api_key: Option<String>,
  timeout: Duration,
  workflows_dir: PathBuf,
) -> Result<()> {
  let backend = HttpBackend::new(backend_url, api_key, timeout)
    .context("failed to create backend client")?;
  let registry = FsWorkflowRegistry::new(&workflows_dir);
  info!(
    workflows_dir = %workflows_dir.display(),
    work_dir = %config.work_dir.display(),
    sample_updaters = config.sample_updaters.len(),
    "seqflow_starting"
  );

  let pipeline = Arc::new(Pipeline::new(
    store,
    Arc::new(backend),
    Arc::new(registry),
    &config,
  ));
  let scheduler = Scheduler::new(pipeline, config);

  let cancel = CancellationToken::new();
  let shutdown = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Shutting down...");
    }
    shutdown.cancel();
  });

  scheduler.run(cancel).await;
  Ok(())
}

async fn print_status(store: Arc<dyn Store>, submission_id: &str) -> Result<()> {
  let submission = store
    .get_submission(submission_id)
    .await
    .with_context(|| format!("failed to load submission {}", submission_id))?;
  println!("{}", serde_json::to_string_pretty(&submission)?);
  Ok(())
}

async fn process_object(store: Arc<dyn Store>, config: EngineConfig, object_id: String) -> Result<()> {
  let processors: Vec<Arc<dyn FileProcessor>> = vec![
    Arc::new(GzipFileProcessor::new(store.clone())) as Arc<dyn FileProcessor>,
    Arc::new(ReadStatisticsProcessor::new(store.clone())),
  ];
  let chain = Arc::new(FileProcessingChain::new(store, processors, &config));
  let launcher = ProcessingLauncher::new(chain, config.processing_pool_size);

  let principal = std::env::var("USER").unwrap_or_else(|_| "seqflow".to_string());
  let ignored = launcher
    .launch(AuthContext::new(principal), object_id.clone())
    .await
    .context("processing task failed")?
    .with_context(|| format!("processing chain failed for {}", object_id))?;

  eprintln!("Processed {} ({} ignored failure(s))", object_id, ignored.len());
  for failure in ignored {
    eprintln!("  {}: {}", failure.processor, failure.message);
  }
  Ok(())
}
