//! Seqflow Pipeline
//!
//! Drives analysis submissions through their lifecycle:
//!
//! ```text
//! NEW -> PREPARING -> SUBMITTED -> RUNNING -> FINISHED_RUNNING -> COMPLETING -> COMPLETED
//!   \________\____________\__________\_______________\________________\-----> ERROR
//! ```
//!
//! Components:
//! - [`WorkspaceBuilder`]: validation and remote workspace preparation
//! - [`WorkflowInvoker`]: parameter resolution and run submission
//! - [`classify_run_status`]: backend status vocabulary to pipeline phase
//! - [`ResultTransfer`]: output download and provenance reconstruction
//! - [`CleanupHandler`]: executes the compensations registered by earlier stages
//! - [`Pipeline`]: the stage functions, one compare-and-set per transition
//! - [`Scheduler`]: fixed-delay ticks fanning stage tasks out to a bounded pool

mod cleanup;
mod error;
mod events;
mod invoker;
mod monitor;
mod provenance;
mod scheduler;
mod stages;
mod transfer;
mod updater;
mod workspace;

pub use cleanup::CleanupHandler;
pub use error::{Disposition, StageError, UpdaterError, ValidationError};
pub use events::{ChannelNotifier, EventNotifier, NoopNotifier, PipelineEvent};
pub use invoker::WorkflowInvoker;
pub use monitor::{RunPhase, classify_run_status};
pub use provenance::{add_graph, build_provenance};
pub use scheduler::Scheduler;
pub use stages::{Pipeline, Stage};
pub use transfer::ResultTransfer;
pub use updater::{SampleUpdater, SampleUpdaterRegistry, TabularMetadataUpdater};
pub use workspace::{PreparedWorkspace, ValidatedInputs, WorkspaceBuilder};
