//! Seqflow Model
//!
//! Domain types shared by every seqflow crate. Nothing in here performs I/O;
//! the store persists these values and the pipeline moves them through the
//! submission state machine.
//!
//! Key types:
//! - [`AnalysisSubmission`] and its [`SubmissionState`] lifecycle
//! - [`SequencingObject`]: one sample's single-end file or paired-end pair
//! - [`Analysis`]: the immutable result of a completed submission
//! - [`ProvenanceArena`]: the tool-execution DAG behind each output file

mod analysis;
mod auth;
mod parameters;
mod provenance;
mod qc;
mod sequencing;
mod submission;

pub use analysis::{Analysis, AnalysisOutputFile, AnalysisType};
pub use auth::AuthContext;
pub use parameters::{NamedParameterSet, ParameterSource};
pub use provenance::{ProvenanceArena, ToolExecution};
pub use qc::{QcEntry, QcEntryKind};
pub use sequencing::{
  QualityEncoding, ReadStatistics, ReferenceFile, SequenceFile, SequencingObject,
  SequencingObjectKind,
};
pub use submission::{
  AnalysisSubmission, CleanupState, Compensation, ParseStateError, SubmissionState,
};

/// Generate a new random identifier.
pub fn new_id() -> String {
  uuid::Uuid::new_v4().to_string()
}
