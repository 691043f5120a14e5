//! Seqflow Processing
//!
//! Every uploaded sequencing object passes through an ordered chain of
//! [`FileProcessor`]s before it can be used in a submission. The chain is
//! launched from a different task than the one that stored the object, so it
//! first waits for the object to become visible.
//!
//! ```text
//! launch(auth, object_id)
//!   └─ wait until visible (poll, bounded attempts) ── Timeout
//!        └─ for each processor:
//!             should_process? → process
//!               failure → QC entry on the sample
//!                 modifies file or fast-fail → abort chain
//!                 otherwise                  → ignored, continue
//! ```

mod chain;
mod error;
mod gzip;
mod launcher;
mod processor;
mod stats;

pub use chain::FileProcessingChain;
pub use error::{ChainError, ProcessorError, ProcessorFailure};
pub use gzip::GzipFileProcessor;
pub use launcher::ProcessingLauncher;
pub use processor::{FileProcessor, ProcessingContext};
pub use stats::{ReadStatisticsProcessor, compute_statistics};
