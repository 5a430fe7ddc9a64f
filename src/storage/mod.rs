//! Result persistence.
//!
//! The scheduler reports every evaluated configuration and every materialized
//! structure to a [`ResultLogger`] and reads the recorded [`RunHistory`] back
//! once the run ends.
//!
//! # Backends
//!
//! - **JsonResultLogger**: JSON lines `results.json` / `structures.json` in a
//!   working directory, reloadable by a later `pipeforge history`
//! - **InMemoryResultLogger**: keeps everything in memory; used by tests and
//!   library callers that do not need files
//!
//! # Usage
//!
//! ```rust,ignore
//! use pipeforge::storage::{JsonResultLogger, ResultLogger};
//!
//! let logger = JsonResultLogger::new("runs/iris", true)?;
//! logger.log_evaluated_config(&cid, &result)?;
//! let history = logger.load()?;
//! println!("{:?}", history.incumbent());
//! ```

pub mod history;
pub mod json;
pub mod memory;

use crate::error::StorageError;
use crate::model::{CandidateId, CandidateStructure, EvaluationResult};

pub use history::{EvaluationRecord, Incumbent, RunHistory, RunMetadata};
pub use json::JsonResultLogger;
pub use memory::InMemoryResultLogger;

/// Sink for run results.
///
/// Called from completion callbacks; implementations must be safe for
/// concurrent use and must not block for long.
pub trait ResultLogger: Send + Sync {
    fn log_evaluated_config(&self, cid: &CandidateId, result: &EvaluationResult) -> Result<(), StorageError>;

    fn new_structure(&self, structure: &CandidateStructure) -> Result<(), StorageError>;

    /// Reads back everything logged so far.
    fn load(&self) -> Result<RunHistory, StorageError>;
}
