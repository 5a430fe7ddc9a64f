//! pipeforge: adaptive search scheduler for candidate ML pipelines.
//!
//! A [`scheduler::Scheduler`] alternates between proposing pipeline
//! structures and sampling configurations for them, dispatching evaluations
//! to a worker pool until its wall-clock budget runs out.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod proposer;
pub mod sampler;
pub mod scheduler;
pub mod storage;
pub mod worker;

// Re-export commonly used error types
pub use config::ConfigError;
pub use error::{CatalogueError, SamplerError, SchedulerError, StorageError, WorkerError};
pub use scheduler::DispatchError;
