//! Error types for pipeforge operations.
//!
//! Defines error types for the major subsystems:
//! - The search scheduler and its control loop
//! - Configuration sampling and cache lookups
//! - Result persistence and run history loading
//! - Worker-side structure materialization and evaluation

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::CandidateId;
use crate::scheduler::worker_pool::DispatchError;

/// Errors surfaced by the search scheduler.
///
/// Expected termination causes (timeout, proposer exhaustion, interrupts and
/// fatal aborts) are not errors; they are reported through
/// [`crate::scheduler::Termination`]. This enum covers setup failures and the
/// step failures that cause a fatal abort.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Stuck in endless loop after {attempts} consecutive empty proposals with no structure in flight")]
    Stuck { attempts: u32 },

    #[error("Structure {0} is not present in the run registry")]
    UnknownStructure(CandidateId),
}

/// Errors that can occur while sampling or resolving configurations.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Configuration space '{0}' has no hyperparameters to sample")]
    EmptySpace(String),

    #[error("Invalid hyperparameter '{name}': {reason}")]
    InvalidHyperparameter { name: String, reason: String },

    #[error("Unknown cache key {fingerprint}#{index}")]
    UnknownKey { fingerprint: String, index: usize },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while persisting or loading run results.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupted log line {line} in '{file}': {reason}")]
    CorruptedLog {
        file: String,
        line: usize,
        reason: String,
    },
}

/// Errors raised by workers while running a job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Structure {0} cannot be materialized: {1}")]
    Materialization(CandidateId, String),

    #[error("Evaluation of {0} failed: {1}")]
    Evaluation(CandidateId, String),

    #[error("No configuration could be resolved for {0}")]
    MissingConfiguration(CandidateId),

    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),
}

/// Errors that can occur while loading a structure catalogue.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Catalogue contains no templates")]
    Empty,

    #[error("Template '{0}' is defined more than once")]
    DuplicateTemplate(String),

    #[error("Template '{template}' has an invalid configuration space: {source}")]
    InvalidSpace {
        template: String,
        #[source]
        source: SamplerError,
    },
}
