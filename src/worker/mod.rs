//! Workers executing structure and evaluation jobs.
//!
//! A [`Worker`] turns a proxy structure into a materialized one and scores
//! configurations against a dataset. The worker pool calls it from its tasks
//! and converts the outcome into a job completion.

pub mod synthetic;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::model::{CandidateStructure, Configuration, Dataset, EvaluationResult};
use crate::scheduler::EvaluationJob;

pub use synthetic::SyntheticWorker;

/// Outcome of an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Configuration the worker resolved itself; `None` when it evaluated the
    /// configuration submitted with the job.
    pub config: Option<Configuration>,
    pub result: EvaluationResult,
}

/// Executes jobs on behalf of the worker pool.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Materializes a proxy structure.
    async fn materialize(
        &self,
        dataset: &Dataset,
        candidate: &CandidateStructure,
    ) -> Result<CandidateStructure, WorkerError>;

    /// Evaluates the configuration of `job`, resolving one first if the job
    /// was submitted without configuration.
    async fn evaluate(&self, job: &EvaluationJob) -> Result<Evaluation, WorkerError>;
}
