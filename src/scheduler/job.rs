//! Job definitions for the scheduler.
//!
//! This module defines the units of asynchronous work handed to a dispatcher:
//!
//! - `StructureJob`: materializes a proxy structure
//! - `EvaluationJob`: evaluates one configuration of a materialized structure
//! - `Job`: the two kinds behind one type, as submitted to a `Dispatcher`
//!
//! A job is `Pending` from construction until it is completed; completion
//! records the outcome, moves it to `Completed` and invokes its callback. A
//! job completes at most once: later completions are ignored. There is no
//! retry state; a failed job is terminal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CacheKey, CandidateId, CandidateStructure, Configuration, Dataset, EvaluationResult};

/// Completion callback attached to a job by the scheduler before submission.
pub type JobCallback<J> = Arc<dyn Fn(&J) + Send + Sync>;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted, not yet completed.
    Pending,
    /// Outcome recorded and callback invoked.
    Completed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Completed => write!(f, "completed"),
        }
    }
}

/// Kind of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Structure,
    Evaluation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Structure => "structure",
            JobKind::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Materializes a proxy structure.
pub struct StructureJob {
    pub id: Uuid,
    pub dataset: Arc<Dataset>,
    /// The proxy to materialize.
    pub candidate: CandidateStructure,
    pub cutoff: Option<Duration>,
    pub state: JobState,
    /// Materialized structure; `None` if the worker produced nothing.
    pub result: Option<CandidateStructure>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    callback: Option<JobCallback<StructureJob>>,
}

impl StructureJob {
    pub fn new(dataset: Arc<Dataset>, candidate: CandidateStructure, cutoff: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset,
            candidate,
            cutoff,
            state: JobState::Pending,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            callback: None,
        }
    }

    /// Sets the completion callback.
    pub fn with_callback(mut self, callback: JobCallback<StructureJob>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn cid(&self) -> CandidateId {
        self.candidate.cid
    }

    /// Records the outcome and invokes the callback.
    ///
    /// Returns `false` without doing anything if the job already completed.
    pub fn complete(&mut self, outcome: Result<CandidateStructure, String>) -> bool {
        if self.state == JobState::Completed {
            return false;
        }
        match outcome {
            Ok(structure) => self.result = Some(structure),
            Err(error) => self.error = Some(error),
        }
        self.state = JobState::Completed;
        if let Some(callback) = self.callback.take() {
            callback(self);
        }
        true
    }
}

impl fmt::Debug for StructureJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureJob")
            .field("id", &self.id)
            .field("cid", &self.candidate.cid)
            .field("state", &self.state)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Evaluates one configuration of a materialized structure.
pub struct EvaluationJob {
    pub id: Uuid,
    pub dataset: Arc<Dataset>,
    /// Id of the evaluated configuration.
    pub cid: CandidateId,
    /// Snapshot of the owning structure at submission time.
    pub structure: CandidateStructure,
    pub cutoff: Option<Duration>,
    /// Configuration to evaluate. `None` in lazy mode until the worker
    /// resolves one from `cfg_keys`.
    pub config: Option<Configuration>,
    /// Cache key of the pre-sampled configuration.
    pub cfg_key: Option<CacheKey>,
    /// Cached keys the worker may resolve a configuration from.
    pub cfg_keys: Vec<CacheKey>,
    pub state: JobState,
    pub result: Option<EvaluationResult>,
    pub submitted_at: DateTime<Utc>,
    callback: Option<JobCallback<EvaluationJob>>,
}

impl EvaluationJob {
    pub fn new(
        dataset: Arc<Dataset>,
        cid: CandidateId,
        structure: CandidateStructure,
        cutoff: Option<Duration>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset,
            cid,
            structure,
            cutoff,
            config: None,
            cfg_key: None,
            cfg_keys: Vec::new(),
            state: JobState::Pending,
            result: None,
            submitted_at: Utc::now(),
            callback: None,
        }
    }

    /// Attaches an eagerly sampled configuration.
    pub fn with_config(mut self, config: Configuration, key: CacheKey) -> Self {
        self.config = Some(config);
        self.cfg_key = Some(key);
        self
    }

    /// Attaches cached keys for lazy resolution by the worker.
    pub fn with_cfg_keys(mut self, keys: Vec<CacheKey>) -> Self {
        self.cfg_keys = keys;
        self
    }

    /// Sets the completion callback.
    pub fn with_callback(mut self, callback: JobCallback<EvaluationJob>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Id of the owning structure.
    pub fn structure_id(&self) -> CandidateId {
        self.structure.cid
    }

    /// Records the outcome and invokes the callback.
    ///
    /// A configuration resolved by the worker replaces the submitted one.
    /// Returns `false` without doing anything if the job already completed.
    pub fn complete(&mut self, config: Option<Configuration>, result: EvaluationResult) -> bool {
        if self.state == JobState::Completed {
            return false;
        }
        if config.is_some() {
            self.config = config;
        }
        self.result = Some(result);
        self.state = JobState::Completed;
        if let Some(callback) = self.callback.take() {
            callback(self);
        }
        true
    }
}

impl fmt::Debug for EvaluationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationJob")
            .field("id", &self.id)
            .field("cid", &self.cid)
            .field("state", &self.state)
            .field("has_config", &self.config.is_some())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// A unit of work submitted to a dispatcher.
#[derive(Debug)]
pub enum Job {
    Structure(StructureJob),
    Evaluation(EvaluationJob),
}

impl Job {
    pub fn id(&self) -> Uuid {
        match self {
            Job::Structure(job) => job.id,
            Job::Evaluation(job) => job.id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Job::Structure(_) => JobKind::Structure,
            Job::Evaluation(_) => JobKind::Evaluation,
        }
    }

    /// Candidate id of the structure or configuration this job works on.
    pub fn cid(&self) -> CandidateId {
        match self {
            Job::Structure(job) => job.cid(),
            Job::Evaluation(job) => job.cid,
        }
    }

    pub fn cutoff(&self) -> Option<Duration> {
        match self {
            Job::Structure(job) => job.cutoff,
            Job::Evaluation(job) => job.cutoff,
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Job::Structure(job) => job.state,
            Job::Evaluation(job) => job.state,
        }
    }
}

impl From<StructureJob> for Job {
    fn from(job: StructureJob) -> Self {
        Job::Structure(job)
    }
}

impl From<EvaluationJob> for Job {
    fn from(job: EvaluationJob) -> Self {
        Job::Evaluation(job)
    }
}
