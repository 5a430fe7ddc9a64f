//! The search scheduler.
//!
//! One control loop decides at every step whether to evaluate another
//! configuration of an incomplete structure or to pull a new candidate from
//! the structure proposer, and submits the resulting job to the dispatcher.
//! Completion callbacks merge results back into the shared state.
//!
//! # Concurrency
//!
//! All bookkeeping (the incomplete-structures table, the structure registry,
//! `running_structures`, the fail-safe counter) lives in one
//! `std::sync::Mutex`. The lock is never held across an `.await`. A
//! [`Notify`] plays the condition variable: the loop arms a notification
//! while still holding the lock, so a structure completion landing between
//! the unlock and the wait is not lost.
//!
//! The loop suspends in three places only: waiting for an outstanding
//! structure job, the fail-safe delay, and dispatcher back-pressure. Every
//! one of them is bounded by the wall-clock deadline and the interrupt token.
//!
//! # Termination
//!
//! ```text
//!  selecting-work ──► submit ──► selecting-work
//!        │
//!        ├──► block (structures in flight) ──► selecting-work
//!        ├──► timeout-reached
//!        ├──► proposer-exhausted (nothing issued in a repetition)
//!        ├──► interrupted
//!        └──► aborted-fatal (stuck proposer, dispatcher or sampler failure)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::model::{CandidateId, CandidateStructure, Configuration, Dataset, EvaluationResult};
use crate::proposer::{Proposal, StructureProposer};
use crate::sampler::random::create_rng;
use crate::sampler::ConfigSampler;
use crate::storage::{Incumbent, ResultLogger, RunHistory, RunMetadata};

use super::job::{EvaluationJob, Job, JobCallback, StructureJob};
use super::table::IncompleteStructures;
use super::worker_pool::Dispatcher;

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The wall-clock limit was exceeded.
    TimeoutReached,
    /// A repetition ended without the proposer issuing anything.
    ProposerExhausted,
    /// The interrupt token was cancelled.
    Interrupted,
    /// A fatal error stopped the loop.
    Aborted { reason: String },
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::TimeoutReached => write!(f, "timeout reached"),
            Termination::ProposerExhausted => write!(f, "proposer exhausted"),
            Termination::Interrupted => write!(f, "interrupted"),
            Termination::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub termination: Termination,
    /// Best successful evaluation, if any.
    pub incumbent: Option<Incumbent>,
    pub history: RunHistory,
    pub meta: RunMetadata,
}

/// The services a scheduler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub proposer: Arc<dyn StructureProposer>,
    pub sampler: Arc<dyn ConfigSampler>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub logger: Arc<dyn ResultLogger>,
}

/// Point-in-time view of the scheduler bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    /// `(structure, remaining, running)` for every incomplete structure.
    pub incomplete: Vec<(CandidateId, u32, u32)>,
    pub running_structures: usize,
    pub fail_safe: u32,
    /// Results recorded per structure.
    pub results: HashMap<CandidateId, usize>,
}

impl SchedulerSnapshot {
    pub fn entry(&self, cid: &CandidateId) -> Option<(u32, u32)> {
        self.incomplete
            .iter()
            .find(|(id, _, _)| id == cid)
            .map(|(_, remaining, running)| (*remaining, *running))
    }
}

struct SearchState {
    table: IncompleteStructures,
    /// Every materialized structure with its authoritative results.
    structures: HashMap<CandidateId, CandidateStructure>,
    running_structures: usize,
    fail_safe: u32,
    /// Jobs whose completion was already merged.
    completed_jobs: HashSet<Uuid>,
    rng: ChaCha8Rng,
}

/// What one step decided while holding the lock.
enum Action {
    Submit(Job),
    /// A materialized candidate was registered; nothing to submit.
    Registered,
    WaitForStructures,
    RetryLater,
    Exhausted,
}

enum RepetitionEnd {
    Timeout,
    Exhausted { submitted: usize },
    Interrupted,
}

/// State shared between the control loop and the completion callbacks.
struct SearchCore {
    config: SchedulerConfig,
    dataset: Arc<Dataset>,
    proposer: Arc<dyn StructureProposer>,
    sampler: Arc<dyn ConfigSampler>,
    logger: Arc<dyn ResultLogger>,
    state: Mutex<SearchState>,
    wake: Notify,
    metrics: MetricsCollector,
}

impl SearchCore {
    fn lock(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SearchState) {
        self.metrics
            .set_structures(state.table.len(), state.running_structures);
    }

    /// Steps 1 and 2 of the loop: claim a configuration slot or pull a
    /// candidate. All bookkeeping happens here, under the lock.
    fn select_work(
        &self,
        state: &mut SearchState,
        evaluation_callback: &JobCallback<EvaluationJob>,
        structure_callback: &JobCallback<StructureJob>,
    ) -> Result<Action, SchedulerError> {
        if let Some(cid) = state.table.select(self.config.selection_policy, &mut state.rng) {
            let completed = state.structures.get(&cid).map_or(0, |s| s.results.len());
            let claim = state
                .table
                .claim(&cid, completed)
                .ok_or(SchedulerError::UnknownStructure(cid))?;

            let mut job = EvaluationJob::new(
                Arc::clone(&self.dataset),
                claim.config_id,
                claim.structure.clone(),
                self.config.cutoff,
            )
            .with_callback(Arc::clone(evaluation_callback));
            if self.config.pre_sample {
                let (config, key) = self
                    .sampler
                    .sample(&claim.structure.configspace, &self.dataset.meta_features)?;
                job = job.with_config(config, key);
            } else {
                job = job.with_cfg_keys(claim.structure.cfg_keys.clone());
            }
            if claim.removed {
                debug!(cid = %cid, "Last configuration of structure claimed");
            }
            return Ok(Action::Submit(job.into()));
        }

        match self.proposer.next() {
            Proposal::NotReadyYet if state.running_structures > 0 => Ok(Action::WaitForStructures),
            Proposal::NotReadyYet => {
                state.fail_safe += 1;
                if state.fail_safe >= self.config.fail_safe_threshold {
                    error!(
                        attempts = state.fail_safe,
                        "Stuck in endless loop, aborting optimization (fatal)"
                    );
                    return Err(SchedulerError::Stuck {
                        attempts: state.fail_safe,
                    });
                }
                warn!(
                    attempts = state.fail_safe,
                    delay = ?self.config.fail_safe_delay,
                    "Proposer not ready with no structure in flight, retrying"
                );
                Ok(Action::RetryLater)
            }
            Proposal::Exhausted => Ok(Action::Exhausted),
            Proposal::Candidate(candidate) => {
                state.fail_safe = 0;
                if candidate.is_proxy() {
                    state.running_structures += 1;
                    let job = StructureJob::new(Arc::clone(&self.dataset), candidate, self.config.cutoff)
                        .with_callback(Arc::clone(structure_callback));
                    Ok(Action::Submit(job.into()))
                } else {
                    self.register_structure(state, candidate)?;
                    Ok(Action::Registered)
                }
            }
        }
    }

    /// Adds a materialized structure to the registry and the table.
    fn register_structure(
        &self,
        state: &mut SearchState,
        structure: CandidateStructure,
    ) -> Result<(), SchedulerError> {
        let cid = structure.cid;
        if !state.table.insert(structure.clone()) {
            debug!(cid = %cid, "Structure has no budget, nothing to evaluate");
        }
        state.structures.insert(cid, structure.clone());
        self.logger.new_structure(&structure)?;
        Ok(())
    }

    fn on_evaluation_complete(&self, job: &EvaluationJob) {
        let mut state = self.lock();
        if !state.completed_jobs.insert(job.id) {
            warn!(cid = %job.cid, job_id = %job.id, "Ignoring repeated evaluation completion");
            return;
        }

        if let Err(e) = self.record_evaluation(&mut state, job) {
            error!(cid = %job.cid, error = %e, "Unhandled error in evaluation callback (fatal)");
        }

        // The remaining budget was consumed at submission time.
        state.table.release(&job.structure_id());
        self.publish(&state);
    }

    fn record_evaluation(&self, state: &mut SearchState, job: &EvaluationJob) -> Result<(), SchedulerError> {
        let config = match &job.config {
            Some(config) => config.clone(),
            None => {
                error!(cid = %job.cid, "Encountered job without a configuration, using empty configuration as fallback");
                Configuration::empty()
            }
        };
        let result = job
            .result
            .clone()
            .unwrap_or_else(|| EvaluationResult::crashed("Job completed without result", Duration::ZERO))
            .with_config(config);

        // Counted before logging: the index of the next claim depends on it.
        let structure = state
            .structures
            .entry(job.structure_id())
            .or_insert_with(|| job.structure.clone());
        structure.add_result(result.clone());

        self.sampler.register_result(job);
        self.proposer.register_result(structure, &result);
        if let Some(loss) = result.loss {
            self.metrics.record_loss(loss);
        }

        self.logger.log_evaluated_config(&job.cid, &result)?;
        Ok(())
    }

    fn on_structure_complete(&self, job: &StructureJob) {
        let mut state = self.lock();
        if !state.completed_jobs.insert(job.id) {
            warn!(cid = %job.cid(), job_id = %job.id, "Ignoring repeated structure completion");
            return;
        }

        match &job.result {
            Some(structure) if !structure.is_proxy() => {
                info!(cid = %structure.cid, template = %structure.template, budget = structure.budget, "Structure materialized");
                if let Err(e) = self.register_structure(&mut state, structure.clone()) {
                    error!(cid = %structure.cid, error = %e, "Unhandled error in structure callback (fatal)");
                }
            }
            _ => error!(
                cid = %job.cid(),
                error = job.error.as_deref().unwrap_or("result is still a proxy"),
                "Encountered job without a structure"
            ),
        }

        state.running_structures = state.running_structures.saturating_sub(1);
        self.publish(&state);
        drop(state);
        self.wake.notify_waiters();
    }
}

/// Drives a search to timeout, exhaustion, interrupt or fatal abort.
pub struct Scheduler {
    core: Arc<SearchCore>,
    dispatcher: Arc<dyn Dispatcher>,
    interrupt: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler after validating `config`.
    pub fn new(
        config: SchedulerConfig,
        dataset: Arc<Dataset>,
        collaborators: Collaborators,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let rng = create_rng(config.seed);
        let core = SearchCore {
            dataset,
            proposer: collaborators.proposer,
            sampler: collaborators.sampler,
            logger: collaborators.logger,
            state: Mutex::new(SearchState {
                table: IncompleteStructures::new(),
                structures: HashMap::new(),
                running_structures: 0,
                fail_safe: 0,
                completed_jobs: HashSet::new(),
                rng,
            }),
            wake: Notify::new(),
            metrics: MetricsCollector::new(),
            config,
        };
        Ok(Self {
            core: Arc::new(core),
            dispatcher: collaborators.dispatcher,
            interrupt: CancellationToken::new(),
        })
    }

    /// Uses an externally owned interrupt token.
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    /// Token whose cancellation stops the run at the next step.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Callback merging evaluation completions into the scheduler state.
    pub fn evaluation_callback(&self) -> JobCallback<EvaluationJob> {
        let core = Arc::clone(&self.core);
        Arc::new(move |job: &EvaluationJob| core.on_evaluation_complete(job))
    }

    /// Callback merging structure completions into the scheduler state.
    pub fn structure_callback(&self) -> JobCallback<StructureJob> {
        let core = Arc::clone(&self.core);
        Arc::new(move |job: &StructureJob| core.on_structure_complete(job))
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.core.lock();
        let mut incomplete: Vec<_> = state
            .structures
            .keys()
            .filter_map(|cid| state.table.get(cid).map(|e| (*cid, e.remaining, e.running)))
            .collect();
        incomplete.sort();
        SchedulerSnapshot {
            incomplete,
            running_structures: state.running_structures,
            fail_safe: state.fail_safe,
            results: state
                .structures
                .iter()
                .map(|(cid, s)| (*cid, s.results.len()))
                .collect(),
        }
    }

    /// Runs the search.
    ///
    /// Termination causes are reported in the outcome; `Err` is returned only
    /// when the recorded history cannot be loaded.
    pub async fn run(&self) -> Result<SearchOutcome, SchedulerError> {
        let config = &self.core.config;
        let start = Utc::now();
        let deadline = Instant::now() + config.wallclock_limit;
        info!(
            start = %start.to_rfc3339(),
            wallclock_limit_secs = config.wallclock_limit.as_secs_f64(),
            cutoff = ?config.cutoff,
            pre_sample = config.pre_sample,
            n_workers = config.n_workers,
            selection_policy = %config.selection_policy,
            "Starting run"
        );

        let mut offset = 0u32;
        let mut repetitions = 0u32;
        let termination = loop {
            if self.interrupt.is_cancelled() {
                break Termination::Interrupted;
            }
            if let Err(e) = self.dispatcher.finish_work().await {
                break self.abort(e.into());
            }

            info!(repetition = repetitions, offset, "Starting repetition");
            self.core.metrics.record_repetition();
            self.core.proposer.reset(offset);
            repetitions += 1;

            match self.run_repetition(deadline).await {
                Ok(RepetitionEnd::Timeout) => break Termination::TimeoutReached,
                Ok(RepetitionEnd::Interrupted) => break Termination::Interrupted,
                Ok(RepetitionEnd::Exhausted { submitted }) => {
                    let issued = self.core.proposer.issued();
                    if submitted == 0 && issued == 0 {
                        info!(repetition = repetitions - 1, "Proposer issued nothing, stopping");
                        break Termination::ProposerExhausted;
                    }
                    offset += issued;
                }
                Err(e) => break self.abort(e),
            }
        };

        if termination == Termination::Interrupted {
            info!("Aborting optimization due to user interrupt");
        }
        // A timeout already drained the dispatcher.
        if termination != Termination::TimeoutReached {
            if let Err(e) = self.dispatcher.finish_work().await {
                warn!(error = %e, "Failed to drain dispatcher");
            }
        }
        if let Err(e) = self.dispatcher.shutdown().await {
            warn!(error = %e, "Dispatcher shutdown failed");
        }

        let end = Utc::now();
        let meta = RunMetadata {
            start,
            end: Some(end),
            wallclock_limit: config.wallclock_limit,
            cutoff: config.cutoff,
            pre_sample: config.pre_sample,
            n_workers: config.n_workers,
            repetitions,
            termination: Some(termination.clone()),
        };
        info!(
            elapsed_secs = meta.elapsed_secs().unwrap_or_default().ceil(),
            termination = %termination,
            "Finished run"
        );

        let history = self.core.logger.load()?.with_meta(meta.clone());
        let incumbent = history.incumbent();
        Ok(SearchOutcome {
            termination,
            incumbent,
            history,
            meta,
        })
    }

    fn abort(&self, e: SchedulerError) -> Termination {
        error!(error = %e, "Aborting optimization (fatal)");
        Termination::Aborted {
            reason: e.to_string(),
        }
    }

    /// One repetition: steps 1 to 4 until timeout, exhaustion or interrupt.
    async fn run_repetition(&self, deadline: Instant) -> Result<RepetitionEnd, SchedulerError> {
        let core = &self.core;
        let evaluation_callback = self.evaluation_callback();
        let structure_callback = self.structure_callback();
        let mut submitted = 0usize;

        loop {
            if self.interrupt.is_cancelled() {
                return Ok(RepetitionEnd::Interrupted);
            }

            let wake = core.wake.notified();
            tokio::pin!(wake);
            let action = {
                let mut state = core.lock();
                // Armed under the lock so a completion after unlocking still wakes us.
                wake.as_mut().enable();
                let action = core.select_work(&mut state, &evaluation_callback, &structure_callback);
                core.publish(&state);
                action?
            };

            let job = match action {
                Action::Submit(job) => Some(job),
                Action::Registered => None,
                Action::Exhausted => return Ok(RepetitionEnd::Exhausted { submitted }),
                Action::WaitForStructures => {
                    debug!("Waiting for next structure to finish");
                    tokio::select! {
                        _ = &mut wake => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.interrupt.cancelled() => return Ok(RepetitionEnd::Interrupted),
                    }
                    None
                }
                Action::RetryLater => {
                    tokio::select! {
                        _ = tokio::time::sleep(core.config.fail_safe_delay) => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.interrupt.cancelled() => return Ok(RepetitionEnd::Interrupted),
                    }
                    None
                }
            };

            if Instant::now() >= deadline {
                info!("Timeout reached, stopping optimization");
                self.dispatcher.finish_work().await?;
                return Ok(RepetitionEnd::Timeout);
            }

            if let Some(job) = job {
                let kind = job.kind();
                debug!(cid = %job.cid(), kind = %kind, "Submitting job");
                tokio::select! {
                    submitted_job = self.dispatcher.submit(job) => submitted_job?,
                    _ = self.interrupt.cancelled() => return Ok(RepetitionEnd::Interrupted),
                }
                core.metrics.record_job_submitted(kind.as_str());
                submitted += 1;
            }
        }
    }
}
