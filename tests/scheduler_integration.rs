//! End-to-end tests of the search loop against scripted collaborators and
//! the in-process worker pool.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use pipeforge::config::SchedulerConfig;
use pipeforge::model::{
    CandidateId, CandidateStructure, Configuration, ConfigurationSpace, Dataset, EvaluationResult,
    Hyperparameter,
};
use pipeforge::proposer::{Catalogue, Proposal, RandomSearchProposer, StructureProposer};
use pipeforge::sampler::ConfigCache;
use pipeforge::scheduler::{
    Collaborators, DispatchError, Dispatcher, Job, JobKind, Scheduler, SchedulerSnapshot,
    Termination, WorkerPool, WorkerPoolConfig,
};
use pipeforge::storage::{InMemoryResultLogger, JsonResultLogger, ResultLogger, RunHistory};
use pipeforge::StorageError;
use pipeforge::worker::SyntheticWorker;

fn space() -> ConfigurationSpace {
    ConfigurationSpace::new("svm").with(Hyperparameter::float("C", 0.01, 10.0))
}

fn dataset() -> Arc<Dataset> {
    Arc::new(Dataset::new("iris", "accuracy"))
}

/// Proposer replaying a fixed script, then reporting exhaustion.
struct ScriptedProposer {
    script: Mutex<VecDeque<Proposal>>,
    issued: AtomicU32,
    resets: Mutex<Vec<u32>>,
    calls: AtomicUsize,
}

impl ScriptedProposer {
    fn new(script: Vec<Proposal>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            issued: AtomicU32::new(0),
            resets: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl StructureProposer for ScriptedProposer {
    fn next(&self) -> Proposal {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let proposal = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Proposal::Exhausted);
        if matches!(proposal, Proposal::Candidate(_)) {
            self.issued.fetch_add(1, Ordering::SeqCst);
        }
        proposal
    }

    fn reset(&self, offset: u32) {
        self.resets.lock().unwrap().push(offset);
        self.issued.store(0, Ordering::SeqCst);
    }

    fn register_result(&self, _structure: &CandidateStructure, _result: &EvaluationResult) {}

    fn issued(&self) -> u32 {
        self.issued.load(Ordering::SeqCst)
    }
}

/// Proposer issuing a fresh single-configuration structure on every call.
struct EndlessProposer {
    next: AtomicU32,
}

impl StructureProposer for EndlessProposer {
    fn next(&self) -> Proposal {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        Proposal::Candidate(CandidateStructure::materialized(
            CandidateId::new(0, index),
            "svm",
            vec!["svc".into()],
            space(),
            1,
        ))
    }

    fn reset(&self, _offset: u32) {}

    fn register_result(&self, _structure: &CandidateStructure, _result: &EvaluationResult) {}

    fn issued(&self) -> u32 {
        1
    }
}

type Watch = Box<dyn Fn() -> Option<SchedulerSnapshot> + Send + Sync>;

/// `(remaining, running)` of a structure around one evaluation.
type Step = (Option<(u32, u32)>, Option<(u32, u32)>);

/// Dispatcher completing jobs in-line, recording what it saw.
#[derive(Default)]
struct RecordingDispatcher {
    jobs: Mutex<Vec<(JobKind, CandidateId)>>,
    /// Jobs recorded at each `finish_work` call.
    finish_calls: Mutex<Vec<usize>>,
    shutdown_calls: AtomicUsize,
    /// Delay before structure jobs complete; completion is spawned when set.
    structure_delay: Option<Duration>,
    /// Delay inside every `submit`.
    submit_delay: Option<Duration>,
    /// Report evaluations without a configuration.
    drop_configs: bool,
    /// Scheduler state observed around every evaluation.
    watch: OnceLock<Watch>,
    steps: Mutex<Vec<Step>>,
}

impl RecordingDispatcher {
    fn jobs(&self) -> Vec<(JobKind, CandidateId)> {
        self.jobs.lock().unwrap().clone()
    }

    fn finish_calls(&self) -> Vec<usize> {
        self.finish_calls.lock().unwrap().clone()
    }

    fn observe(&self, structure: &CandidateId) -> Option<(u32, u32)> {
        self.watch.get().and_then(|watch| watch()).and_then(|s| s.entry(structure))
    }

    fn steps(&self) -> Vec<Step> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn submit(&self, job: Job) -> Result<(), DispatchError> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.jobs.lock().unwrap().push((job.kind(), job.cid()));

        match job {
            Job::Structure(mut job) => {
                let materialized = job.candidate.clone().materialize(vec!["svc".into()], space());
                match self.structure_delay {
                    Some(delay) => {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            job.complete(Ok(materialized));
                        });
                    }
                    None => {
                        job.complete(Ok(materialized));
                    }
                }
            }
            Job::Evaluation(mut job) => {
                let loss = 1.0 / f64::from(job.cid.config.unwrap_or(0) + 2);
                let config = if self.drop_configs {
                    job.config = None;
                    None
                } else {
                    job.config.clone()
                };
                let before = self.observe(&job.structure_id());
                job.complete(config, EvaluationResult::success(loss, Duration::from_millis(1)));
                let after = self.observe(&job.structure_id());
                if self.watch.get().is_some() {
                    self.steps.lock().unwrap().push((before, after));
                }
            }
        }
        Ok(())
    }

    async fn finish_work(&self) -> Result<(), DispatchError> {
        let recorded = self.jobs.lock().unwrap().len();
        self.finish_calls.lock().unwrap().push(recorded);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DispatchError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Logger failing its first `failures` evaluation writes.
struct FlakyLogger {
    inner: InMemoryResultLogger,
    failures: AtomicUsize,
}

impl ResultLogger for FlakyLogger {
    fn log_evaluated_config(&self, cid: &CandidateId, result: &EvaluationResult) -> Result<(), StorageError> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.log_evaluated_config(cid, result)
    }

    fn new_structure(&self, structure: &CandidateStructure) -> Result<(), StorageError> {
        self.inner.new_structure(structure)
    }

    fn load(&self) -> Result<RunHistory, StorageError> {
        self.inner.load()
    }
}

fn build_with_logger(
    config: SchedulerConfig,
    proposer: Arc<dyn StructureProposer>,
    dispatcher: Arc<RecordingDispatcher>,
    logger: Arc<dyn ResultLogger>,
) -> Scheduler {
    Scheduler::new(
        config,
        dataset(),
        Collaborators {
            proposer,
            sampler: Arc::new(ConfigCache::new(Some(3))),
            dispatcher,
            logger,
        },
    )
    .expect("scheduler")
}

fn build(
    config: SchedulerConfig,
    proposer: Arc<dyn StructureProposer>,
    dispatcher: Arc<RecordingDispatcher>,
) -> (Scheduler, Arc<InMemoryResultLogger>) {
    let logger = Arc::new(InMemoryResultLogger::new());
    let scheduler = build_with_logger(config, proposer, dispatcher, logger.clone());
    (scheduler, logger)
}

#[tokio::test]
async fn test_proxy_structure_is_evaluated_to_budget() {
    let proxy = CandidateStructure::proxy(CandidateId::new(0, 0), "svm", 3);
    let proposer = Arc::new(ScriptedProposer::new(vec![Proposal::Candidate(proxy)]));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = SchedulerConfig::new().with_wallclock_limit(Duration::from_secs(10));
    let (scheduler, logger) = build(config, proposer.clone(), dispatcher.clone());
    let scheduler = Arc::new(scheduler);
    let weak = Arc::downgrade(&scheduler);
    assert!(dispatcher
        .watch
        .set(Box::new(move || weak.upgrade().map(|s| s.snapshot())))
        .is_ok());

    let outcome = scheduler.run().await.expect("run");

    assert_eq!(outcome.termination, Termination::ProposerExhausted);
    let jobs = dispatcher.jobs();
    assert_eq!(jobs[0], (JobKind::Structure, CandidateId::new(0, 0)));
    let evaluated: Vec<_> = jobs[1..].iter().map(|(_, cid)| *cid).collect();
    assert_eq!(
        evaluated,
        (0..3).map(|i| CandidateId::new(0, 0).with_config(i)).collect::<Vec<_>>()
    );

    // Every logged configuration was sampled by the scheduler.
    let logged = logger.evaluations();
    assert_eq!(logged.len(), 3);
    assert!(logged.iter().all(|r| !r.result.config.is_empty()));
    assert_eq!(logger.structures().len(), 1);

    // Second repetition starts after the first iteration.
    assert_eq!(*proposer.resets.lock().unwrap(), vec![0, 1]);
    assert_eq!(dispatcher.finish_calls().len(), 3);
    assert_eq!(dispatcher.shutdown_calls.load(Ordering::SeqCst), 1);

    let snapshot = scheduler.snapshot();
    assert!(snapshot.incomplete.is_empty());
    assert_eq!(snapshot.running_structures, 0);

    let incumbent = outcome.incumbent.expect("incumbent");
    assert_eq!(incumbent.cid, CandidateId::new(0, 0).with_config(2));
    assert_eq!(incumbent.loss, 0.25);

    // Each completion releases exactly its own running slot; the last claim
    // already removed the entry.
    assert_eq!(
        dispatcher.steps(),
        vec![
            (Some((2, 1)), Some((2, 0))),
            (Some((1, 1)), Some((1, 0))),
            (None, None),
        ]
    );
}

#[tokio::test]
async fn test_logger_failure_does_not_reuse_candidate_ids() {
    let structure = CandidateStructure::materialized(
        CandidateId::new(0, 0),
        "svm",
        vec!["svc".into()],
        space(),
        3,
    );
    let proposer = Arc::new(ScriptedProposer::new(vec![Proposal::Candidate(structure)]));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let logger = Arc::new(FlakyLogger {
        inner: InMemoryResultLogger::new(),
        failures: AtomicUsize::new(1),
    });
    let scheduler = build_with_logger(
        SchedulerConfig::new().with_wallclock_limit(Duration::from_secs(10)),
        proposer,
        dispatcher.clone(),
        logger.clone(),
    );

    let outcome = scheduler.run().await.expect("run");

    assert_eq!(outcome.termination, Termination::ProposerExhausted);
    let evaluated: Vec<_> = dispatcher
        .jobs()
        .into_iter()
        .filter(|(kind, _)| *kind == JobKind::Evaluation)
        .map(|(_, cid)| cid)
        .collect();
    assert_eq!(
        evaluated,
        (0..3).map(|i| CandidateId::new(0, 0).with_config(i)).collect::<Vec<_>>()
    );

    // The failed write is missing from the log but still counted.
    assert_eq!(logger.inner.evaluations().len(), 2);
    assert_eq!(scheduler.snapshot().results.get(&CandidateId::new(0, 0)), Some(&3));
}

#[tokio::test]
async fn test_not_ready_waits_for_running_structure() {
    let proxy = CandidateStructure::proxy(CandidateId::new(0, 0), "svm", 2);
    let proposer = Arc::new(ScriptedProposer::new(vec![
        Proposal::Candidate(proxy),
        Proposal::NotReadyYet,
    ]));
    let dispatcher = Arc::new(RecordingDispatcher {
        structure_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    // Any fail-safe count aborts the run.
    let config = SchedulerConfig::new()
        .with_wallclock_limit(Duration::from_secs(30))
        .with_fail_safe(1, Duration::from_secs(60));
    let (scheduler, logger) = build(config, proposer, dispatcher.clone());

    let started = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(10), scheduler.run())
        .await
        .expect("scheduler blocked instead of waiting for the structure")
        .expect("run");

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(outcome.termination, Termination::ProposerExhausted);
    assert_eq!(logger.evaluations().len(), 2);
    assert_eq!(scheduler.snapshot().fail_safe, 0);
}

#[tokio::test]
async fn test_lazy_mode_falls_back_to_empty_configuration() {
    let structure = CandidateStructure::materialized(
        CandidateId::new(0, 0),
        "svm",
        vec!["svc".into()],
        space(),
        2,
    );
    let proposer = Arc::new(ScriptedProposer::new(vec![Proposal::Candidate(structure)]));
    let dispatcher = Arc::new(RecordingDispatcher {
        drop_configs: true,
        ..Default::default()
    });
    let config = SchedulerConfig::new().with_pre_sample(false);
    let (scheduler, logger) = build(config, proposer, dispatcher);

    let outcome = scheduler.run().await.expect("run");

    assert_eq!(outcome.termination, Termination::ProposerExhausted);
    let logged = logger.evaluations();
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|r| r.result.config == Configuration::empty()));
}

#[tokio::test]
async fn test_timeout_drains_and_stops_submitting() {
    let dispatcher = Arc::new(RecordingDispatcher {
        submit_delay: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    let config = SchedulerConfig::new().with_wallclock_limit(Duration::from_millis(300));
    let (scheduler, _) = build(
        config,
        Arc::new(EndlessProposer {
            next: AtomicU32::new(0),
        }),
        dispatcher.clone(),
    );

    let outcome = scheduler.run().await.expect("run");

    assert_eq!(outcome.termination, Termination::TimeoutReached);
    let finish_calls = dispatcher.finish_calls();
    assert_eq!(finish_calls.len() as u32, outcome.meta.repetitions + 1);
    assert_eq!(finish_calls.last().copied(), Some(dispatcher.jobs().len()));
    assert!(!dispatcher.jobs().is_empty());
    assert_eq!(dispatcher.shutdown_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stuck_proposer_aborts() {
    let proposer = Arc::new(ScriptedProposer::new(vec![Proposal::NotReadyYet; 10]));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = SchedulerConfig::new().with_fail_safe(3, Duration::from_millis(10));
    let (scheduler, _) = build(config, proposer.clone(), dispatcher.clone());

    let outcome = scheduler.run().await.expect("run");

    match &outcome.termination {
        Termination::Aborted { reason } => assert!(reason.contains("endless loop")),
        other => panic!("unexpected termination {other:?}"),
    }
    assert_eq!(proposer.calls.load(Ordering::SeqCst), 3);
    assert!(dispatcher.jobs().is_empty());
    assert_eq!(dispatcher.finish_calls().len(), 2);
}

#[tokio::test]
async fn test_fail_safe_counter_resets_after_candidate() {
    let structure = CandidateStructure::materialized(
        CandidateId::new(0, 0),
        "svm",
        vec!["svc".into()],
        space(),
        1,
    );
    let proposer = Arc::new(ScriptedProposer::new(vec![
        Proposal::NotReadyYet,
        Proposal::NotReadyYet,
        Proposal::Candidate(structure),
        Proposal::NotReadyYet,
        Proposal::NotReadyYet,
    ]));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = SchedulerConfig::new()
        .with_wallclock_limit(Duration::from_secs(10))
        .with_fail_safe(3, Duration::from_millis(10));
    let (scheduler, logger) = build(config, proposer.clone(), dispatcher);

    let outcome = scheduler.run().await.expect("run");

    // Four NotReadyYet in total, never three in a row.
    assert_eq!(outcome.termination, Termination::ProposerExhausted);
    assert_eq!(logger.evaluations().len(), 1);
    assert!(proposer.calls.load(Ordering::SeqCst) >= 6);
}

#[tokio::test]
async fn test_interrupt_stops_run() {
    let dispatcher = Arc::new(RecordingDispatcher {
        submit_delay: Some(Duration::from_millis(5)),
        ..Default::default()
    });
    let config = SchedulerConfig::new().with_wallclock_limit(Duration::from_secs(60));
    let (scheduler, _) = build(
        config,
        Arc::new(EndlessProposer {
            next: AtomicU32::new(0),
        }),
        dispatcher.clone(),
    );

    let token = scheduler.interrupt_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(10), scheduler.run())
        .await
        .expect("interrupt ignored")
        .expect("run");
    assert_eq!(outcome.termination, Termination::Interrupted);
    assert_eq!(dispatcher.shutdown_calls.load(Ordering::SeqCst), 1);
}

const CATALOGUE: &str = r#"
templates:
  - name: svm
    pipeline: [standard_scaler, svc]
    configspace:
      hyperparameters:
        - { type: float, name: C, lower: 0.01, upper: 100.0, log: true }
        - { type: categorical, name: kernel, choices: [rbf, linear] }
  - name: forest
    pipeline: [imputer, random_forest]
    configspace:
      hyperparameters:
        - { type: integer, name: max_depth, lower: 2, upper: 12 }
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_with_worker_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalogue = Arc::new(Catalogue::from_yaml(CATALOGUE).expect("catalogue"));
    let sampler = Arc::new(ConfigCache::new(Some(11)));
    let worker = Arc::new(
        SyntheticWorker::new(Arc::clone(&catalogue), sampler.clone())
            .with_latency(Duration::from_millis(5)),
    );
    let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(3), worker));
    pool.start().expect("start");

    let logger = Arc::new(JsonResultLogger::new(dir.path(), true).expect("logger"));
    let config = SchedulerConfig::new()
        .with_wallclock_limit(Duration::from_millis(800))
        .with_workers(3)
        .with_seed(11);
    let scheduler = Scheduler::new(
        config,
        dataset(),
        Collaborators {
            proposer: Arc::new(
                RandomSearchProposer::new(Arc::clone(&catalogue), 3, 2)
                    .with_iterations(2)
                    .with_seed(Some(11)),
            ),
            sampler,
            dispatcher: pool.clone(),
            logger,
        },
    )
    .expect("scheduler");

    let outcome = scheduler.run().await.expect("run");

    assert_eq!(outcome.termination, Termination::TimeoutReached);
    assert!(!pool.is_running());
    assert!(outcome.history.evaluations.len() >= 2);

    // Candidate ids are never reused, across repetitions included.
    let cids: HashSet<_> = outcome.history.evaluations.iter().map(|r| r.cid).collect();
    assert_eq!(cids.len(), outcome.history.evaluations.len());

    // Every evaluated configuration belongs to a logged structure.
    for record in &outcome.history.evaluations {
        assert!(outcome.history.structures.contains_key(&record.cid.structure_id()));
    }

    let best = outcome
        .history
        .evaluations
        .iter()
        .filter_map(|r| r.result.loss)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(outcome.incumbent.as_ref().map(|i| i.loss), Some(best));

    let reloaded = JsonResultLogger::read(dir.path()).expect("read history");
    assert_eq!(reloaded.evaluations.len(), outcome.history.evaluations.len());
    assert_eq!(reloaded.structures.len(), outcome.history.structures.len());
}
