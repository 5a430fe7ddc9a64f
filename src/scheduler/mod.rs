//! Search scheduling and job dispatch.
//!
//! - **Scheduler**: the control loop deciding between evaluating another
//!   configuration and pulling a new candidate structure
//! - **IncompleteStructures**: structures with configuration budget left
//! - **Job**: structure-materialization and evaluation jobs with completion callbacks
//! - **WorkerPool**: in-process [`Dispatcher`] running jobs on N tokio workers
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐   next()    ┌──────────────┐
//!    │  Scheduler   │ ──────────► │   Proposer   │
//!    │ (search loop)│             └──────────────┘
//!    └──────┬───────┘
//!           │ submit(job)
//!    ┌──────▼───────┐
//!    │  Dispatcher  │
//!    │ (WorkerPool) │
//!    └──────┬───────┘
//!           │
//!    ┌──────┼──────────────┐
//!    ▼      ▼              ▼
//! Worker 1 Worker 2 ... Worker N ──► completion callback ──► Scheduler state
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use pipeforge::scheduler::{Collaborators, Scheduler, WorkerPool, WorkerPoolConfig};
//!
//! let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(4), worker));
//! pool.start()?;
//! let scheduler = Scheduler::new(config, dataset, Collaborators {
//!     proposer, sampler, dispatcher: pool, logger,
//! })?;
//! let outcome = scheduler.run().await?;
//! println!("{}", outcome.termination);
//! ```

pub mod job;
pub mod search;
pub mod table;
pub mod worker_pool;

pub use job::{EvaluationJob, Job, JobCallback, JobKind, JobState, StructureJob};
pub use search::{Collaborators, Scheduler, SchedulerSnapshot, SearchOutcome, Termination};
pub use table::{Claim, IncompleteStructures, SelectionPolicy, TableEntry};
pub use worker_pool::{DispatchError, Dispatcher, PoolStats, WorkerPool, WorkerPoolConfig};
