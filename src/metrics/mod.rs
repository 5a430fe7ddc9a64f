//! Metrics module for Prometheus-based monitoring.
//!
//! Covers job submission and completion, the scheduler's structure
//! bookkeeping, worker activity and evaluation losses.
//!
//! # Example
//!
//! ```ignore
//! use pipeforge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_job_submitted("structure");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, EVALUATION_LOSS, INCOMPLETE_STRUCTURES, JOBS_COMPLETED, JOBS_SUBMITTED,
    JOB_DURATION, REGISTRY, REPETITIONS_TOTAL, RUNNING_STRUCTURES,
};
