//! High-level recording interface over the raw Prometheus metrics.

use super::prometheus::{
    ACTIVE_WORKERS, EVALUATION_LOSS, INCOMPLETE_STRUCTURES, JOBS_COMPLETED, JOBS_SUBMITTED,
    JOB_DURATION, REPETITIONS_TOTAL, RUNNING_STRUCTURES,
};

/// Metrics collector for scheduler and worker-pool events.
///
/// Every method is a no-op until `init_metrics()` has been called.
///
/// # Example
///
/// ```ignore
/// use pipeforge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_job_submitted("evaluation");
/// collector.record_job_completed("evaluation", "success", 0.4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_job_submitted(&self, kind: &str) {
        if let Some(submitted) = JOBS_SUBMITTED.get() {
            submitted.with_label_values(&[kind]).inc();
        }
    }

    /// Record a finished job.
    ///
    /// * `kind` - "structure" or "evaluation"
    /// * `status` - "success", "crashed" or "timeout"
    pub fn record_job_completed(&self, kind: &str, status: &str, duration_secs: f64) {
        if let Some(completed) = JOBS_COMPLETED.get() {
            completed.with_label_values(&[kind, status]).inc();
        }

        if let Some(duration) = JOB_DURATION.get() {
            duration.with_label_values(&[kind]).observe(duration_secs);
        }

        tracing::trace!(
            kind = kind,
            status = status,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Snapshot of the scheduler's in-flight structure bookkeeping.
    pub fn set_structures(&self, incomplete: usize, running: usize) {
        if let Some(gauge) = INCOMPLETE_STRUCTURES.get() {
            gauge.set(incomplete as f64);
        }
        if let Some(gauge) = RUNNING_STRUCTURES.get() {
            gauge.set(running as f64);
        }
    }

    pub fn record_loss(&self, loss: f64) {
        if let Some(histogram) = EVALUATION_LOSS.get() {
            histogram.observe(loss);
        }
    }

    pub fn record_repetition(&self) {
        if let Some(counter) = REPETITIONS_TOTAL.get() {
            counter.inc();
        }
    }

    pub fn worker_started(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.inc();
        }
    }

    pub fn worker_finished(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.dec();
        }
    }
}
