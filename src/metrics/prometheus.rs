//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by pipeforge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all pipeforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs submitted to the dispatcher, labeled by kind.
pub static JOBS_SUBMITTED: OnceLock<CounterVec> = OnceLock::new();

/// Jobs completed by the worker pool, labeled by kind and status.
pub static JOBS_COMPLETED: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by kind.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Structures with configurations left to submit.
pub static INCOMPLETE_STRUCTURES: OnceLock<Gauge> = OnceLock::new();

/// Outstanding structure jobs.
pub static RUNNING_STRUCTURES: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently executing a job.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Distribution of successful evaluation losses.
pub static EVALUATION_LOSS: OnceLock<Histogram> = OnceLock::new();

/// Repetitions started by the scheduler.
pub static REPETITIONS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Recording through [`super::MetricsCollector`] is a no-op until this has
/// been called. Calling it again keeps the first registration.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Job metrics
    let jobs_submitted = CounterVec::new(
        Opts::new("pipeforge_jobs_submitted_total", "Total number of jobs submitted"),
        &["kind"],
    )?;

    let jobs_completed = CounterVec::new(
        Opts::new("pipeforge_jobs_completed_total", "Total number of jobs completed"),
        &["kind", "status"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pipeforge_job_duration_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["kind"],
    )?;

    // Scheduler metrics
    let incomplete_structures = Gauge::new(
        "pipeforge_incomplete_structures",
        "Structures with configurations left to submit",
    )?;

    let running_structures = Gauge::new(
        "pipeforge_running_structures",
        "Structure jobs submitted and not yet completed",
    )?;

    let evaluation_loss = Histogram::with_opts(
        prometheus::HistogramOpts::new("pipeforge_evaluation_loss", "Distribution of evaluation losses")
            .buckets(vec![-1.0, -0.5, 0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.75, 1.0]),
    )?;

    let repetitions_total = Counter::new(
        "pipeforge_repetitions_total",
        "Total repetitions started by the scheduler",
    )?;

    // Worker metrics
    let active_workers = Gauge::new("pipeforge_active_workers", "Number of active workers")?;

    registry.register(Box::new(jobs_submitted.clone()))?;
    registry.register(Box::new(jobs_completed.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(incomplete_structures.clone()))?;
    registry.register(Box::new(running_structures.clone()))?;
    registry.register(Box::new(evaluation_loss.clone()))?;
    registry.register(Box::new(repetitions_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_SUBMITTED.set(jobs_submitted);
    let _ = JOBS_COMPLETED.set(jobs_completed);
    let _ = JOB_DURATION.set(job_duration);
    let _ = INCOMPLETE_STRUCTURES.set(incomplete_structures);
    let _ = RUNNING_STRUCTURES.set(running_structures);
    let _ = EVALUATION_LOSS.set(evaluation_loss);
    let _ = REPETITIONS_TOTAL.set(repetitions_total);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
