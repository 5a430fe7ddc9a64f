//! Candidate structures, evaluation results and datasets.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::CandidateId;
use super::space::{CacheKey, Configuration, ConfigurationSpace};

/// Outcome class of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Success,
    Crashed,
    Timeout,
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusType::Success => write!(f, "success"),
            StatusType::Crashed => write!(f, "crashed"),
            StatusType::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of evaluating one configuration of a structure.
///
/// Losses are always minimized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub status: StatusType,
    /// Loss of the configuration; `None` unless the evaluation succeeded.
    pub loss: Option<f64>,
    /// Configuration that produced this result.
    #[serde(default)]
    pub config: Configuration,
    /// Wall-clock runtime of the evaluation in milliseconds.
    pub runtime_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl EvaluationResult {
    /// Creates a successful result.
    pub fn success(loss: f64, runtime: Duration) -> Self {
        Self {
            status: StatusType::Success,
            loss: Some(loss),
            config: Configuration::empty(),
            runtime_ms: runtime.as_millis() as u64,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Creates a crashed result.
    pub fn crashed(error: impl Into<String>, runtime: Duration) -> Self {
        Self {
            status: StatusType::Crashed,
            loss: None,
            config: Configuration::empty(),
            runtime_ms: runtime.as_millis() as u64,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }

    /// Creates a result for an evaluation that exceeded its cutoff.
    pub fn timeout(runtime: Duration) -> Self {
        Self {
            status: StatusType::Timeout,
            loss: None,
            config: Configuration::empty(),
            runtime_ms: runtime.as_millis() as u64,
            error: Some("Evaluation exceeded its cutoff".to_string()),
            finished_at: Utc::now(),
        }
    }

    /// Attaches the configuration that produced this result.
    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusType::Success
    }
}

/// A pipeline topology together with its configuration space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStructure {
    pub cid: CandidateId,
    /// Name of the catalogue template this structure is derived from.
    pub template: String,
    /// Ordered pipeline steps; empty while the structure is a proxy.
    #[serde(default)]
    pub pipeline: Vec<String>,
    #[serde(default)]
    pub configspace: ConfigurationSpace,
    /// Number of configurations to evaluate in the current repetition.
    pub budget: u32,
    proxy: bool,
    /// Evaluation outcomes in completion order.
    #[serde(default)]
    pub results: Vec<EvaluationResult>,
    /// Cached configuration keys handed to workers when sampling is lazy.
    #[serde(default)]
    pub cfg_keys: Vec<CacheKey>,
}

impl CandidateStructure {
    /// Creates a proxy structure that still needs a structure job.
    pub fn proxy(cid: CandidateId, template: impl Into<String>, budget: u32) -> Self {
        Self {
            cid,
            template: template.into(),
            pipeline: Vec::new(),
            configspace: ConfigurationSpace::default(),
            budget,
            proxy: true,
            results: Vec::new(),
            cfg_keys: Vec::new(),
        }
    }

    /// Creates an already materialized structure.
    pub fn materialized(
        cid: CandidateId,
        template: impl Into<String>,
        pipeline: Vec<String>,
        configspace: ConfigurationSpace,
        budget: u32,
    ) -> Self {
        Self {
            proxy: false,
            pipeline,
            configspace,
            ..Self::proxy(cid, template, budget)
        }
    }

    /// Fills a proxy with its topology and configuration space.
    pub fn materialize(mut self, pipeline: Vec<String>, configspace: ConfigurationSpace) -> Self {
        self.pipeline = pipeline;
        self.configspace = configspace;
        self.proxy = false;
        self
    }

    /// Sets the cached configuration keys used in lazy sampling mode.
    pub fn with_cfg_keys(mut self, keys: Vec<CacheKey>) -> Self {
        self.cfg_keys = keys;
        self
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy
    }

    pub fn add_result(&mut self, result: EvaluationResult) {
        self.results.push(result);
    }

    /// Returns the lowest loss among successful results.
    pub fn best_loss(&self) -> Option<f64> {
        self.results
            .iter()
            .filter_map(|r| r.loss)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// The dataset a search runs against.
///
/// The data itself lives with the workers; the scheduler only needs its
/// identity and meta-features for sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Metric the workers optimize (e.g. "accuracy", "f1", "logloss").
    pub metric: String,
    #[serde(default)]
    pub meta_features: Vec<f64>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            meta_features: Vec::new(),
        }
    }

    pub fn with_meta_features(mut self, meta_features: Vec<f64>) -> Self {
        self.meta_features = meta_features;
        self
    }
}
