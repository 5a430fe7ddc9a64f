//! Deterministic benchmark worker.
//!
//! Scores configurations with a synthetic objective instead of fitting real
//! pipelines: the loss is derived from a hash of the pipeline steps and the
//! configuration, so repeated runs with the same seed are reproducible.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::WorkerError;
use crate::model::{CandidateStructure, Configuration, Dataset, EvaluationResult};
use crate::proposer::{materialize_template, Catalogue};
use crate::sampler::ConfigSampler;
use crate::scheduler::EvaluationJob;

use super::{Evaluation, Worker};

pub struct SyntheticWorker {
    catalogue: Arc<Catalogue>,
    sampler: Arc<dyn ConfigSampler>,
    latency: Duration,
}

impl SyntheticWorker {
    pub fn new(catalogue: Arc<Catalogue>, sampler: Arc<dyn ConfigSampler>) -> Self {
        Self {
            catalogue,
            sampler,
            latency: Duration::ZERO,
        }
    }

    /// Sets the simulated duration of every job.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Resolves the configuration of a job submitted without one.
    ///
    /// The job's cached key at its configuration index is used when present;
    /// otherwise a fresh configuration is sampled.
    fn resolve(&self, job: &EvaluationJob) -> Result<Configuration, WorkerError> {
        let index = job.cid.config.unwrap_or(0) as usize;
        let config = match job.cfg_keys.get(index) {
            Some(key) => self.sampler.resolve(key)?,
            None => {
                let (config, _) = self
                    .sampler
                    .sample(&job.structure.configspace, &job.dataset.meta_features)?;
                config
            }
        };
        Ok(config)
    }

    async fn simulate(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// Maps a structure and configuration to a loss in `[0, 1)`.
pub fn synthetic_loss(structure: &CandidateStructure, config: &Configuration) -> Result<f64, serde_json::Error> {
    let mut hasher = Sha256::new();
    for step in &structure.pipeline {
        hasher.update(step.as_bytes());
        hasher.update(b"/");
    }
    hasher.update(serde_json::to_vec(config)?);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    Ok((u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64)
}

#[async_trait]
impl Worker for SyntheticWorker {
    async fn materialize(
        &self,
        _dataset: &Dataset,
        candidate: &CandidateStructure,
    ) -> Result<CandidateStructure, WorkerError> {
        self.simulate().await;
        let structure = materialize_template(&self.catalogue, candidate)?;

        // The space default is the first configuration lazy evaluation resolves.
        let default_key = self.sampler.record(
            &structure.configspace,
            structure.configspace.default_configuration(),
        )?;
        debug!(cid = %structure.cid, template = %structure.template, "Materialized structure");
        Ok(structure.with_cfg_keys(vec![default_key]))
    }

    async fn evaluate(&self, job: &EvaluationJob) -> Result<Evaluation, WorkerError> {
        let start = Instant::now();
        let (config, resolved) = match &job.config {
            Some(config) => (config.clone(), false),
            None => (self.resolve(job)?, true),
        };
        self.simulate().await;

        let loss = synthetic_loss(&job.structure, &config)
            .map_err(|e| WorkerError::Evaluation(job.cid, e.to_string()))?;
        debug!(cid = %job.cid, loss, resolved, "Evaluated configuration");

        let result = EvaluationResult::success(loss, start.elapsed()).with_config(config.clone());
        Ok(Evaluation {
            config: resolved.then_some(config),
            result,
        })
    }
}
