//! Configuration sampling shared by the scheduler and the workers.
//!
//! The scheduler samples configurations eagerly (pre-sample mode) while
//! workers resolve cached keys lazily; both go through one [`ConfigSampler`]
//! service, which must tolerate concurrent callers.
//!
//! [`ConfigCache`] keeps one [`ConfigGenerator`] per configuration space,
//! keyed by the space fingerprint, so identical sampling requests coming from
//! different structures share one generator and one sample record.

pub mod random;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::SamplerError;
use crate::model::{CacheKey, Configuration, ConfigurationSpace};
use crate::scheduler::EvaluationJob;

pub use random::{ConfigGenerator, RandomSampling};

/// Sampling service consumed by the scheduler.
pub trait ConfigSampler: Send + Sync {
    /// Samples a configuration of `space` and returns it with the key it was
    /// recorded under.
    fn sample(
        &self,
        space: &ConfigurationSpace,
        meta_features: &[f64],
    ) -> Result<(Configuration, CacheKey), SamplerError>;

    /// Records an externally produced configuration, e.g. a structure's
    /// warm-start default, and returns its key.
    fn record(
        &self,
        space: &ConfigurationSpace,
        config: Configuration,
    ) -> Result<CacheKey, SamplerError>;

    /// Looks up a previously recorded configuration.
    fn resolve(&self, key: &CacheKey) -> Result<Configuration, SamplerError>;

    /// Feeds a finished evaluation back to the generator of its space.
    fn register_result(&self, job: &EvaluationJob);
}

/// Builds the generator for a newly seen configuration space.
pub type GeneratorFactory =
    Box<dyn Fn(ConfigurationSpace, Option<u64>) -> Box<dyn ConfigGenerator> + Send + Sync>;

struct SpaceEntry {
    generator: Box<dyn ConfigGenerator>,
    samples: Vec<Configuration>,
    results: usize,
}

/// Counters describing the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Distinct configuration spaces seen.
    pub spaces: usize,
    /// Configurations recorded across all spaces.
    pub samples: usize,
    /// Results registered across all spaces.
    pub results: usize,
}

/// Concurrent configuration cache.
pub struct ConfigCache {
    factory: GeneratorFactory,
    seed: Option<u64>,
    spaces: Mutex<HashMap<String, SpaceEntry>>,
}

impl ConfigCache {
    /// Creates a cache sampling with [`RandomSampling`].
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_factory(
            seed,
            Box::new(|space, seed| Box::new(RandomSampling::new(space, seed))),
        )
    }

    /// Creates a cache with a custom generator per space.
    pub fn with_factory(seed: Option<u64>, factory: GeneratorFactory) -> Self {
        Self {
            factory,
            seed,
            spaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let spaces = self.lock();
        CacheStats {
            spaces: spaces.len(),
            samples: spaces.values().map(|entry| entry.samples.len()).sum(),
            results: spaces.values().map(|entry| entry.results).sum(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SpaceEntry>> {
        self.spaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the entry of `space`, creating it on first use.
    fn with_entry<T>(
        &self,
        space: &ConfigurationSpace,
        f: impl FnOnce(&str, &mut SpaceEntry) -> T,
    ) -> Result<T, SamplerError> {
        let fingerprint = space.fingerprint()?;
        let mut spaces = self.lock();

        // Derive a distinct, reproducible stream for every space.
        let seed = self.seed.map(|seed| seed.wrapping_add(spaces.len() as u64));
        let entry = spaces.entry(fingerprint.clone()).or_insert_with(|| {
            debug!(fingerprint = %fingerprint, space = %space.name, "Creating config generator");
            SpaceEntry {
                generator: (self.factory)(space.clone(), seed),
                samples: Vec::new(),
                results: 0,
            }
        });
        Ok(f(&fingerprint, entry))
    }
}

impl ConfigSampler for ConfigCache {
    fn sample(
        &self,
        space: &ConfigurationSpace,
        meta_features: &[f64],
    ) -> Result<(Configuration, CacheKey), SamplerError> {
        space.validate()?;
        debug!(
            space = %space.name,
            meta_features = meta_features.len(),
            "Sampling configuration"
        );
        self.with_entry(space, |fingerprint, entry| {
            let config = entry.generator.sample_config(false);
            entry.samples.push(config.clone());
            (config, CacheKey::new(fingerprint, entry.samples.len() - 1))
        })
    }

    fn record(
        &self,
        space: &ConfigurationSpace,
        config: Configuration,
    ) -> Result<CacheKey, SamplerError> {
        self.with_entry(space, |fingerprint, entry| {
            entry.samples.push(config);
            CacheKey::new(fingerprint, entry.samples.len() - 1)
        })
    }

    fn resolve(&self, key: &CacheKey) -> Result<Configuration, SamplerError> {
        self.lock()
            .get(&key.fingerprint)
            .and_then(|entry| entry.samples.get(key.index))
            .cloned()
            .ok_or_else(|| SamplerError::UnknownKey {
                fingerprint: key.fingerprint.clone(),
                index: key.index,
            })
    }

    fn register_result(&self, job: &EvaluationJob) {
        let (Some(config), Some(result)) = (job.config.as_ref(), job.result.as_ref()) else {
            warn!(cid = %job.cid, "Ignoring result registration without configuration or result");
            return;
        };
        let registered = self.with_entry(&job.structure.configspace, |_, entry| {
            entry.generator.register_result(config, result.loss, result.status);
            entry.results += 1;
        });
        if let Err(e) = registered {
            warn!(cid = %job.cid, error = %e, "Failed to register result with config cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateId, CandidateStructure, Dataset, EvaluationResult, Hyperparameter};
    use std::sync::Arc;
    use std::time::Duration;

    fn space(name: &str) -> ConfigurationSpace {
        ConfigurationSpace::new(name)
            .with(Hyperparameter::float("alpha", 0.0, 1.0))
            .with(Hyperparameter::integer("k", 1, 9))
    }

    #[test]
    fn test_identical_spaces_share_a_generator() {
        let cache = ConfigCache::new(Some(5));

        let (_, first) = cache.sample(&space("ridge"), &[]).expect("sample");
        let (_, second) = cache.sample(&space("ridge"), &[]).expect("sample");
        let (_, other) = cache.sample(&space("lasso"), &[]).expect("sample");

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!((first.index, second.index), (0, 1));
        assert_ne!(first.fingerprint, other.fingerprint);
        assert_eq!(other.index, 0);

        let stats = cache.stats();
        assert_eq!(stats.spaces, 2);
        assert_eq!(stats.samples, 3);
    }

    #[test]
    fn test_resolve_returns_recorded_config() {
        let cache = ConfigCache::new(Some(5));
        let (config, key) = cache.sample(&space("ridge"), &[0.5]).expect("sample");

        assert_eq!(cache.resolve(&key).expect("resolve"), config);

        let default_key = cache
            .record(&space("ridge"), space("ridge").default_configuration())
            .expect("record");
        assert_eq!(default_key.index, 1);
        assert_eq!(
            cache.resolve(&default_key).expect("resolve"),
            space("ridge").default_configuration()
        );
    }

    #[test]
    fn test_resolve_unknown_key() {
        let cache = ConfigCache::new(None);
        let err = cache.resolve(&CacheKey::new("deadbeef", 3)).unwrap_err();
        assert!(err.to_string().contains("deadbeef#3"));
    }

    #[test]
    fn test_invalid_space_is_rejected() {
        let cache = ConfigCache::new(None);
        let bad = ConfigurationSpace::new("bad").with(Hyperparameter::integer("k", 3, 1));
        assert!(cache.sample(&bad, &[]).is_err());
    }

    #[test]
    fn test_register_result_counts_finished_jobs() {
        let cache = ConfigCache::new(Some(1));
        let structure = CandidateStructure::materialized(
            CandidateId::new(0, 0),
            "ridge",
            vec!["ridge".into()],
            space("ridge"),
            2,
        );
        let (config, key) = cache.sample(&structure.configspace, &[]).expect("sample");
        let mut job = crate::scheduler::EvaluationJob::new(
            Arc::new(Dataset::new("iris", "accuracy")),
            structure.cid.with_config(0),
            structure.clone(),
            None,
        )
        .with_config(config, key);

        // Pending jobs carry no result and are ignored.
        cache.register_result(&job);
        assert_eq!(cache.stats().results, 0);

        job.complete(None, EvaluationResult::success(0.3, Duration::from_millis(2)));
        cache.register_result(&job);
        assert_eq!(cache.stats().results, 1);
    }

    #[test]
    fn test_concurrent_sampling() {
        let cache = Arc::new(ConfigCache::new(Some(9)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        cache.sample(&space("ridge"), &[]).expect("sample");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("sampler thread panicked");
        }

        let stats = cache.stats();
        assert_eq!(stats.spaces, 1);
        assert_eq!(stats.samples, 200);
    }
}
