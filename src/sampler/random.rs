//! Random sampling of configurations.

use rand::seq::IndexedRandom;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::model::{Configuration, ConfigurationSpace, Hyperparameter, ParamValue, StatusType};

/// Decides how configurations of one configuration space are sampled.
///
/// Generators hold per-space state (random streams, surrogate models) and
/// are owned by a [`super::ConfigCache`], which serializes access to them.
pub trait ConfigGenerator: Send {
    /// Samples a configuration; `default` asks for the space default.
    fn sample_config(&mut self, default: bool) -> Configuration;

    /// Feeds back a finished evaluation. Model-free generators ignore it.
    fn register_result(&mut self, _config: &Configuration, _loss: Option<f64>, _status: StatusType) {}
}

/// Creates a random number generator from an optional seed.
pub(crate) fn create_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

/// Uniform random sampling: uniform or log-uniform floats, uniform integers
/// and uniform categorical choices.
#[derive(Debug, Clone)]
pub struct RandomSampling {
    space: ConfigurationSpace,
    rng: ChaCha8Rng,
}

impl RandomSampling {
    pub fn new(space: ConfigurationSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: create_rng(seed),
        }
    }

    fn sample_value(rng: &mut ChaCha8Rng, hyperparameter: &Hyperparameter) -> ParamValue {
        match hyperparameter {
            Hyperparameter::Float {
                lower, upper, log, ..
            } => {
                if lower >= upper {
                    return ParamValue::Float(*lower);
                }
                if *log {
                    let exponent = rng.random_range(lower.ln()..=upper.ln());
                    ParamValue::Float(exponent.exp().clamp(*lower, *upper))
                } else {
                    ParamValue::Float(rng.random_range(*lower..=*upper))
                }
            }
            Hyperparameter::Integer { lower, upper, .. } => {
                if lower >= upper {
                    return ParamValue::Int(*lower);
                }
                ParamValue::Int(rng.random_range(*lower..=*upper))
            }
            Hyperparameter::Categorical { choices, .. } => choices
                .choose(rng)
                .map(|choice| ParamValue::Text(choice.clone()))
                .unwrap_or_else(|| hyperparameter.default_value()),
        }
    }
}

impl ConfigGenerator for RandomSampling {
    fn sample_config(&mut self, default: bool) -> Configuration {
        if default {
            return self.space.default_configuration();
        }
        let mut config = Configuration::empty();
        for hyperparameter in &self.space.hyperparameters {
            config.insert(
                hyperparameter.name(),
                Self::sample_value(&mut self.rng, hyperparameter),
            );
        }
        config
    }
}
