//! Configuration spaces and concrete configurations.
//!
//! A [`ConfigurationSpace`] describes the hyperparameters of a structure; a
//! [`Configuration`] is one assignment of values inside such a space.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SamplerError;

/// Number of hex characters kept from the space digest.
const FINGERPRINT_LEN: usize = 16;

/// Value of a single hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A concrete assignment of hyperparameter values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, ParamValue>,
}

impl Configuration {
    /// Creates an empty configuration.
    ///
    /// This is the default configuration of the empty space and is used
    /// whenever a finished evaluation carries no configuration.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets a value, returning the configuration for chaining.
    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Sets a value.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    /// Returns the value of a hyperparameter.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single dimension of a configuration space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hyperparameter {
    Float {
        name: String,
        lower: f64,
        upper: f64,
        #[serde(default)]
        default: Option<f64>,
        /// Sample on a logarithmic scale.
        #[serde(default)]
        log: bool,
    },
    Integer {
        name: String,
        lower: i64,
        upper: i64,
        #[serde(default)]
        default: Option<i64>,
    },
    Categorical {
        name: String,
        choices: Vec<String>,
        #[serde(default)]
        default: Option<String>,
    },
}

impl Hyperparameter {
    /// Creates a uniform float hyperparameter.
    pub fn float(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Hyperparameter::Float {
            name: name.into(),
            lower,
            upper,
            default: None,
            log: false,
        }
    }

    /// Creates a log-uniform float hyperparameter.
    pub fn log_float(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Hyperparameter::Float {
            name: name.into(),
            lower,
            upper,
            default: None,
            log: true,
        }
    }

    /// Creates an integer hyperparameter with inclusive bounds.
    pub fn integer(name: impl Into<String>, lower: i64, upper: i64) -> Self {
        Hyperparameter::Integer {
            name: name.into(),
            lower,
            upper,
            default: None,
        }
    }

    /// Creates a categorical hyperparameter.
    pub fn categorical<S: Into<String>>(
        name: impl Into<String>,
        choices: impl IntoIterator<Item = S>,
    ) -> Self {
        Hyperparameter::Categorical {
            name: name.into(),
            choices: choices.into_iter().map(Into::into).collect(),
            default: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Hyperparameter::Float { name, .. }
            | Hyperparameter::Integer { name, .. }
            | Hyperparameter::Categorical { name, .. } => name,
        }
    }

    /// Returns the declared default, or the center of the range.
    ///
    /// Log-scaled floats default to the geometric mean of their bounds and
    /// categoricals to their first choice.
    pub fn default_value(&self) -> ParamValue {
        match self {
            Hyperparameter::Float {
                lower,
                upper,
                default,
                log,
                ..
            } => {
                let value = default.unwrap_or_else(|| {
                    if *log {
                        (lower.ln() + (upper.ln() - lower.ln()) / 2.0).exp()
                    } else {
                        lower + (upper - lower) / 2.0
                    }
                });
                ParamValue::Float(value)
            }
            Hyperparameter::Integer {
                lower,
                upper,
                default,
                ..
            } => ParamValue::Int(default.unwrap_or(lower + (upper - lower) / 2)),
            Hyperparameter::Categorical {
                choices, default, ..
            } => ParamValue::Text(
                default
                    .clone()
                    .or_else(|| choices.first().cloned())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Checks that the hyperparameter describes a non-empty domain.
    pub fn validate(&self) -> Result<(), SamplerError> {
        let invalid = |reason: &str| SamplerError::InvalidHyperparameter {
            name: self.name().to_string(),
            reason: reason.to_string(),
        };

        match self {
            Hyperparameter::Float {
                lower, upper, log, ..
            } => {
                if !lower.is_finite() || !upper.is_finite() || lower > upper {
                    return Err(invalid("bounds must be finite with lower <= upper"));
                }
                if *log && *lower <= 0.0 {
                    return Err(invalid("log-scaled bounds must be positive"));
                }
            }
            Hyperparameter::Integer { lower, upper, .. } => {
                if lower > upper {
                    return Err(invalid("lower must be <= upper"));
                }
            }
            Hyperparameter::Categorical { choices, .. } => {
                if choices.is_empty() {
                    return Err(invalid("at least one choice is required"));
                }
            }
        }
        Ok(())
    }
}

/// The hyperparameters of a structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSpace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hyperparameters: Vec<Hyperparameter>,
}

impl ConfigurationSpace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hyperparameters: Vec::new(),
        }
    }

    /// Adds a hyperparameter.
    pub fn with(mut self, hyperparameter: Hyperparameter) -> Self {
        self.hyperparameters.push(hyperparameter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hyperparameters.is_empty()
    }

    /// Returns the configuration made of every hyperparameter's default.
    pub fn default_configuration(&self) -> Configuration {
        self.hyperparameters
            .iter()
            .fold(Configuration::empty(), |config, hp| {
                config.with(hp.name(), hp.default_value())
            })
    }

    /// Validates every hyperparameter of the space.
    pub fn validate(&self) -> Result<(), SamplerError> {
        self.hyperparameters.iter().try_for_each(|hp| hp.validate())
    }

    /// Stable identity of the space, derived from its canonical JSON form.
    ///
    /// Two spaces with the same name and hyperparameters share a fingerprint
    /// and therefore a sampling generator.
    pub fn fingerprint(&self) -> Result<String, SamplerError> {
        let canonical = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&canonical);
        let mut fingerprint = hex::encode(digest);
        fingerprint.truncate(FINGERPRINT_LEN);
        Ok(fingerprint)
    }
}

/// Opaque handle to a configuration recorded by the sampler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Fingerprint of the configuration space.
    pub fingerprint: String,
    /// Position of the configuration in that space's sample record.
    pub index: usize,
}

impl CacheKey {
    pub fn new(fingerprint: impl Into<String>, index: usize) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            index,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.fingerprint, self.index)
    }
}
