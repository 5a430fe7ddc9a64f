//! Scheduler configuration.
//!
//! This module provides the knobs of a search run: the global wall-clock
//! budget, the per-job cutoff, the sampling mode, the size of the worker pool,
//! the livelock fail-safe and where results are written.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::SelectionPolicy;

/// Default number of consecutive empty proposals tolerated with nothing in flight.
pub const DEFAULT_FAIL_SAFE_THRESHOLD: u32 = 10;

/// Default delay between two fail-safe retries.
pub const DEFAULT_FAIL_SAFE_DELAY: Duration = Duration::from_secs(5);

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a search run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    // Budget settings
    /// Global wall-clock budget of the run.
    pub wallclock_limit: Duration,
    /// Time limit for a single job, enforced by the dispatcher.
    pub cutoff: Option<Duration>,

    // Sampling settings
    /// Sample configurations in the control loop (`true`) or let workers
    /// resolve them lazily from cached keys (`false`).
    pub pre_sample: bool,
    /// How the next incomplete structure is picked.
    pub selection_policy: SelectionPolicy,
    /// Seed for sampling and selection (None = non-deterministic).
    pub seed: Option<u64>,

    // Execution settings
    /// Number of concurrent workers.
    pub n_workers: usize,
    /// Timeout for graceful dispatcher shutdown.
    pub shutdown_timeout: Duration,

    // Fail-safe settings
    /// Consecutive empty proposals tolerated while nothing is in flight.
    pub fail_safe_threshold: u32,
    /// Delay between two fail-safe retries.
    pub fail_safe_delay: Duration,

    // Storage settings
    /// Directory receiving the result logs.
    pub working_directory: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wallclock_limit: Duration::from_secs(60),
            cutoff: None,

            pre_sample: true,
            selection_policy: SelectionPolicy::Random,
            seed: None,

            n_workers: 1,
            shutdown_timeout: Duration::from_secs(60),

            fail_safe_threshold: DEFAULT_FAIL_SAFE_THRESHOLD,
            fail_safe_delay: DEFAULT_FAIL_SAFE_DELAY,

            working_directory: PathBuf::from("."),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPEFORGE_WALLCLOCK_LIMIT_SECS`: Wall-clock budget in seconds (default: 60)
    /// - `PIPEFORGE_CUTOFF_SECS`: Per-job cutoff in seconds (default: none)
    /// - `PIPEFORGE_PRE_SAMPLE`: Sample configurations eagerly (default: true)
    /// - `PIPEFORGE_WORKERS`: Number of workers (default: 1)
    /// - `PIPEFORGE_FAIL_SAFE_THRESHOLD`: Consecutive empty proposals before abort (default: 10)
    /// - `PIPEFORGE_FAIL_SAFE_DELAY_SECS`: Delay between fail-safe retries (default: 5)
    /// - `PIPEFORGE_SELECTION_POLICY`: random, round-robin or oldest-first (default: random)
    /// - `PIPEFORGE_WORKDIR`: Working directory for result logs (default: .)
    /// - `PIPEFORGE_SEED`: Seed for sampling and selection (default: none)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PIPEFORGE_WALLCLOCK_LIMIT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPEFORGE_WALLCLOCK_LIMIT_SECS")?;
            config.wallclock_limit = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPEFORGE_CUTOFF_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPEFORGE_CUTOFF_SECS")?;
            config.cutoff = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("PIPEFORGE_PRE_SAMPLE") {
            config.pre_sample = parse_env_bool(&val, "PIPEFORGE_PRE_SAMPLE")?;
        }

        if let Ok(val) = std::env::var("PIPEFORGE_WORKERS") {
            config.n_workers = parse_env_value(&val, "PIPEFORGE_WORKERS")?;
        }

        if let Ok(val) = std::env::var("PIPEFORGE_FAIL_SAFE_THRESHOLD") {
            config.fail_safe_threshold = parse_env_value(&val, "PIPEFORGE_FAIL_SAFE_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("PIPEFORGE_FAIL_SAFE_DELAY_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPEFORGE_FAIL_SAFE_DELAY_SECS")?;
            config.fail_safe_delay = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPEFORGE_SELECTION_POLICY") {
            config.selection_policy = parse_env_value(&val, "PIPEFORGE_SELECTION_POLICY")?;
        }

        if let Ok(val) = std::env::var("PIPEFORGE_WORKDIR") {
            config.working_directory = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PIPEFORGE_SEED") {
            config.seed = Some(parse_env_value(&val, "PIPEFORGE_SEED")?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_workers < 1 {
            return Err(ConfigError::ValidationFailed(format!(
                "Expected at least 1 worker, given {}",
                self.n_workers
            )));
        }

        if self.wallclock_limit.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "wallclock_limit must be greater than 0".to_string(),
            ));
        }

        if matches!(self.cutoff, Some(cutoff) if cutoff.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "cutoff must be greater than 0 when set".to_string(),
            ));
        }

        if self.fail_safe_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "fail_safe_threshold must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the wall-clock limit.
    pub fn with_wallclock_limit(mut self, limit: Duration) -> Self {
        self.wallclock_limit = limit;
        self
    }

    /// Builder method to set the per-job cutoff.
    pub fn with_cutoff(mut self, cutoff: Duration) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    /// Builder method to choose between eager and lazy sampling.
    pub fn with_pre_sample(mut self, pre_sample: bool) -> Self {
        self.pre_sample = pre_sample;
        self
    }

    /// Builder method to set the number of workers.
    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers;
        self
    }

    /// Builder method to set the selection policy.
    pub fn with_selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    /// Builder method to set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder method to configure the livelock fail-safe.
    pub fn with_fail_safe(mut self, threshold: u32, delay: Duration) -> Self {
        self.fail_safe_threshold = threshold;
        self.fail_safe_delay = delay;
        self
    }

    /// Builder method to set the dispatcher shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builder method to set the working directory.
    pub fn with_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = path.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.wallclock_limit, Duration::from_secs(60));
        assert!(config.cutoff.is_none());
        assert!(config.pre_sample);
        assert_eq!(config.n_workers, 1);
        assert_eq!(config.fail_safe_threshold, 10);
        assert_eq!(config.fail_safe_delay, Duration::from_secs(5));
        assert_eq!(config.selection_policy, SelectionPolicy::Random);
        assert_eq!(config.working_directory, PathBuf::from("."));
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::new()
            .with_wallclock_limit(Duration::from_secs(300))
            .with_cutoff(Duration::from_secs(30))
            .with_pre_sample(false)
            .with_workers(8)
            .with_selection_policy(SelectionPolicy::OldestFirst)
            .with_seed(42)
            .with_fail_safe(3, Duration::from_millis(10))
            .with_working_directory("/tmp/run");

        assert_eq!(config.wallclock_limit, Duration::from_secs(300));
        assert_eq!(config.cutoff, Some(Duration::from_secs(30)));
        assert!(!config.pre_sample);
        assert_eq!(config.n_workers, 8);
        assert_eq!(config.selection_policy, SelectionPolicy::OldestFirst);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.fail_safe_threshold, 3);
        assert_eq!(config.fail_safe_delay, Duration::from_millis(10));
        assert_eq!(config.working_directory, PathBuf::from("/tmp/run"));
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_no_workers() {
        let result = SchedulerConfig::default().with_workers(0).validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Expected at least 1 worker, given 0"));
    }

    #[test]
    fn test_validation_zero_wallclock() {
        let result = SchedulerConfig::default()
            .with_wallclock_limit(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("wallclock_limit"));
    }

    #[test]
    fn test_validation_zero_cutoff() {
        let result = SchedulerConfig::default()
            .with_cutoff(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("cutoff"));
    }

    #[test]
    fn test_validation_zero_fail_safe() {
        let result = SchedulerConfig::default()
            .with_fail_safe(0, Duration::from_secs(1))
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("fail_safe_threshold"));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(parse_env_bool("YES", "test").unwrap());
        assert!(!parse_env_bool("off", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_parse_env_policy() {
        let policy: SelectionPolicy = parse_env_value("round-robin", "test").unwrap();
        assert_eq!(policy, SelectionPolicy::RoundRobin);
        assert!(parse_env_value::<SelectionPolicy>("priority", "test").is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));

        let err = ConfigError::ValidationFailed("test failure".to_string());
        assert!(err.to_string().contains("test failure"));
    }
}
