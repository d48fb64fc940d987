//! Pipeline configuration.
//!
//! Settings come from defaults, an optional YAML file, and environment
//! variables, in that order of precedence (later wins):
//!
//! | variable                       | setting                        |
//! |--------------------------------|--------------------------------|
//! | `DAGPIPE_CHECKPOINT_DIR`       | file checkpoint directory      |
//! | `DAGPIPE_MAX_RETRIES`          | attempts per node              |
//! | `DAGPIPE_COMPLEXITY_THRESHOLD` | router high-tier threshold     |
//! | `DAGPIPE_RATE_LIMIT`           | high-tier calls per window     |

use crate::checkpoint::CheckpointBackend;
use crate::constrained::{ConstrainedGenerator, DEFAULT_MAX_RETRIES};
use crate::errors::ConfigurationError;
use crate::orchestrator::RetryPolicy;
use crate::router::{ModelRouter, RouterSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable overriding the checkpoint directory.
pub const ENV_CHECKPOINT_DIR: &str = "DAGPIPE_CHECKPOINT_DIR";
/// Environment variable overriding the attempts per node.
pub const ENV_MAX_RETRIES: &str = "DAGPIPE_MAX_RETRIES";
/// Environment variable overriding the complexity threshold.
pub const ENV_COMPLEXITY_THRESHOLD: &str = "DAGPIPE_COMPLEXITY_THRESHOLD";
/// Environment variable overriding the high-tier rate limit.
pub const ENV_RATE_LIMIT: &str = "DAGPIPE_RATE_LIMIT";

/// Everything needed to wire up an orchestrator besides the graph and the
/// node functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where checkpoints live.
    pub checkpoint: CheckpointBackend,
    /// Retry behaviour of every node.
    pub retry: RetryPolicy,
    /// Model router tunables.
    pub router: RouterSettings,
    /// Repair attempts after the first constrained generation call.
    pub constrained_max_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointBackend::default(),
            retry: RetryPolicy::default(),
            router: RouterSettings::default(),
            constrained_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the checkpoint backend.
    #[must_use]
    pub fn with_checkpoint(mut self, backend: CheckpointBackend) -> Self {
        self.checkpoint = backend;
        self
    }

    /// Stores checkpoints as files under `dir`.
    #[must_use]
    pub fn with_checkpoint_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.with_checkpoint(CheckpointBackend::file(dir))
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the router tunables.
    #[must_use]
    pub fn with_router(mut self, router: RouterSettings) -> Self {
        self.router = router;
        self
    }

    /// Sets the constrained generation repair budget.
    #[must_use]
    pub fn with_constrained_max_retries(mut self, retries: usize) -> Self {
        self.constrained_max_retries = retries;
        self
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] if a variable cannot be
    /// parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::default().apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overrides settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_env`].
    pub fn apply_env(self) -> Result<Self, ConfigurationError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overrides settings from `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_env`].
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR) {
            self.checkpoint = CheckpointBackend::file(dir);
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_attempts = parse_setting(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_COMPLEXITY_THRESHOLD) {
            self.router.complexity_threshold = parse_setting(ENV_COMPLEXITY_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RATE_LIMIT) {
            self.router.rate_limit = parse_setting(ENV_RATE_LIMIT, &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Parses a YAML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Parse`] or a validation failure.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Io`], [`ConfigurationError::Parse`] or a
    /// validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded pipeline configuration");
        Self::from_yaml_str(&content)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] naming the bad key.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.retry.validate()?;

        let threshold = self.router.complexity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "router.complexity_threshold",
                threshold,
                "must be between 0.0 and 1.0",
            ));
        }
        if self.router.window_secs == 0 {
            return Err(invalid("router.window_secs", 0, "window cannot be empty"));
        }
        Ok(())
    }

    /// Builds a router over the given providers with these settings.
    #[must_use]
    pub fn router<P: Clone>(&self, low: P, high: P, fallback: P) -> ModelRouter<P> {
        ModelRouter::new(low, high, fallback).with_settings(&self.router)
    }

    /// Builds a constrained generator with the configured repair budget.
    #[must_use]
    pub fn generator(&self) -> ConstrainedGenerator {
        ConstrainedGenerator::new().with_max_retries(self.constrained_max_retries)
    }
}

fn parse_setting<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, raw, &e.to_string()))
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.constrained_max_retries, 2);
        assert_eq!(config.router.rate_limit, 30);
        assert_eq!(config.checkpoint, CheckpointBackend::default());
        assert_eq!(config.generator().max_retries(), 2);
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::default()
            .apply_env_with(lookup(&[
                (ENV_CHECKPOINT_DIR, "/tmp/runs"),
                (ENV_MAX_RETRIES, "5"),
                (ENV_COMPLEXITY_THRESHOLD, "0.5"),
                (ENV_RATE_LIMIT, " 10 "),
            ]))
            .unwrap();

        assert_eq!(config.checkpoint, CheckpointBackend::file("/tmp/runs"));
        assert_eq!(config.retry.max_attempts, 5);
        assert!((config.router.complexity_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.router.rate_limit, 10);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = PipelineConfig::default()
            .apply_env_with(lookup(&[(ENV_MAX_RETRIES, "many")]))
            .unwrap_err();
        assert_eq!(err.code(), "DAG-009-SETTING");
        assert!(err.to_string().contains(ENV_MAX_RETRIES));

        let err = PipelineConfig::default()
            .apply_env_with(lookup(&[(ENV_COMPLEXITY_THRESHOLD, "1.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("router.complexity_threshold"));
    }

    #[test]
    fn test_yaml_partial_document() {
        let config = PipelineConfig::from_yaml_str(
            "checkpoint:\n  backend: memory\nretry:\n  max_attempts: 4\n  base_delay_ms: 10\n",
        )
        .unwrap();

        assert_eq!(config.checkpoint, CheckpointBackend::Memory);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.router, RouterSettings::default());
    }

    #[test]
    fn test_yaml_zero_attempts_rejected() {
        let err =
            PipelineConfig::from_yaml_str("retry:\n  max_attempts: 0\n").unwrap_err();
        assert_eq!(err.code(), "DAG-009-SETTING");
    }

    #[test]
    fn test_load_missing_file() {
        let err =
            PipelineConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert_eq!(err.code(), "DAG-011-IO");
    }

    #[test]
    fn test_router_uses_settings() {
        let config = PipelineConfig::default().with_router(RouterSettings {
            complexity_threshold: 0.2,
            rate_limit: 1,
            ..RouterSettings::default()
        });
        let router = config.router("low", "high", "fallback");
        assert!((router.threshold() - 0.2).abs() < f64::EPSILON);
        assert_eq!(router.remaining_budget(), 1);
    }
}
