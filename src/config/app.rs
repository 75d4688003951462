//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::EngineDefaults;
use super::source::SourceSpec;
use super::validation::{ConfigError, expand_env_vars};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fixed envelope name; the polled host name when unset.
    #[serde(default)]
    pub name: Option<String>,

    /// Polling interval; overridden by `--poll-interval` / `POLLINGINTERVAL`.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Resolution defaults.
    #[serde(default)]
    pub defaults: EngineDefaults,

    /// Configured sources, in order.
    #[serde(default)]
    pub counterlist: Vec<SourceSpec>,
}

impl AppConfig {
    /// Load configuration from a YAML (or JSON) file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&expand_env_vars(&content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Individual malformed sources are not rejected here; they are reported
    /// and skipped during resolution.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the file is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.counterlist.is_empty() {
            return Err(ConfigError::ValidationError(
                "'counterlist' is empty or missing".to_string(),
            ));
        }

        if self.interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::ValidationError(
                "interval must be positive".to_string(),
            ));
        }

        if self.defaults.namespace.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "defaults.namespace must not be empty".to_string(),
            ));
        }

        if self.defaults.pull_query_type.eq_ignore_ascii_case(&self.defaults.push_query_type) {
            return Err(ConfigError::ValidationError(format!(
                "pull and push query types must differ (both '{}')",
                self.defaults.pull_query_type
            )));
        }

        Ok(())
    }
}
