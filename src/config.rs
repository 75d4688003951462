//! Configuration module for the perfmon collector.
//!
//! Provides YAML-based configuration loading and validation for:
//! - The source list (`counterlist`)
//! - Engine defaults (namespace, event name, provider and query type names)
//! - Run options resolved from CLI flags, environment and the config file

mod app;
mod defaults;
mod options;
mod source;
mod validation;

pub use app::AppConfig;
pub use defaults::EngineDefaults;
pub use options::{
    DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, RunOptions, effective_interval, local_host_name,
    split_hosts,
};
pub use source::{CounterSpec, SourceSpec};
pub use validation::{ConfigError, expand_env_vars, parse_duration, parse_interval};
