//! Run options shared by the binary and embedders.

use std::path::PathBuf;
use std::time::Duration;

use crate::collector::traits::Credentials;

/// Polling interval when neither CLI, environment nor config sets one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest polling interval accepted outside run-once mode.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Resolved process options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_file: PathBuf,
    pub poll_interval: Duration,
    /// Hosts to query; the first one also polls native counters.
    pub hosts: Vec<String>,
    pub credentials: Option<Credentials>,
    pub run_once: bool,
    pub verbose: bool,
    pub ignore_info_logs: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("config.yaml"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            hosts: vec![local_host_name()],
            credentials: None,
            run_once: false,
            verbose: false,
            ignore_info_logs: false,
        }
    }
}

/// Pick the polling interval: CLI/environment first, then the config file,
/// then the default. Floored at [`MIN_POLL_INTERVAL`] unless running once.
pub fn effective_interval(
    requested: Option<Duration>,
    from_file: Option<Duration>,
    run_once: bool,
) -> Duration {
    let interval = requested.or(from_file).unwrap_or(DEFAULT_POLL_INTERVAL);
    if !run_once && interval < MIN_POLL_INTERVAL {
        tracing::warn!(
            requested = ?interval,
            minimum = ?MIN_POLL_INTERVAL,
            "Polling interval below minimum, using minimum"
        );
        return MIN_POLL_INTERVAL;
    }
    interval
}

/// Split a comma-separated host list, dropping blanks.
pub fn split_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Name of the local machine, from the usual environment variables.
pub fn local_host_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_interval_precedence() {
        let cli = Some(Duration::from_secs(60));
        let file = Some(Duration::from_secs(30));
        assert_eq!(effective_interval(cli, file, false), Duration::from_secs(60));
        assert_eq!(effective_interval(None, file, false), Duration::from_secs(30));
        assert_eq!(effective_interval(None, None, false), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_effective_interval_floor() {
        let short = Some(Duration::from_secs(1));
        assert_eq!(effective_interval(short, None, false), MIN_POLL_INTERVAL);
        assert_eq!(effective_interval(short, None, true), Duration::from_secs(1));
    }

    #[test]
    fn test_split_hosts() {
        assert_eq!(split_hosts("web-01, web-02,,"), vec!["web-01", "web-02"]);
        assert!(split_hosts("").is_empty());
    }
}
