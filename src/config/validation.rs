//! Config file errors and value parsers shared by the file and the CLI.

use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Why a config file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read source list: {0}")]
    IoError(#[from] std::io::Error),

    #[error("source list is not valid YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The file parsed but is unusable as a whole.
    #[error("invalid source list: {0}")]
    ValidationError(String),
}

/// Parse a humantime duration such as `30s`, `1m30s` or `250ms`.
///
/// ```
/// use perfmon::config::parse_duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match s.trim() {
        "" => Err("empty duration".to_string()),
        trimmed => humantime::parse_duration(trimmed).map_err(|e| format!("'{trimmed}': {e}")),
    }
}

/// Parse a polling interval: a bare integer is milliseconds, anything else
/// is a humantime duration.
///
/// ```
/// use perfmon::config::parse_interval;
///
/// assert_eq!(parse_interval("15000").unwrap().as_secs(), 15);
/// assert_eq!(parse_interval("1m").unwrap().as_secs(), 60);
/// ```
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    s.parse::<u64>()
        .map(Duration::from_millis)
        .or_else(|_| parse_duration(s))
}

/// Substitute `${NAME}` and `${NAME:-fallback}` with environment values.
/// Unset variables without a fallback become empty.
pub fn expand_env_vars(input: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<fallback>[^}]*))?\}")
            .expect("placeholder pattern is valid")
    });

    placeholder
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps["name"]).unwrap_or_else(|_| {
                caps.name("fallback")
                    .map_or_else(String::new, |m| m.as_str().to_string())
            })
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_rejects_bare_and_empty() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
        assert!(parse_duration("30").is_err());
        assert_eq!(parse_duration(" 45s ").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_interval_millis_and_humantime() {
        assert_eq!(parse_interval("10000").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval(" 250 ").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_interval("-5").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_expand_env_vars_fallback_and_unset() {
        assert_eq!(
            expand_env_vars("host: ${NONEXISTENT_PERFMON_HOST_12345:-localhost}"),
            "host: localhost"
        );
        assert_eq!(expand_env_vars("ns: ${NONEXISTENT_PERFMON_NS_12345}"), "ns: ");
    }

    #[test]
    fn test_expand_env_vars_leaves_backslashes() {
        assert_eq!(expand_env_vars("root\\cimv2"), "root\\cimv2");
    }
}
