//! Engine-wide defaults, passed explicitly at construction.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::collector::query::QueryKind;

/// Names and fallbacks applied while resolving sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDefaults {
    /// Query namespace when a source names none.
    pub namespace: String,

    /// Event name of query records when a source names none.
    pub event_name: String,

    /// Provider names that select the native counter path.
    pub counter_providers: Vec<String>,

    /// Query type name for pull queries.
    pub pull_query_type: String,

    /// Query type name for push (event) queries.
    pub push_query_type: String,

    /// Attribute label meaning "keep the raw field name".
    pub use_field_name: String,

    /// Class prefix of synthesized formatted-data queries.
    pub formatted_data_prefix: String,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            namespace: "root\\cimv2".to_string(),
            event_name: "WMIQueryResult".to_string(),
            counter_providers: vec!["PerfCounter".to_string(), "NativeCounter".to_string()],
            pull_query_type: "wmi_query".to_string(),
            push_query_type: "wmi_eventlistener".to_string(),
            use_field_name: "using_counter_name".to_string(),
            formatted_data_prefix: "Win32_PerfFormattedData".to_string(),
        }
    }
}

impl EngineDefaults {
    pub fn is_counter_provider(&self, provider: &str) -> bool {
        self.counter_providers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
    }

    /// Map a configured query type to its kind. Accepts the configured
    /// names as well as `pull` / `push`.
    pub fn query_kind(&self, query_type: &str) -> Option<QueryKind> {
        let query_type = query_type.trim();
        if query_type.eq_ignore_ascii_case(&self.pull_query_type) {
            Some(QueryKind::Pull)
        } else if query_type.eq_ignore_ascii_case(&self.push_query_type) {
            Some(QueryKind::Push)
        } else {
            QueryKind::from_str(query_type).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_kind_names() {
        let defaults = EngineDefaults::default();
        assert_eq!(defaults.query_kind("wmi_query"), Some(QueryKind::Pull));
        assert_eq!(defaults.query_kind("WMI_EventListener"), Some(QueryKind::Push));
        assert_eq!(defaults.query_kind("push"), Some(QueryKind::Push));
        assert_eq!(defaults.query_kind("stream"), None);
    }

    #[test]
    fn test_counter_provider_names() {
        let defaults = EngineDefaults::default();
        assert!(defaults.is_counter_provider("PerfCounter"));
        assert!(defaults.is_counter_provider("nativecounter"));
        assert!(!defaults.is_counter_provider("PerfOS"));
    }
}
