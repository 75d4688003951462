//! Declarative source definitions as they appear in the config file.

use serde::{Deserialize, Serialize};

/// One counter or attribute entry of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSpec {
    /// Counter name, `"*"`, or a query field path (`"field"` / `"outer.inner"`).
    pub counter: Option<String>,

    /// Output label of a query field.
    #[serde(alias = "attrname", alias = "attrName")]
    pub attr_name: Option<String>,

    /// Extraction regex applied to string values.
    pub parser: Option<String>,
}

impl CounterSpec {
    pub fn new(counter: impl Into<String>) -> Self {
        Self {
            counter: Some(counter.into()),
            ..Default::default()
        }
    }

    pub fn with_attr_name(mut self, attr_name: impl Into<String>) -> Self {
        self.attr_name = Some(attr_name.into());
        self
    }

    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.parser = Some(parser.into());
        self
    }
}

/// A configured origin of metrics: native counters or a structured query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    pub provider: Option<String>,
    pub category: Option<String>,
    pub instance: Option<String>,
    pub counters: Option<Vec<CounterSpec>>,
    pub query: Option<String>,

    #[serde(alias = "eventname", alias = "eventName")]
    pub event_name: Option<String>,

    #[serde(alias = "querytype", alias = "queryType")]
    pub query_type: Option<String>,

    #[serde(alias = "querynamespace", alias = "queryNamespace")]
    pub namespace: Option<String>,
}

impl SourceSpec {
    /// Native counter (or formatted-data) source.
    pub fn counters(
        provider: impl Into<String>,
        category: impl Into<String>,
        instance: impl Into<String>,
        counters: Vec<CounterSpec>,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            category: Some(category.into()),
            instance: Some(instance.into()),
            counters: Some(counters),
            ..Default::default()
        }
    }

    /// Structured query source.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_counters(mut self, counters: Vec<CounterSpec>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = Some(query_type.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_spec_accepts_original_spellings() {
        let yaml = r#"
query: "SELECT * FROM __InstanceCreationEvent WITHIN 1"
eventname: ProcessStart
querytype: wmi_eventlistener
querynamespace: root\cimv2
counters:
  - counter: TargetInstance.Name
    attrname: process
"#;
        let spec: SourceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.event_name.as_deref(), Some("ProcessStart"));
        assert_eq!(spec.query_type.as_deref(), Some("wmi_eventlistener"));
        assert_eq!(spec.namespace.as_deref(), Some("root\\cimv2"));
        let counters = spec.counters.unwrap();
        assert_eq!(counters[0].attr_name.as_deref(), Some("process"));
    }

    #[test]
    fn test_source_spec_from_json() {
        let json = r#"{"provider": "PerfCounter", "category": "Processor", "instance": "_Total",
                       "counters": [{"counter": "% Processor Time"}]}"#;
        let spec: SourceSpec = serde_yaml::from_str(json).unwrap();
        assert_eq!(spec.category.as_deref(), Some("Processor"));
        assert!(spec.query.is_none());
    }
}
