//! Output data types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the record's event type.
pub const EVENT_TYPE_KEY: &str = "event_type";

/// Key holding the record's instance label.
pub const NAME_KEY: &str = "name";

const PROTOCOL_VERSION: &str = "1";

// =============================================================================
// MetricRecord
// =============================================================================

/// One normalized, labeled group of metric fields.
///
/// Keys keep insertion order: `event_type`, then `name` when present, then
/// metric fields. Inserting an existing key overwrites it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricRecord(Map<String, Value>);

impl MetricRecord {
    pub fn new(event_type: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(EVENT_TYPE_KEY.to_string(), Value::String(event_type.into()));
        Self(map)
    }

    /// Set the instance label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.0.insert(NAME_KEY.to_string(), Value::String(name.into()));
        self
    }

    /// Insert a field, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.0.get(EVENT_TYPE_KEY).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get(NAME_KEY).and_then(Value::as_str)
    }

    /// Number of fields other than `event_type` and `name`.
    pub fn metric_field_count(&self) -> usize {
        self.0
            .keys()
            .filter(|k| k.as_str() != EVENT_TYPE_KEY && k.as_str() != NAME_KEY)
            .count()
    }

    pub fn has_metrics(&self) -> bool {
        self.metric_field_count() > 0
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

// =============================================================================
// MetricBatch
// =============================================================================

/// The records produced by one poll cycle of one scheduling unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricBatch {
    host: String,
    records: Vec<MetricRecord>,
}

impl MetricBatch {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            records: Vec::new(),
        }
    }

    /// Append a record. Records without metric fields are dropped.
    pub fn push(&mut self, record: MetricRecord) -> bool {
        if !record.has_metrics() {
            tracing::trace!(event_type = ?record.event_type(), "Dropping record without metric fields");
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MetricRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Serialized form of one batch on the output stream.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub name: &'a str,
    pub protocol_version: &'static str,
    pub integration_version: &'static str,
    pub metrics: &'a [MetricRecord],
    pub events: Vec<Value>,
    pub inventory: Map<String, Value>,
}

impl<'a> Envelope<'a> {
    pub fn new(name: &'a str, metrics: &'a [MetricRecord]) -> Self {
        Self {
            name,
            protocol_version: PROTOCOL_VERSION,
            integration_version: env!("CARGO_PKG_VERSION"),
            metrics,
            events: Vec::new(),
            inventory: Map::new(),
        }
    }
}
