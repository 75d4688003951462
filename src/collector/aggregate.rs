//! Turning raw readings and rows into [`MetricRecord`]s.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::collector::counter::CounterReading;
use crate::collector::normalize::normalize;
use crate::collector::query::{AttributeRule, PropertyValue, QuerySource, Row};
use crate::emit::{EVENT_TYPE_KEY, MetricRecord, NAME_KEY};

/// Replace every character outside `[0-9A-Za-z_:]` with `_`.
pub fn sanitize_category(category: &str) -> String {
    category
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Normalize a counter display name into a field name.
///
/// `"% Processor Time"` becomes `"PercentProcessorTime"` and
/// `"Disk Reads/sec"` becomes `"DiskReadsPerSec"`.
pub fn counter_field_name(counter: &str) -> String {
    let mut out = String::with_capacity(counter.len() + 8);
    let mut capitalize = false;
    for c in counter.chars() {
        match c {
            ' ' => continue,
            '-' => out.push('_'),
            '%' => out.push_str("Percent"),
            '/' => {
                out.push_str("Per");
                capitalize = true;
                continue;
            }
            c if capitalize => out.extend(c.to_uppercase()),
            c => out.push(c),
        }
        capitalize = false;
    }
    out
}

/// Group one cycle's counter readings into one record per `(category, instance)`.
///
/// Groups without any metric field are dropped.
pub fn aggregate_counters(readings: &[CounterReading]) -> Vec<MetricRecord> {
    let mut groups: BTreeMap<(&str, &str), MetricRecord> = BTreeMap::new();

    for reading in readings {
        let Some(number) = Number::from_f64(reading.value) else {
            continue;
        };
        let (category, instance) = reading.counter.group();
        groups
            .entry((category, instance))
            .or_insert_with(|| {
                MetricRecord::new(sanitize_category(category)).with_name(instance)
            })
            .insert(
                counter_field_name(&reading.counter.counter),
                Value::Number(number),
            );
    }

    groups
        .into_values()
        .filter(MetricRecord::has_metrics)
        .collect()
}

/// Build the record for one query result row.
///
/// Row fields named `event_type` or `name` are dropped; those keys belong to
/// the record itself.
pub fn record_row(source: &QuerySource, row: &Row) -> MetricRecord {
    let mut record = MetricRecord::new(source.event_name.clone());

    if source.attributes.is_empty() {
        for property in row.iter() {
            if let Some(value) = whole_value(&property.value) {
                insert_field(&mut record, &property.name, value);
            }
        }
        return record;
    }

    for rule in &source.attributes {
        map_attribute(&mut record, rule, row);
    }
    record
}

fn map_attribute(record: &mut MetricRecord, rule: &AttributeRule, row: &Row) {
    let path = rule.path.trim();
    let label = rule.label.as_deref().unwrap_or(path);
    let mut segments = path.splitn(2, '.');
    let head = segments.next().unwrap_or_default();
    let tail = segments.next();

    let Some(property) = row.get(head) else {
        tracing::debug!(field = %head, "Mapped field not present in row");
        return;
    };

    match (&property.value, tail) {
        (PropertyValue::Object(inner), Some(sub)) => match inner.get(sub) {
            Some(p) => insert_scalar(record, label, &p.value, rule),
            None => tracing::debug!(field = %path, "Mapped sub-field not present in row"),
        },
        (PropertyValue::Object(inner), None) => {
            for p in inner.iter() {
                insert_scalar(record, &p.name, &p.value, rule);
            }
        }
        (value, _) => insert_scalar(record, label, value, rule),
    }
}

fn insert_scalar(record: &mut MetricRecord, label: &str, value: &PropertyValue, rule: &AttributeRule) {
    tracing::trace!(label, ?value, "Parsing field");
    let normalized = match value {
        PropertyValue::Null => None,
        PropertyValue::Raw(raw) => {
            let v = normalize(raw, rule.parser.as_ref());
            if v.is_none() {
                tracing::debug!(label, kind = raw.kind(), "Field has no usable value, omitting");
            }
            v
        }
        PropertyValue::Object(row) => Some(object_value(row)),
    };
    if let Some(v) = normalized {
        insert_field(record, label, v);
    }
}

fn insert_field(record: &mut MetricRecord, key: &str, value: Value) {
    if key == EVENT_TYPE_KEY || key == NAME_KEY {
        tracing::debug!(field = key, "Row field collides with a reserved record key, dropping");
        return;
    }
    record.insert(key.to_string(), value);
}

fn whole_value(value: &PropertyValue) -> Option<Value> {
    match value {
        PropertyValue::Null => None,
        PropertyValue::Raw(raw) => normalize(raw, None),
        PropertyValue::Object(row) => Some(object_value(row)),
    }
}

fn object_value(row: &Row) -> Value {
    let map: Map<String, Value> = row
        .iter()
        .filter_map(|p| whole_value(&p.value).map(|v| (p.name.clone(), v)))
        .collect();
    Value::Object(map)
}
