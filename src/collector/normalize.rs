//! Type-directed normalization of raw provider values.

use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value;

/// Fixed CIM timestamp layout: `yyyyMMddHHmmss.ffffff-000`.
const CIM_DATETIME_FORMAT: &str = "%Y%m%d%H%M%S%.6f-000";

/// A typed value as produced by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Boolean property.
    Bool(bool),
    /// CIM-formatted timestamp string.
    DateTime(String),
    /// Plain string property.
    String(String),
    /// Array of strings.
    StringArray(Vec<String>),
    /// Any numeric property.
    Number(serde_json::Number),
    /// Anything else; passed through untouched.
    Opaque(Value),
}

impl RawValue {
    /// Numeric value from a float. Non-finite floats become `Opaque(null)`.
    pub fn float(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(Self::Number)
            .unwrap_or(Self::Opaque(Value::Null))
    }

    /// Numeric value from an integer.
    pub fn int(value: i64) -> Self {
        Self::Number(value.into())
    }

    /// Short tag used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Boolean",
            Self::DateTime(_) => "DateTime",
            Self::String(_) => "String",
            Self::StringArray(_) => "StringArray",
            Self::Number(_) => "Number",
            Self::Opaque(_) => "Opaque",
        }
    }
}

/// Normalize a raw value into an output value.
///
/// Returns `None` when the field should be omitted from the record.
pub fn normalize(raw: &RawValue, parser: Option<&Regex>) -> Option<Value> {
    match raw {
        RawValue::Bool(b) => Some(Value::String(bool_label(*b).to_string())),
        RawValue::DateTime(s) => match parse_cim_datetime(s) {
            Some(ms) => Some(Value::from(ms)),
            None => {
                tracing::debug!(value = %s, "Could not parse CIM datetime, skipping field");
                None
            }
        },
        RawValue::String(s) if s.is_empty() => None,
        RawValue::String(s) => Some(Value::String(match parser {
            Some(re) => apply_parser(re, s),
            None => s.clone(),
        })),
        RawValue::StringArray(items) => Some(Value::String(items.join(", "))),
        RawValue::Number(n) => Some(Value::Number(n.clone())),
        RawValue::Opaque(v) => Some(v.clone()),
    }
}

/// Parse a CIM timestamp into milliseconds since the Unix epoch (UTC).
pub fn parse_cim_datetime(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s.trim(), CIM_DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Extract from `input` with a configured parser expression.
///
/// Capture groups that participated are joined with a single space, in group
/// order. A match without groups yields the whole match; no match leaves the
/// input untouched.
pub fn apply_parser(re: &Regex, input: &str) -> String {
    let Some(caps) = re.captures(input) else {
        return input.to_string();
    };
    if caps.len() <= 1 {
        return caps
            .get(0)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| input.to_string());
    }
    caps.iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bool_label(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_bool() {
        assert_eq!(normalize(&RawValue::Bool(true), None), Some(json!("True")));
        assert_eq!(normalize(&RawValue::Bool(false), None), Some(json!("False")));
    }

    #[test]
    fn test_normalize_datetime_to_epoch_millis() {
        let raw = RawValue::DateTime("20230101120000.000000-000".to_string());
        assert_eq!(normalize(&raw, None), Some(json!(1_672_574_400_000_i64)));
    }

    #[test]
    fn test_normalize_datetime_keeps_fraction() {
        assert_eq!(
            parse_cim_datetime("19700101000001.250000-000"),
            Some(1_250)
        );
    }

    #[test]
    fn test_normalize_datetime_malformed_is_skipped() {
        let raw = RawValue::DateTime("2023-01-01T12:00:00Z".to_string());
        assert_eq!(normalize(&raw, None), None);
        let raw = RawValue::DateTime("20230101120000.000000+060".to_string());
        assert_eq!(normalize(&raw, None), None);
    }

    #[test]
    fn test_normalize_empty_string_is_skipped() {
        assert_eq!(normalize(&RawValue::String(String::new()), None), None);
    }

    #[test]
    fn test_normalize_string_passthrough() {
        let raw = RawValue::String("Running".to_string());
        assert_eq!(normalize(&raw, None), Some(json!("Running")));
    }

    #[test]
    fn test_parser_joins_capture_groups() {
        let re = Regex::new(r"(\d+)\.(\d+)").unwrap();
        let raw = RawValue::String("version 10.42 build".to_string());
        assert_eq!(normalize(&raw, Some(&re)), Some(json!("10 42")));
    }

    #[test]
    fn test_parser_without_groups_uses_whole_match() {
        let re = Regex::new(r"\d+ms").unwrap();
        assert_eq!(apply_parser(&re, "latency 35ms observed"), "35ms");
    }

    #[test]
    fn test_parser_no_match_keeps_original() {
        let re = Regex::new(r"(\d+)").unwrap();
        assert_eq!(apply_parser(&re, "no digits here"), "no digits here");
    }

    #[test]
    fn test_parser_skips_unmatched_optional_group() {
        let re = Regex::new(r"(a)(x)?(b)").unwrap();
        assert_eq!(apply_parser(&re, "ab"), "a b");
    }

    #[test]
    fn test_normalize_string_array() {
        let raw = RawValue::StringArray(vec!["C:".to_string(), "D:".to_string()]);
        assert_eq!(normalize(&raw, None), Some(json!("C:, D:")));
    }

    #[test]
    fn test_normalize_number_and_opaque_passthrough() {
        assert_eq!(normalize(&RawValue::int(42), None), Some(json!(42)));
        assert_eq!(normalize(&RawValue::float(1.5), None), Some(json!(1.5)));
        let opaque = RawValue::Opaque(json!({"k": [1, 2]}));
        assert_eq!(normalize(&opaque, None), Some(json!({"k": [1, 2]})));
    }
}
