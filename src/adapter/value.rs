use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};

/// ORM-side representation of one stored entity, keyed by field name.
pub type Record = BTreeMap<String, FieldValue>;

/// Storage-side representation of one stored entity.
pub type Document = Map<String, Value>;

/// A record field value. Unlike JSON it can carry a real date-time.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// `null` and the empty string count as "no value" for type coercion.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::String(value) => value.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            FieldValue::Date(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => value.as_f64(),
            _ => None,
        }
    }

    /// JSON form of the value; dates become ISO-8601 strings.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(flag) => Value::Bool(*flag),
            FieldValue::Number(number) => Value::Number(number.clone()),
            FieldValue::String(text) => Value::String(text.clone()),
            FieldValue::Date(date) => Value::String(format_date(date)),
            FieldValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(flag) => FieldValue::Bool(flag),
            Value::Number(number) => FieldValue::Number(number),
            Value::String(text) => FieldValue::String(text),
            Value::Array(items) => FieldValue::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(key, value)| (key, FieldValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Null)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(value: Vec<FieldValue>) -> Self {
        FieldValue::Array(value)
    }
}

/// Builds a record from a JSON object; anything else yields an empty record.
pub fn record_from_json(value: Value) -> Record {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, FieldValue::from(value)))
            .collect(),
        _ => Record::new(),
    }
}

pub fn record_to_json(record: &Record) -> Value {
    Value::Object(
        record
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

/// Formats a date the way the database stores it: `2024-01-31T12:00:00.000Z`.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Interprets a value as a point in time: dates as-is, RFC 3339 / ISO-8601
/// strings (with or without offset, or date-only) and epoch milliseconds.
pub fn parse_date(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Date(date) => Some(*date),
        FieldValue::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|millis| millis as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        FieldValue::String(text) => parse_date_str(text),
        _ => None,
    }
}

pub(crate) fn parse_date_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dates_render_as_iso_strings() {
        let date = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(FieldValue::Date(date).to_json(), json!("2024-01-31T12:00:00.000Z"));
    }

    #[test]
    fn parse_date_accepts_common_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        for raw in [
            json!("2024-01-31T00:00:00.000Z"),
            json!("2024-01-31T02:00:00+02:00"),
            json!("2024-01-31T00:00:00"),
            json!("2024-01-31"),
            json!(expected.timestamp_millis()),
        ] {
            assert_eq!(parse_date(&FieldValue::from(raw.clone())), Some(expected), "{raw}");
        }
        assert_eq!(parse_date(&FieldValue::from("yesterday")), None);
        assert_eq!(parse_date(&FieldValue::Bool(true)), None);
    }

    #[test]
    fn record_json_conversion_keeps_nesting() {
        let record = record_from_json(json!({"name": "Ada", "tags": ["a"], "meta": {"n": 1}}));
        assert_eq!(record["tags"], FieldValue::Array(vec!["a".into()]));
        assert_eq!(
            record_to_json(&record),
            json!({"name": "Ada", "tags": ["a"], "meta": {"n": 1}})
        );
        assert!(record_from_json(json!([1, 2])).is_empty());
    }
}
