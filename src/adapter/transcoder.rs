//! Conversion between ORM records and stored documents.
//!
//! Records are identified by `id` and carry real dates and ordered arrays.
//! Documents are identified by `_id`, store dates as ISO-8601 strings and may
//! come back with arrays encoded as keyed maps, because the database has no
//! native array type.

use serde_json::Value;

use crate::adapter::schema::{Definition, FieldType};
use crate::adapter::value::{format_date, parse_date, Document, FieldValue, Record};

pub const RECORD_ID: &str = "id";
pub const DOCUMENT_ID: &str = "_id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Converts a record into the document written to the database.
///
/// Every `date`/`datetime` attribute holding a value is written as an ISO-8601
/// string; values that cannot be read as a date are written unchanged.
pub fn serialize(record: &Record, definition: &Definition) -> Document {
    let mut document = Document::new();
    let has_record_id = record.contains_key(RECORD_ID);

    for (field, value) in record {
        let key = match field.as_str() {
            RECORD_ID => DOCUMENT_ID,
            DOCUMENT_ID if has_record_id => continue,
            other => other,
        };

        let encoded = match definition.field_type(field) {
            Some(field_type) if field_type.is_temporal() && !value.is_blank() => {
                encode_date(value)
            }
            _ => value.to_json(),
        };
        document.insert(key.to_owned(), encoded);
    }

    document
}

/// Converts a stored document back into a record.
///
/// `createdAt` and `updatedAt` are always read as dates, other temporal
/// attributes follow the definition and `array` attributes stored as maps are
/// flattened. With a `prototype`, the record starts as a copy of it and the
/// document fields are laid over it; an empty document stays empty.
pub fn deserialize(
    document: &Document,
    definition: &Definition,
    prototype: Option<&Record>,
) -> Record {
    if document.is_empty() {
        return Record::new();
    }
    let mut record = prototype.cloned().unwrap_or_default();
    let has_document_id = document.contains_key(DOCUMENT_ID);

    for (field, raw) in document {
        let key = match field.as_str() {
            DOCUMENT_ID => RECORD_ID,
            RECORD_ID if has_document_id => continue,
            other => other,
        };

        let value = FieldValue::from(raw.clone());
        let value = if field == CREATED_AT || field == UPDATED_AT {
            coerce_date(value)
        } else {
            match definition.field_type(field) {
                Some(field_type) if field_type.is_temporal() => coerce_date(value),
                Some(FieldType::Array) => flatten_array(value),
                _ => value,
            }
        };
        record.insert(key.to_owned(), value);
    }

    record
}

fn encode_date(value: &FieldValue) -> Value {
    parse_date(value)
        .map(|date| Value::String(format_date(&date)))
        .unwrap_or_else(|| value.to_json())
}

fn coerce_date(value: FieldValue) -> FieldValue {
    if value.is_blank() {
        return value;
    }
    parse_date(&value).map(FieldValue::Date).unwrap_or(value)
}

/// Restores an array stored as a keyed map. Index-like keys are ordered
/// numerically; any other keys keep the map's iteration order.
fn flatten_array(value: FieldValue) -> FieldValue {
    let FieldValue::Map(entries) = value else {
        return value;
    };

    let mut indexed: Vec<(Option<u64>, FieldValue)> = entries
        .into_iter()
        .map(|(key, item)| (key.parse::<u64>().ok(), item))
        .collect();
    if indexed.iter().all(|(index, _)| index.is_some()) {
        indexed.sort_by_key(|(index, _)| *index);
    }
    FieldValue::Array(indexed.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::value::{record_from_json, record_to_json};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn definition() -> Definition {
        Definition::new()
            .with_field("name", FieldType::String)
            .with_field("born", FieldType::Date)
            .with_field("seen", FieldType::Datetime)
            .with_field("tags", FieldType::Array)
    }

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn serialize_renames_id_and_formats_dates() {
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let mut record = record_from_json(json!({"id": "abc", "name": "Ada", "tags": ["x", "y"]}));
        record.insert("seen".into(), FieldValue::Date(seen));
        record.insert("born".into(), FieldValue::from("1815-12-10"));

        let document = serialize(&record, &definition());

        assert_eq!(
            Value::Object(document),
            json!({
                "_id": "abc",
                "name": "Ada",
                "tags": ["x", "y"],
                "seen": "2024-05-01T08:30:00.000Z",
                "born": "1815-12-10T00:00:00.000Z"
            })
        );
    }

    #[test]
    fn serialize_leaves_blank_and_unparseable_dates_alone() {
        let record = record_from_json(json!({"seen": "", "born": "someday"}));
        let document = serialize(&record, &definition());
        assert_eq!(Value::Object(document), json!({"seen": "", "born": "someday"}));
    }

    #[test]
    fn serialize_does_not_alias_input() {
        let record = record_from_json(json!({"id": "abc", "nested": {"n": 1}}));
        let mut document = serialize(&record, &definition());
        document.insert("nested".into(), json!(null));
        assert_eq!(record["nested"], FieldValue::from(json!({"n": 1})));
    }

    #[test]
    fn deserialize_restores_dates_and_arrays() {
        let stored = document(json!({
            "_id": "abc",
            "seen": "2024-05-01T08:30:00.000Z",
            "createdAt": "2024-05-01T08:00:00.000Z",
            "tags": {"1": "y", "0": "x", "10": "z"}
        }));

        let record = deserialize(&stored, &definition(), None);

        assert_eq!(record["id"], FieldValue::from("abc"));
        assert!(!record.contains_key("_id"));
        assert_eq!(
            record["seen"],
            FieldValue::Date(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap())
        );
        assert!(record["createdAt"].as_date().is_some());
        assert_eq!(
            record["tags"],
            FieldValue::Array(vec!["x".into(), "y".into(), "z".into()])
        );
    }

    #[test]
    fn deserialize_flattens_push_keyed_arrays_to_same_length() {
        let stored = document(json!({"tags": {"-Na": "a", "-Nb": "b", "-Nc": "c"}}));
        let record = deserialize(&stored, &definition(), None);
        match &record["tags"] {
            FieldValue::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn deserialize_overlays_document_on_prototype() {
        let prototype = record_from_json(json!({"kind": "person", "name": "unknown"}));
        let stored = document(json!({"_id": "abc", "name": "Ada"}));

        let record = deserialize(&stored, &definition(), Some(&prototype));

        assert_eq!(
            record_to_json(&record),
            json!({"id": "abc", "kind": "person", "name": "Ada"})
        );
        assert_eq!(prototype["name"], FieldValue::from("unknown"));
    }

    #[test]
    fn round_trip_without_dates_or_arrays_is_identity() {
        let record = record_from_json(json!({
            "id": "abc",
            "name": "Ada",
            "age": 36,
            "active": true,
            "meta": {"lang": "en"}
        }));
        let definition = definition().with_field("age", FieldType::Integer);

        let restored = deserialize(&serialize(&record, &definition), &definition, None);

        assert_eq!(restored, record);
    }

    #[test]
    fn empty_input_passes_through() {
        assert!(serialize(&Record::new(), &definition()).is_empty());
        assert!(deserialize(&Document::new(), &definition(), None).is_empty());
    }

    #[test]
    fn empty_document_ignores_prototype() {
        let prototype = record_from_json(json!({"kind": "pet"}));
        assert!(deserialize(&Document::new(), &definition(), Some(&prototype)).is_empty());
    }
}
