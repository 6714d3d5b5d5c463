use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::adapter::value::Record;

/// Declared type of a model attribute. Unknown type names are kept verbatim so
/// a definition persists exactly as it was supplied.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Float,
    Number,
    Boolean,
    Date,
    Datetime,
    Array,
    Json,
    Binary,
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Array => "array",
            FieldType::Json => "json",
            FieldType::Binary => "binary",
            FieldType::Other(name) => name,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Datetime)
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "string" => FieldType::String,
            "text" => FieldType::Text,
            "integer" => FieldType::Integer,
            "float" => FieldType::Float,
            "number" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "array" => FieldType::Array,
            "json" => FieldType::Json,
            "binary" => FieldType::Binary,
            _ => FieldType::Other(value),
        }
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute of a model definition: its type plus any other keys the ORM
/// attached (`required`, `unique`, `defaultsTo`, ...).
///
/// A parsed attribute serializes back exactly as it was written, including
/// the shorthand form (`"name": "string"`) and the spelling of the type name.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "RawAttribute")]
pub struct Attribute {
    pub field_type: Option<FieldType>,
    pub options: Map<String, Value>,
    spelling: Option<String>,
    shorthand: bool,
}

impl Attribute {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type: Some(field_type),
            options: Map::new(),
            spelling: None,
            shorthand: false,
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    fn type_name(&self) -> Option<&str> {
        match (&self.spelling, &self.field_type) {
            (Some(spelling), Some(field_type))
                if FieldType::from(spelling.clone()) == *field_type =>
            {
                Some(spelling)
            }
            (_, field_type) => field_type.as_ref().map(FieldType::as_str),
        }
    }
}

impl Serialize for Attribute {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let type_name = self.type_name();
        if let (true, true, Some(name)) = (self.shorthand, self.options.is_empty(), type_name) {
            return serializer.serialize_str(name);
        }

        let mut map =
            serializer.serialize_map(Some(self.options.len() + usize::from(type_name.is_some())))?;
        if let Some(name) = type_name {
            map.serialize_entry("type", name)?;
        }
        for (key, value) in &self.options {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// Attributes may be written in shorthand form (`"name": "string"`).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAttribute {
    Shorthand(String),
    Full {
        #[serde(rename = "type", default)]
        field_type: Option<String>,
        #[serde(flatten)]
        options: Map<String, Value>,
    },
}

impl From<RawAttribute> for Attribute {
    fn from(raw: RawAttribute) -> Self {
        let (spelling, options, shorthand) = match raw {
            RawAttribute::Shorthand(name) => (Some(name), Map::new(), true),
            RawAttribute::Full {
                field_type,
                options,
            } => (field_type, options, false),
        };
        Attribute {
            field_type: spelling.clone().map(FieldType::from),
            options,
            spelling,
            shorthand,
        }
    }
}

/// The declared field-to-type schema of a collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Definition {
    attributes: BTreeMap<String, Attribute>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn with_field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.with_attribute(name, Attribute::new(field_type))
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.attributes
            .get(name)
            .and_then(|attribute| attribute.field_type.as_ref())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes
            .iter()
            .map(|(name, attribute)| (name.as_str(), attribute))
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Everything the adapter keeps about a collection: its definition and the
/// instance-method table overlaid under every record read from it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelSchema {
    pub definition: Definition,
    pub prototype: Option<Record>,
}

impl ModelSchema {
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            prototype: None,
        }
    }

    pub fn with_prototype(mut self, prototype: Record) -> Self {
        self.prototype = Some(prototype);
        self
    }
}

impl From<Definition> for ModelSchema {
    fn from(definition: Definition) -> Self {
        ModelSchema::new(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_round_trips_raw_schema() {
        let raw = json!({
            "name": {"type": "string", "required": true},
            "born": {"type": "date"},
            "shape": {"type": "geopoint", "index": "2d"},
            "owner": {"model": "user"}
        });
        let definition = Definition::from_json(raw.clone()).unwrap();

        assert_eq!(definition.field_type("born"), Some(&FieldType::Date));
        assert_eq!(
            definition.field_type("shape"),
            Some(&FieldType::Other("geopoint".into()))
        );
        assert_eq!(definition.field_type("owner"), None);
        assert_eq!(definition.to_json().unwrap(), raw);
    }

    #[test]
    fn shorthand_attributes_round_trip_as_written() {
        let raw = json!({
            "tags": "array",
            "born": "Date",
            "seen": {"type": "DATETIME", "required": true}
        });
        let definition = Definition::from_json(raw.clone()).unwrap();

        assert_eq!(definition.field_type("tags"), Some(&FieldType::Array));
        assert_eq!(definition.field_type("born"), Some(&FieldType::Date));
        assert_eq!(definition.field_type("seen"), Some(&FieldType::Datetime));
        assert_eq!(definition.to_json().unwrap(), raw);
    }

    #[test]
    fn changed_type_drops_stale_spelling() {
        let mut definition = Definition::from_json(json!({"born": "Date"})).unwrap();
        let mut attribute = definition.attribute("born").unwrap().clone();
        attribute.field_type = Some(FieldType::Datetime);
        definition = definition.with_attribute("born", attribute);

        assert_eq!(definition.to_json().unwrap(), json!({"born": "datetime"}));
    }
}
