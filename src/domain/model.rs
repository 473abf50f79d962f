use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schema-free record. Key order is kept so tabular writers can take their
/// columns from the first record; equality ignores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            data: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(field.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

impl TryFrom<Value> for Record {
    type Error = EtlError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(data) => Ok(Self { data }),
            other => Err(EtlError::malformed(
                "<value>",
                format!("expected an object, found {}", kind_of(&other)),
            )),
        }
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Renders a value the way text formats (csv, excel inline strings, xml) store it.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A bounded batch of records, delivered as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub records: Vec<Record>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Where an import reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// A file path, a `scheme://path` location, or a table name for the model adapter.
    Location(String),
    /// An in-memory collection.
    Records(Vec<Record>),
}

impl Source {
    pub fn location(location: impl Into<String>) -> Self {
        Self::Location(location.into())
    }

    /// Converts any serializable collection into an in-memory source.
    pub fn from_objects<T: Serialize>(items: &[T]) -> Result<Self> {
        let records = items
            .iter()
            .map(|item| Record::try_from(serde_json::to_value(item)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Records(records))
    }

    /// Human readable description used in logs, events and audit entries.
    pub fn describe(&self) -> String {
        match self {
            Self::Location(location) => location.clone(),
            Self::Records(records) => format!("<{} in-memory records>", records.len()),
        }
    }

    pub fn as_location(&self) -> Option<&str> {
        match self {
            Self::Location(location) => Some(location),
            Self::Records(_) => None,
        }
    }
}

impl From<&str> for Source {
    fn from(location: &str) -> Self {
        Self::Location(location.to_string())
    }
}

impl From<Vec<Record>> for Source {
    fn from(records: Vec<Record>) -> Self {
        Self::Records(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_equality_ignores_key_order() {
        let a = Record::from_pairs([("name", "Alice"), ("email", "a@example.com")]);
        let b = Record::from_pairs([("email", "a@example.com"), ("name", "Alice")]);
        assert_eq!(a, b);
        let keys: Vec<&String> = a.keys().collect();
        assert_eq!(keys, vec!["name", "email"]);
    }

    #[test]
    fn test_from_objects_rejects_scalars() {
        #[derive(Serialize)]
        struct User {
            id: u32,
            name: String,
        }

        let source = Source::from_objects(&[User {
            id: 1,
            name: "Alice".to_string(),
        }])
        .unwrap();
        match source {
            Source::Records(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].get("id"), Some(&json!(1)));
            }
            other => panic!("unexpected source {:?}", other),
        }

        assert!(Source::from_objects(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&Value::Null), "");
        assert_eq!(value_to_text(&json!("x")), "x");
        assert_eq!(value_to_text(&json!(2.5)), "2.5");
        assert_eq!(value_to_text(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
