use crate::domain::model::{Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Named buckets that typed-object exports land in.
#[derive(Debug, Clone, Default)]
pub struct ObjectSink {
    buckets: Arc<RwLock<HashMap<String, Vec<Record>>>>,
}

impl ObjectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a bucket and deserializes its records into `T`.
    pub fn take<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let records = {
            let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
            buckets.remove(name).unwrap_or_default()
        };
        records
            .into_iter()
            .map(|record| Ok(serde_json::from_value(Value::Object(record.data))?))
            .collect()
    }

    pub fn len(&self, name: &str) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.get(name).map(Vec::len).unwrap_or(0)
    }

    fn push(&self, name: &str, records: &[Record]) {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        buckets
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(records);
    }
}

/// Imports in-memory collections and exports into an [`ObjectSink`].
pub struct ObjectAdapter {
    sink: ObjectSink,
}

impl ObjectAdapter {
    pub fn new(sink: ObjectSink) -> Self {
        Self { sink }
    }
}

impl Importer for ObjectAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        match source {
            Source::Records(records) => Ok(RecordStream::counted(records.clone())),
            Source::Location(location) => Err(EtlError::source_unreadable(
                location,
                "typed-object import needs an in-memory collection",
            )),
        }
    }
}

impl Exporter for ObjectAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(SinkWriter {
            sink: &self.sink,
            bucket: destination.to_string(),
        }))
    }
}

struct SinkWriter<'a> {
    sink: &'a ObjectSink,
    bucket: String,
}

impl ChunkWriter for SinkWriter<'_> {
    fn write_chunk(&mut self, records: &[Record]) -> Result<()> {
        self.sink.push(&self.bucket, records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    #[test]
    fn test_typed_roundtrip() {
        let users = vec![
            User {
                id: 1,
                name: "Alice".to_string(),
            },
            User {
                id: 2,
                name: "Bob".to_string(),
            },
        ];
        let sink = ObjectSink::new();
        let adapter = ObjectAdapter::new(sink.clone());

        let records: Vec<Record> = adapter
            .import(&Source::from_objects(&users).unwrap())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        adapter.export(records, "users").unwrap();

        assert_eq!(sink.len("users"), 2);
        let back: Vec<User> = sink.take("users").unwrap();
        assert_eq!(back, users);
        assert_eq!(sink.len("users"), 0);
    }

    #[test]
    fn test_location_source_is_rejected() {
        let adapter = ObjectAdapter::new(ObjectSink::new());
        assert!(adapter.import(&Source::location("users.json")).is_err());
    }
}
