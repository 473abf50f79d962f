use crate::adapters::storage::StorageRouter;
use crate::domain::model::{kind_of, Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use serde_json::Value;
use std::sync::Arc;

/// A top-level array of objects. A single top-level object is read as one record.
pub struct JsonAdapter {
    storage: Arc<StorageRouter>,
}

impl JsonAdapter {
    pub fn new(storage: Arc<StorageRouter>) -> Self {
        Self { storage }
    }
}

pub(crate) fn records_from_json(location: &str, value: Value) -> Result<Vec<Record>> {
    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(EtlError::malformed(
                location,
                format!("expected an array of objects, found {}", kind_of(&other)),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(data) => Ok(Record { data }),
            other => Err(EtlError::malformed(
                location,
                format!("item {} is a {}, not an object", i, kind_of(&other)),
            )),
        })
        .collect()
}

impl Importer for JsonAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        let location = source.as_location().ok_or_else(|| {
            EtlError::source_unreadable(&source.describe(), "json import needs a file location")
        })?;
        let bytes = self
            .storage
            .read(location)
            .map_err(|e| EtlError::source_unreadable(location, e))?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| EtlError::malformed(location, e))?;

        Ok(RecordStream::counted(records_from_json(location, value)?))
    }
}

impl Exporter for JsonAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(DocumentWriter::new(
            &self.storage,
            destination,
            |records: &[Record]| Ok(serde_json::to_vec_pretty(records)?),
        )))
    }
}

/// Writer for whole-document formats: every chunk rewrites the document with all
/// records received so far, so the destination is always complete.
pub(crate) struct DocumentWriter<'a, F> {
    storage: &'a StorageRouter,
    destination: String,
    records: Vec<Record>,
    written: bool,
    encode: F,
}

impl<'a, F> DocumentWriter<'a, F>
where
    F: Fn(&[Record]) -> Result<Vec<u8>>,
{
    pub(crate) fn new(storage: &'a StorageRouter, destination: &str, encode: F) -> Self {
        Self {
            storage,
            destination: destination.to_string(),
            records: Vec::new(),
            written: false,
            encode,
        }
    }

    fn flush(&mut self) -> Result<()> {
        let bytes = (self.encode)(&self.records)
            .map_err(|e| EtlError::unwritable(&self.destination, e))?;
        self.storage
            .write(&self.destination, &bytes)
            .map_err(|e| EtlError::unwritable(&self.destination, e))?;
        self.written = true;
        Ok(())
    }
}

impl<F> ChunkWriter for DocumentWriter<'_, F>
where
    F: Fn(&[Record]) -> Result<Vec<u8>>,
{
    fn write_chunk(&mut self, records: &[Record]) -> Result<()> {
        self.records.extend_from_slice(records);
        self.flush()
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        if !self.written {
            self.flush()?;
        }
        Ok(())
    }
}
