use crate::adapters::storage::StorageRouter;
use crate::domain::model::{value_to_text, Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Header row plus string-valued rows. Reads stream row by row.
pub struct CsvAdapter {
    storage: Arc<StorageRouter>,
}

impl CsvAdapter {
    pub fn new(storage: Arc<StorageRouter>) -> Self {
        Self { storage }
    }
}

impl Importer for CsvAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        let location = source.as_location().ok_or_else(|| {
            EtlError::source_unreadable(&source.describe(), "csv import needs a file location")
        })?;
        let reader = self
            .storage
            .open_read(location)
            .map_err(|e| EtlError::source_unreadable(location, e))?;

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let headers = csv_reader
            .headers()
            .map_err(|e| EtlError::malformed(location, e))?
            .clone();

        let location = location.to_string();
        let rows = csv_reader.into_records().map(move |row| {
            let row = row.map_err(|e| EtlError::malformed(&location, e))?;
            let data: Map<String, Value> = headers
                .iter()
                .zip(row.iter())
                .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
                .collect();
            Ok(Record { data })
        });

        Ok(RecordStream::new(rows))
    }
}

impl Exporter for CsvAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(CsvWriter {
            storage: &self.storage,
            destination: destination.to_string(),
            columns: None,
        }))
    }
}

struct CsvWriter<'a> {
    storage: &'a StorageRouter,
    destination: String,
    columns: Option<Vec<String>>,
}

impl CsvWriter<'_> {
    fn encode(&self, columns: &[String], records: &[Record], header: bool) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if header {
            writer
                .write_record(columns)
                .map_err(|e| EtlError::unwritable(&self.destination, e))?;
        }
        for record in records {
            let row: Vec<String> = columns
                .iter()
                .map(|column| record.get(column).map(value_to_text).unwrap_or_default())
                .collect();
            writer
                .write_record(&row)
                .map_err(|e| EtlError::unwritable(&self.destination, e))?;
        }
        writer
            .into_inner()
            .map_err(|e| EtlError::unwritable(&self.destination, e))
    }
}

impl ChunkWriter for CsvWriter<'_> {
    fn write_chunk(&mut self, records: &[Record]) -> Result<()> {
        match &self.columns {
            Some(columns) => {
                let bytes = self.encode(columns, records, false)?;
                self.storage
                    .append(&self.destination, &bytes)
                    .map_err(|e| EtlError::unwritable(&self.destination, e))
            }
            None => {
                let Some(first) = records.first() else {
                    return Ok(());
                };
                let columns: Vec<String> = first.keys().cloned().collect();
                let bytes = self.encode(&columns, records, true)?;
                self.storage
                    .write(&self.destination, &bytes)
                    .map_err(|e| EtlError::unwritable(&self.destination, e))?;
                self.columns = Some(columns);
                Ok(())
            }
        }
    }

    fn finish(self: Box<Self>) -> Result<()> {
        if self.columns.is_none() {
            self.storage
                .write(&self.destination, b"")
                .map_err(|e| EtlError::unwritable(&self.destination, e))?;
        }
        Ok(())
    }
}
