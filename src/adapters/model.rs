use crate::domain::model::{Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStore, RecordStream};
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// In-process table store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Vec<Record>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).cloned().unwrap_or_default()
    }
}

impl RecordStore for MemoryStore {
    fn scan(&self, table: &str) -> Result<Vec<Record>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| EtlError::source_unreadable(table, "no such table"))
    }

    fn insert(&self, table: &str, records: &[Record]) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }
}

/// Reads whole tables and appends exported chunks to a table, both by name.
pub struct ModelAdapter {
    store: Arc<dyn RecordStore>,
}

impl ModelAdapter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

impl Importer for ModelAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        let table = source.as_location().ok_or_else(|| {
            EtlError::source_unreadable(&source.describe(), "model import needs a table name")
        })?;
        let rows = self
            .store
            .scan(table)
            .map_err(|e| EtlError::source_unreadable(table, e))?;
        Ok(RecordStream::counted(rows))
    }
}

impl Exporter for ModelAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(TableWriter {
            store: self.store.as_ref(),
            table: destination.to_string(),
        }))
    }
}

struct TableWriter<'a> {
    store: &'a dyn RecordStore,
    table: String,
}

impl ChunkWriter for TableWriter<'_> {
    fn write_chunk(&mut self, records: &[Record]) -> Result<()> {
        self.store
            .insert(&self.table, records)
            .map_err(|e| EtlError::unwritable(&self.table, e))
    }
}
