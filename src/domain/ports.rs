use crate::domain::model::{Record, Source};
use crate::utils::error::Result;
use std::io::{Cursor, Read};

/// Byte-level access to a location string.
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Appends to an existing file, creating it when missing.
    fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut existing = match self.read_file(path) {
            Ok(bytes) => bytes,
            Err(crate::utils::error::EtlError::IoError(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        existing.extend_from_slice(data);
        self.write_file(path, &existing)
    }

    /// Opens a reader for streaming decoders. The default buffers the whole file.
    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read_file(path)?)))
    }
}

/// A persistent record store addressed by table name.
pub trait RecordStore: Send + Sync {
    fn scan(&self, table: &str) -> Result<Vec<Record>>;

    fn insert(&self, table: &str, records: &[Record]) -> Result<()>;
}

/// A lazy, single-pass record sequence.
pub struct RecordStream {
    inner: Box<dyn Iterator<Item = Result<Record>> + Send>,
    total: Option<u64>,
}

impl RecordStream {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Record>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
            total: None,
        }
    }

    /// A stream over an already materialized collection; its total is known.
    pub fn counted(records: Vec<Record>) -> Self {
        let total = records.len() as u64;
        Self {
            inner: Box::new(records.into_iter().map(Ok)),
            total: Some(total),
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

pub trait Importer: Send + Sync {
    /// Opens the source. Decoding errors may surface here or from the stream.
    fn import(&self, source: &Source) -> Result<RecordStream>;
}

/// Receives the chunks of one export, in order.
pub trait ChunkWriter {
    /// Durably writes one chunk; earlier chunks stay written if a later one fails.
    fn write_chunk(&mut self, records: &[Record]) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

pub trait Exporter: Send + Sync {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>>;

    fn export(&self, records: Vec<Record>, destination: &str) -> Result<()> {
        let mut writer = self.open(destination)?;
        writer.write_chunk(&records)?;
        writer.finish()
    }
}
