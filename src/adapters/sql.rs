use crate::adapters::storage::{split_location, StorageRouter};
use crate::domain::model::{Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub const STATEMENT_FIELD: &str = "statement";

/// SQL scripts: one record per `;`-terminated statement.
pub struct SqlAdapter {
    storage: Arc<StorageRouter>,
}

impl SqlAdapter {
    pub fn new(storage: Arc<StorageRouter>) -> Self {
        Self { storage }
    }
}

/// Splits on `;` without parsing; semicolons inside string literals are not handled.
fn split_statements(script: &str) -> Vec<String> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(|statement| format!("{};", statement))
        .collect()
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        nested => format!("'{}'", nested.to_string().replace('\'', "''")),
    }
}

/// Plain identifiers stay bare; anything else is double-quoted.
fn quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn table_name(destination: &str) -> String {
    let (_, path) = split_location(destination);
    Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("records")
        .to_string()
}

/// A record's `statement` field, or an INSERT built from its fields.
fn render_statement(table: &str, record: &Record) -> String {
    if let Some(statement) = record.get_str(STATEMENT_FIELD) {
        return format!("{};", statement.trim().trim_end_matches(';').trim_end());
    }
    let columns: Vec<String> = record.keys().map(|key| quote_identifier(key)).collect();
    let values: Vec<String> = record.data.values().map(sql_literal).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_identifier(table),
        columns.join(", "),
        values.join(", ")
    )
}

impl Importer for SqlAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        let location = source.as_location().ok_or_else(|| {
            EtlError::source_unreadable(&source.describe(), "sql import needs a file location")
        })?;
        let bytes = self
            .storage
            .read(location)
            .map_err(|e| EtlError::source_unreadable(location, e))?;
        let script = String::from_utf8(bytes).map_err(|e| EtlError::malformed(location, e))?;

        let records = split_statements(&script)
            .into_iter()
            .map(|statement| Record::from_pairs([(STATEMENT_FIELD, statement)]))
            .collect();
        Ok(RecordStream::counted(records))
    }
}

impl Exporter for SqlAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(SqlWriter {
            storage: &self.storage,
            destination: destination.to_string(),
            table: table_name(destination),
            started: false,
        }))
    }
}

struct SqlWriter<'a> {
    storage: &'a StorageRouter,
    destination: String,
    table: String,
    started: bool,
}

impl ChunkWriter for SqlWriter<'_> {
    fn write_chunk(&mut self, records: &[Record]) -> Result<()> {
        let mut script = String::new();
        for record in records {
            script.push_str(&render_statement(&self.table, record));
            script.push('\n');
        }

        let written = if self.started {
            self.storage.append(&self.destination, script.as_bytes())
        } else {
            self.storage.write(&self.destination, script.as_bytes())
        };
        written.map_err(|e| EtlError::unwritable(&self.destination, e))?;
        self.started = true;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        if !self.started {
            self.storage
                .write(&self.destination, b"")
                .map_err(|e| EtlError::unwritable(&self.destination, e))?;
        }
        Ok(())
    }
}
