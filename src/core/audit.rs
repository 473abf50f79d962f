use crate::core::access::Action;
use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub chunk_size: usize,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub action: Action,
    pub metadata: AuditMetadata,
}

impl AuditEntry {
    pub fn new(actor: Option<String>, action: Action, metadata: AuditMetadata) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            actor,
            action,
            metadata,
        }
    }
}

/// Append-only destination for run records.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// One JSON object per line.
pub struct JsonLinesAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

impl AuditSink for JsonLinesAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EtlError::unwritable(&self.path.display().to_string(), e))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Keeps entries in memory; handy for embedding and tests.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    fn import_metadata(status: RunStatus) -> AuditMetadata {
        AuditMetadata {
            type_tag: "csv".to_string(),
            source: Some("users.csv".to_string()),
            target: None,
            chunk_size: 100,
            status,
            error_count: Some(2),
            checkpoint: None,
        }
    }

    #[test]
    fn test_entry_wire_shape() {
        let entry = AuditEntry::new(
            Some("ops".to_string()),
            Action::Import,
            import_metadata(RunStatus::Success),
        );
        let value: Value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["action"], "import");
        assert_eq!(value["actor"], "ops");
        assert_eq!(value["metadata"]["type"], "csv");
        assert_eq!(value["metadata"]["chunkSize"], 100);
        assert_eq!(value["metadata"]["status"], "success");
        assert_eq!(value["metadata"]["errorCount"], 2);
        assert!(value["metadata"].get("target").is_none());
        assert!(value["metadata"].get("checkpoint").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.timestamp).is_ok());
    }

    #[test]
    fn test_json_lines_append() {
        let dir = tempdir().unwrap();
        let log = JsonLinesAuditLog::new(dir.path().join("audit/relay.jsonl")).unwrap();

        log.append(&AuditEntry::new(None, Action::Import, import_metadata(RunStatus::Success)))
            .unwrap();
        log.append(&AuditEntry::new(None, Action::Import, import_metadata(RunStatus::Error)))
            .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("\"actor\""));

        let entries = log.read_entries().unwrap();
        assert_eq!(entries[1].metadata.status, RunStatus::Error);
    }
}
