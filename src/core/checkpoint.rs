use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Durable cursors keyed by a caller-supplied name. A cursor is the number of
/// leading source units already processed.
pub trait CheckpointStore: Send + Sync {
    /// 0 when the cursor is absent or unreadable.
    fn read(&self, name: &str) -> u64;

    fn write(&self, name: &str, index: u64) -> Result<()>;

    fn clear(&self, name: &str) -> Result<()>;
}

/// One `<name>.checkpoint` file per cursor holding the decimal value.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint", sanitize(name)))
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self, name: &str) -> u64 {
        fs::read_to_string(self.path_for(name))
            .ok()
            .and_then(|content| content.trim().parse().ok())
            .unwrap_or(0)
    }

    fn write(&self, name: &str, index: u64) -> Result<()> {
        let unwritable = |e: std::io::Error| EtlError::CheckpointUnwritable {
            name: name.to_string(),
            message: e.to_string(),
        };
        fs::create_dir_all(&self.dir).map_err(unwritable)?;

        let path = self.path_for(name);
        let tmp = path.with_extension("checkpoint.tmp");
        fs::write(&tmp, index.to_string()).map_err(unwritable)?;
        fs::rename(&tmp, &path).map_err(unwritable)
    }

    fn clear(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EtlError::CheckpointUnwritable {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    cursors: RwLock<HashMap<String, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self, name: &str) -> u64 {
        let cursors = self.cursors.read().unwrap_or_else(PoisonError::into_inner);
        cursors.get(name).copied().unwrap_or(0)
    }

    fn write(&self, name: &str, index: u64) -> Result<()> {
        let mut cursors = self.cursors.write().unwrap_or_else(PoisonError::into_inner);
        cursors.insert(name.to_string(), index);
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let mut cursors = self.cursors.write().unwrap_or_else(PoisonError::into_inner);
        cursors.remove(name);
        Ok(())
    }
}
