use crate::domain::ports::Storage;
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new(".".to_string())
    }
}

impl Storage for LocalStorage {
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.full_path(path))?;
        Ok(data)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(full_path, data)?;
        Ok(())
    }

    fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(full_path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(self.full_path(path))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

/// In-process byte storage, mounted under the `mem` scheme by default.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files.get(path).cloned()
    }
}

impl Storage for MemoryStorage {
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files.get(path).cloned().ok_or_else(|| {
            EtlError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path),
            ))
        })
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }
}

/// Splits `scheme://path` locations; plain paths have no scheme.
pub fn split_location(location: &str) -> (Option<&str>, &str) {
    match location.split_once("://") {
        Some((scheme, path))
            if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (Some(scheme), path)
        }
        _ => (None, location),
    }
}

/// Dispatches locations to the storage registered for their scheme, or to local files.
pub struct StorageRouter {
    local: Arc<dyn Storage>,
    schemes: RwLock<HashMap<String, Arc<dyn Storage>>>,
}

impl StorageRouter {
    pub fn new(local: Arc<dyn Storage>) -> Self {
        Self {
            local,
            schemes: RwLock::new(HashMap::new()),
        }
    }

    /// Local files relative to the working directory plus an empty `mem://` bucket.
    pub fn with_defaults() -> Self {
        let router = Self::new(Arc::new(LocalStorage::default()));
        router.mount("mem", Arc::new(MemoryStorage::new()));
        router
    }

    pub fn mount(&self, scheme: &str, storage: Arc<dyn Storage>) {
        let mut schemes = self.schemes.write().unwrap_or_else(PoisonError::into_inner);
        schemes.insert(scheme.to_ascii_lowercase(), storage);
    }

    pub fn resolve<'a>(&self, location: &'a str) -> Result<(Arc<dyn Storage>, &'a str)> {
        match split_location(location) {
            (None, path) => Ok((Arc::clone(&self.local), path)),
            (Some(scheme), path) => {
                let schemes = self.schemes.read().unwrap_or_else(PoisonError::into_inner);
                schemes
                    .get(&scheme.to_ascii_lowercase())
                    .map(|storage| (Arc::clone(storage), path))
                    .ok_or_else(|| EtlError::ConfigError {
                        message: format!("no storage mounted for scheme '{}'", scheme),
                    })
            }
        }
    }

    pub fn read(&self, location: &str) -> Result<Vec<u8>> {
        let (storage, path) = self.resolve(location)?;
        storage.read_file(path)
    }

    pub fn open_read(&self, location: &str) -> Result<Box<dyn Read + Send>> {
        let (storage, path) = self.resolve(location)?;
        storage.open_read(path)
    }

    pub fn write(&self, location: &str, data: &[u8]) -> Result<()> {
        let (storage, path) = self.resolve(location)?;
        storage.write_file(path, data)
    }

    pub fn append(&self, location: &str, data: &[u8]) -> Result<()> {
        let (storage, path) = self.resolve(location)?;
        storage.append_file(path, data)
    }
}

impl Default for StorageRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
