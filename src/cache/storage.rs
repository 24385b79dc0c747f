//! Durable key-value storage backing the cache mirror.
//!
//! The store writes one string blob per storage key. Implementations must be
//! cheap to call synchronously; every failure is reported as a
//! [`PersistenceError`] and the store keeps working from memory.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use thiserror::Error;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::storage";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize cache snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("durable storage unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous blob storage scoped to one origin.
pub trait DurableStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn save(&self, key: &str, blob: &str) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Stores each blob as `<directory>/<key>.json`, replacing it atomically.
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Create the storage, making sure the directory exists.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{file_name}.json"))
    }
}

impl DurableStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), PersistenceError> {
        let mut file = NamedTempFile::new_in(&self.directory)?;
        file.write_all(blob.as_bytes())?;
        file.flush()?;
        file.persist(self.path_for(key))
            .map_err(|err| PersistenceError::Io(err.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local storage. Survives store reconstruction, not process restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw blob currently held for `key`.
    pub fn blob(&self, key: &str) -> Option<String> {
        mutex_lock(&self.blobs, SOURCE, "blob").get(key).cloned()
    }
}

impl DurableStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.blob(key))
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), PersistenceError> {
        mutex_lock(&self.blobs, SOURCE, "save").insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        mutex_lock(&self.blobs, SOURCE, "remove").remove(key);
        Ok(())
    }
}
