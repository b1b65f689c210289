//! Durable blob storage collaborator.
//!
//! The store persists three named blobs (`users.json`, `tables.json`,
//! `config.json`). Anything that can load, save, and timestamp a named
//! blob can back it; the filesystem implementation is the production
//! one, the in-memory implementation backs tests and embedding.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

pub trait BlobStorage: Send + Sync + 'static {
    /// Load a named blob; `None` when it does not exist yet.
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Durably save a named blob.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Last modification time of a named blob, if it exists.
    fn modified(&self, name: &str) -> Option<SystemTime>;
}

/// Filesystem-backed blob storage under a data directory.
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl BlobStorage for FsStorage {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn modified(&self, name: &str) -> Option<SystemTime> {
        std::fs::metadata(self.path(name)).and_then(|m| m.modified()).ok()
    }
}

/// In-memory blob storage for tests and embedded use.
#[derive(Default)]
pub struct MemStorage {
    blobs: Mutex<HashMap<String, (Vec<u8>, SystemTime)>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStorage for MemStorage {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(name).map(|(bytes, _)| bytes.clone()))
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .insert(name.to_string(), (bytes.to_vec(), SystemTime::now()));
        Ok(())
    }

    fn modified(&self, name: &str) -> Option<SystemTime> {
        self.blobs.lock().get(name).map(|(_, mtime)| *mtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fs_storage_round_trips() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path()).unwrap();

        assert!(storage.load("users.json").unwrap().is_none());
        assert!(storage.modified("users.json").is_none());

        storage.save("users.json", b"{}").unwrap();
        assert_eq!(storage.load("users.json").unwrap().unwrap(), b"{}");
        assert!(storage.modified("users.json").is_some());
    }

    #[test]
    fn mem_storage_round_trips() {
        let storage = MemStorage::new();
        storage.save("config.json", b"{}").unwrap();
        assert_eq!(storage.load("config.json").unwrap().unwrap(), b"{}");
        assert!(storage.load("missing").unwrap().is_none());
    }
}
