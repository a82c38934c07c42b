//! In-memory storage backend.
//!
//! Files live in a shared map. An output publishes its bytes when it is
//! flushed, closed or dropped; inputs see the snapshot that was current when
//! they were opened.

use std::io::Write;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TermStoreError};
use crate::storage::{SliceInput, Storage, StorageInput, StorageOutput};

type FileMap = Arc<RwLock<AHashMap<String, Arc<Vec<u8>>>>>;

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    /// Initial buffer capacity for new outputs, in bytes.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 4096,
        }
    }
}

/// Storage keeping every file in memory.
///
/// # Example
///
/// ```
/// use std::io::Write;
/// use termstore::storage::Storage;
/// use termstore::storage::memory::{MemoryStorage, MemoryStorageConfig};
///
/// let storage = MemoryStorage::new(MemoryStorageConfig::default());
/// let mut out = storage.create_output("a.bin").unwrap();
/// out.write_all(b"hello").unwrap();
/// out.close().unwrap();
/// assert_eq!(storage.file_size("a.bin").unwrap(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    config: MemoryStorageConfig,
    files: FileMap,
}

impl MemoryStorage {
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            config,
            files: Arc::new(RwLock::new(AHashMap::new())),
        }
    }

    /// Raw contents of a file, for inspection.
    pub fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(name)
            .map(|data| data.as_ref().clone())
            .ok_or_else(|| TermStoreError::not_found(name))
    }

    /// Overwrite a file's contents directly.
    pub fn write_all(&self, name: &str, data: Vec<u8>) {
        self.files.write().insert(name.to_string(), Arc::new(data));
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let data = self
            .files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TermStoreError::not_found(name))?;
        Ok(Box::new(SliceInput::new(name, data)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.files
            .write()
            .insert(name.to_string(), Arc::new(Vec::new()));
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::with_capacity(self.config.initial_capacity),
            files: Arc::clone(&self.files),
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match self.files.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(TermStoreError::not_found(name)),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| TermStoreError::not_found(name))
    }
}

#[derive(Debug)]
struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn publish(&self) {
        let mut files = self.files.write();
        // A deleted file stays deleted.
        if let Some(entry) = files.get_mut(&self.name) {
            *entry = Arc::new(self.buffer.clone());
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other(format!(
                "output {} is closed",
                self.name
            )));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.publish();
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        if !self.closed {
            self.publish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_write_then_read() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        let mut out = storage.create_output("seg.tvx").unwrap();
        out.write_all(b"abc").unwrap();
        assert_eq!(out.position(), 3);
        out.close().unwrap();
        out.close().unwrap();

        let mut input = storage.open_input("seg.tvx").unwrap();
        assert_eq!(input.size().unwrap(), 3);
        let mut buf = String::new();
        input.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "abc");
    }

    #[test]
    fn test_delete_and_list() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        storage.create_output("b").unwrap().close().unwrap();
        storage.create_output("a").unwrap().close().unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["a", "b"]);

        storage.delete_file("a").unwrap();
        assert!(!storage.file_exists("a"));
        assert!(storage.delete_file("a").is_err());
        assert!(storage.open_input("a").is_err());
    }

    #[test]
    fn test_output_published_on_drop() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        {
            let mut out = storage.create_output("x").unwrap();
            out.write_all(b"12345").unwrap();
        }
        assert_eq!(storage.file_size("x").unwrap(), 5);
    }
}
