//! Storage abstraction for segment files.
//!
//! Codecs never touch the file system directly. They ask a [`Storage`] for
//! named inputs and outputs and wrap those in the structured readers and
//! writers from [`structured`].
//!
//! Inputs are random-access and cheap to clone: every clone shares the
//! underlying bytes and owns its own cursor, which is what lets a reader hand
//! independent cursors to concurrent callers. Outputs are append-only.

use std::fmt::Debug;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TermStoreError};

pub mod file;
pub mod memory;
pub mod structured;

use file::{FileStorage, FileStorageConfig};
use memory::{MemoryStorage, MemoryStorageConfig};

/// A named, random-access input.
pub trait StorageInput: Read + Seek + Send + Sync + Debug {
    /// Total length of the input in bytes.
    fn size(&self) -> Result<u64>;

    /// Create an independent cursor over the same bytes, positioned where
    /// this one currently is.
    fn clone_input(&self) -> Result<Box<dyn StorageInput>>;

    /// Release the input. Further reads fail.
    fn close(&mut self) -> Result<()>;
}

/// A named, append-only output.
pub trait StorageOutput: Write + Send + Debug {
    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Flush buffered bytes and make them durable.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Flush and release the output. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        (**self).clone_input()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        (**self).flush_and_sync()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// A flat namespace of files.
pub trait Storage: Send + Sync + Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check whether a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all file names, sorted.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Length of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    /// Files in a directory on disk.
    File(FileStorageConfig),
    /// Files held in process memory.
    Memory(MemoryStorageConfig),
}

/// Creates storage backends from configuration.
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::File(config) => Ok(Arc::new(FileStorage::new(config)?)),
            StorageConfig::Memory(config) => Ok(Arc::new(MemoryStorage::new(config))),
        }
    }
}

/// Shared, immutable file contents.
pub(crate) type SharedBytes = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// Input over shared bytes with a private cursor.
///
/// Both backends hand these out: the file backend over a memory map (or a
/// fully read buffer), the memory backend over a published snapshot.
pub(crate) struct SliceInput {
    name: String,
    data: Option<SharedBytes>,
    pos: u64,
}

impl SliceInput {
    pub(crate) fn new(name: &str, data: SharedBytes) -> Self {
        SliceInput {
            name: name.to_string(),
            data: Some(data),
            pos: 0,
        }
    }

    fn data_slice(&self) -> std::io::Result<&[u8]> {
        match &self.data {
            Some(data) => Ok((**data).as_ref()),
            None => Err(std::io::Error::other(format!(
                "input {} is closed",
                self.name
            ))),
        }
    }
}

impl Debug for SliceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceInput")
            .field("name", &self.name)
            .field("pos", &self.pos)
            .field("closed", &self.data.is_none())
            .finish()
    }
}

impl Read for SliceInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = self.pos;
        let bytes = self.data_slice()?;
        let start = usize::try_from(pos).unwrap_or(usize::MAX).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SliceInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.data_slice()?.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => len + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("seek before start of {}", self.name),
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl StorageInput for SliceInput {
    fn size(&self) -> Result<u64> {
        Ok(self.data_slice()?.len() as u64)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        match &self.data {
            Some(data) => Ok(Box::new(SliceInput {
                name: self.name.clone(),
                data: Some(Arc::clone(data)),
                pos: self.pos,
            })),
            None => Err(TermStoreError::storage(format!(
                "cannot clone closed input {}",
                self.name
            ))),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}
