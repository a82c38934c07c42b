//! File-system storage backend.
//!
//! Inputs are memory-mapped by default, so opening a segment costs no reads
//! and every clone of an input shares the same mapping.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TermStoreError};
use crate::storage::{SharedBytes, SliceInput, Storage, StorageInput, StorageOutput};

/// Configuration for [`FileStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding the files.
    pub path: PathBuf,

    /// Memory-map inputs instead of reading them into memory.
    pub use_mmap: bool,

    /// fsync outputs when they are closed.
    pub sync_on_close: bool,

    /// Write buffer size for outputs, in bytes.
    pub buffer_size: usize,
}

impl FileStorageConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            use_mmap: true,
            sync_on_close: false,
            buffer_size: 64 * 1024,
        }
    }
}

/// Storage over a directory.
#[derive(Debug)]
pub struct FileStorage {
    config: FileStorageConfig,
}

impl FileStorage {
    pub fn new(config: FileStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Ok(FileStorage { config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.path.join(name)
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.file_path(name);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TermStoreError::not_found(name));
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        // Zero-length files cannot be mapped on every platform.
        let data: SharedBytes = if self.config.use_mmap && len > 0 {
            // SAFETY: segment files are write-once; nothing truncates or
            // rewrites a file while readers hold it open.
            let mmap = unsafe { Mmap::map(&file)? };
            Arc::new(mmap) as SharedBytes
        } else {
            let mut buf = Vec::with_capacity(len as usize);
            file.read_to_end(&mut buf)?;
            Arc::new(buf) as SharedBytes
        };

        Ok(Box::new(SliceInput::new(name, data)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.file_path(name))?;
        Ok(Box::new(FileOutput {
            name: name.to_string(),
            writer: Some(BufWriter::with_capacity(self.config.buffer_size, file)),
            position: 0,
            sync_on_close: self.config.sync_on_close,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TermStoreError::not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        match fs::metadata(self.file_path(name)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TermStoreError::not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug)]
struct FileOutput {
    name: String,
    writer: Option<BufWriter<File>>,
    position: u64,
    sync_on_close: bool,
}

impl FileOutput {
    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(std::io::Error::other(format!(
                "output {} is closed",
                self.name
            ))),
        }
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer()?.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer()?.flush()
    }
}

impl StorageOutput for FileOutput {
    fn position(&self) -> u64 {
        self.position
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            if self.sync_on_close {
                writer.get_ref().sync_all()?;
            }
        }
        Ok(())
    }
}
