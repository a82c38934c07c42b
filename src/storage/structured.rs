//! Structured binary readers and writers over storage streams.
//!
//! Fixed-width integers are big-endian. `vint`/`vlong` are the
//! variable-length encodings from [`crate::util::varint`].

use std::io::{Read, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, TermStoreError};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// Writes structured values to a [`StorageOutput`].
#[derive(Debug)]
pub struct StructWriter<W: StorageOutput> {
    writer: W,
}

impl<W: StorageOutput> StructWriter<W> {
    pub fn new(writer: W) -> Self {
        StructWriter { writer }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_vint(&mut self, value: u32) -> Result<()> {
        varint::write_u64(&mut self.writer, value as u64)?;
        Ok(())
    }

    pub fn write_vlong(&mut self, value: u64) -> Result<()> {
        varint::write_u64(&mut self.writer, value)?;
        Ok(())
    }

    /// Write raw bytes with no length prefix.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Write a vint length followed by the UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|_| {
            TermStoreError::invalid_argument(format!("string of {} bytes is too long", value.len()))
        })?;
        self.write_vint(len)?;
        self.write_all(value.as_bytes())
    }

    /// Copy `num_bytes` from the reader's current position.
    pub fn copy_bytes<R: StorageInput>(
        &mut self,
        input: &mut StructReader<R>,
        num_bytes: u64,
    ) -> Result<()> {
        let copied = std::io::copy(&mut input.reader.by_ref().take(num_bytes), &mut self.writer)?;
        if copied != num_bytes {
            return Err(TermStoreError::corruption(format!(
                "copy_bytes: wanted {num_bytes} bytes but input ended after {copied}"
            )));
        }
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn file_pointer(&self) -> u64 {
        self.writer.position()
    }

    pub fn flush_and_sync(&mut self) -> Result<()> {
        self.writer.flush_and_sync()
    }

    pub fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}

/// Reads structured values from a [`StorageInput`].
#[derive(Debug)]
pub struct StructReader<R: StorageInput> {
    reader: R,
    size: u64,
}

impl<R: StorageInput> StructReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let size = reader.size()?;
        Ok(StructReader { reader, size })
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.reader.read_u8()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.reader.read_u32::<BigEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.reader.read_u64::<BigEndian>()?)
    }

    pub fn read_vint(&mut self) -> Result<u32> {
        varint::read_u32(&mut self.reader)
    }

    pub fn read_vlong(&mut self) -> Result<u64> {
        varint::read_u64(&mut self.reader)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        Ok(())
    }

    /// Read a vint-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_vint()? as u64;
        if len > self.size {
            return Err(TermStoreError::corruption(format!(
                "string length {len} exceeds input size {}",
                self.size
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| TermStoreError::corruption(format!("invalid UTF-8 string: {e}")))
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn file_pointer(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()?)
    }

    /// Total length of the underlying input.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_eof(&mut self) -> bool {
        self.file_pointer().map_or(true, |pos| pos >= self.size)
    }

    /// Independent reader over the same bytes, at the same position.
    pub fn try_clone(&self) -> Result<StructReader<Box<dyn StorageInput>>> {
        Ok(StructReader {
            reader: self.reader.clone_input()?,
            size: self.size,
        })
    }

    pub fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}
