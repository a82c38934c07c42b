//! Codec file headers.
//!
//! Every codec file starts with:
//!
//! ```text
//! [u32: CODEC_MAGIC][vint: name length][name bytes][u32: version]
//! ```
//!
//! Readers check all three parts before trusting anything that follows.

use crate::error::{Result, TermStoreError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// Magic number at the start of every codec file.
pub const CODEC_MAGIC: u32 = 0x3fd7_6c17;

/// Write a codec header.
pub fn write_header<W: StorageOutput>(
    out: &mut StructWriter<W>,
    codec: &str,
    version: u32,
) -> Result<()> {
    if codec.is_empty() || codec.len() >= 128 || !codec.is_ascii() {
        return Err(TermStoreError::invalid_argument(format!(
            "codec name must be 1..128 ASCII bytes: {codec:?}"
        )));
    }
    out.write_u32(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_u32(version)?;
    Ok(())
}

/// Length in bytes of the header [`write_header`] writes for `codec`.
pub fn header_length(codec: &str) -> u64 {
    (4 + varint::encoded_len(codec.len() as u64) + codec.len() + 4) as u64
}

/// Read and validate a codec header, returning its version.
pub fn check_header<R: StorageInput>(
    input: &mut StructReader<R>,
    codec: &str,
    min_version: u32,
    max_version: u32,
) -> Result<u32> {
    let magic = input.read_u32()?;
    if magic != CODEC_MAGIC {
        return Err(TermStoreError::format(format!(
            "codec header mismatch: actual header={magic:#x} vs expected header={CODEC_MAGIC:#x}"
        )));
    }

    let actual = input.read_string()?;
    if actual != codec {
        return Err(TermStoreError::format(format!(
            "codec mismatch: actual codec={actual} vs expected codec={codec}"
        )));
    }

    let version = input.read_u32()?;
    if version < min_version || version > max_version {
        return Err(TermStoreError::format(format!(
            "unsupported {codec} version {version} (supported: {min_version}..={max_version})"
        )));
    }

    Ok(version)
}
