//! Variable-length integer encoding utilities.
//!
//! Seven payload bits per byte, least significant group first, with the high
//! bit set on every byte except the last. A `u32` takes at most 5 bytes and a
//! `u64` at most 10.

use std::io::{Read, Write};

use crate::error::{Result, TermStoreError};

/// Maximum encoded length of a `u32`.
pub const MAX_VINT_LEN: usize = 5;

/// Maximum encoded length of a `u64`.
pub const MAX_VLONG_LEN: usize = 10;

/// Encode `value` into `buf`, returning the number of bytes used.
pub fn encode_u64(value: u64, buf: &mut [u8; MAX_VLONG_LEN]) -> usize {
    let mut val = value;
    let mut len = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf[len] = byte;
        len += 1;

        if val == 0 {
            return len;
        }
    }
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Write `value` as a variable-length integer, returning the bytes written.
pub fn write_u64<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<usize> {
    let mut buf = [0u8; MAX_VLONG_LEN];
    let len = encode_u64(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Read a variable-length `u64`.
pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    read_bounded(reader, MAX_VLONG_LEN, 64).map(|(value, _)| value)
}

/// Read a variable-length `u32`; values wider than 32 bits are rejected.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let (value, _) = read_bounded(reader, MAX_VINT_LEN, 32)?;
    Ok(value as u32)
}

fn read_bounded<R: Read + ?Sized>(
    reader: &mut R,
    max_len: usize,
    bits: u32,
) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;
    let mut byte = [0u8; 1];

    for bytes_read in 1..=max_len {
        reader.read_exact(&mut byte)?;
        let payload = (byte[0] & 0x7F) as u64;

        if shift + 7 > bits && (payload >> (bits - shift)) != 0 {
            return Err(TermStoreError::corruption(format!(
                "VarInt overflow: value does not fit in {bits} bits"
            )));
        }

        result |= payload << shift;

        if (byte[0] & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(TermStoreError::corruption(format!(
        "VarInt longer than {max_len} bytes"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let mut out = Vec::new();
            let written = write_u64(&mut out, value).unwrap();
            assert_eq!(written, out.len());
            assert_eq!(written, encoded_len(value));

            let decoded = read_u64(&mut Cursor::new(&out)).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(127), 1);
        assert_eq!(encoded_len(128), 2);
        assert_eq!(encoded_len(u32::MAX as u64), MAX_VINT_LEN);
        assert_eq!(encoded_len(u64::MAX), MAX_VLONG_LEN);
    }

    #[test]
    fn test_u32_accepts_full_range() {
        let mut out = Vec::new();
        write_u64(&mut out, u32::MAX as u64).unwrap();
        assert_eq!(read_u32(&mut Cursor::new(&out)).unwrap(), u32::MAX);
    }

    #[test]
    fn test_u32_rejects_wide_value() {
        let mut out = Vec::new();
        write_u64(&mut out, u32::MAX as u64 + 1).unwrap();
        assert!(read_u32(&mut Cursor::new(&out)).is_err());
    }

    #[test]
    fn test_incomplete_varint() {
        // Continuation bit set but no more data
        let incomplete = vec![0x80];
        assert!(read_u64(&mut Cursor::new(&incomplete)).is_err());
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 20];
        assert!(read_u64(&mut Cursor::new(&overflow_data)).is_err());
    }
}
