//! Little-endian byte codec (C1).
//!
//! Mirrors `byte_stream_copy_to_uint32_little_endian` /
//! `byte_stream_copy_from_uint32_little_endian` from `libewf_chunk_group.c`:
//! bounds-checked 32/64-bit little-endian reads and writes over untrusted
//! buffers. No other endianness is needed by this format.

use super::error::{ChunkGroupError, Result};

/// Reads a little-endian `u32` at `offset` in `buf`.
pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .ok_or(ChunkGroupError::Overflow { what: "read_u32_le offset" })?;
    let slice = buf.get(offset..end).ok_or(ChunkGroupError::Truncated {
        offset,
        needed: 4,
        available: buf.len().saturating_sub(offset),
    })?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

/// Reads a little-endian `u64` at `offset` in `buf`.
pub fn read_u64_le(buf: &[u8], offset: usize) -> Result<u64> {
    let end = offset
        .checked_add(8)
        .ok_or(ChunkGroupError::Overflow { what: "read_u64_le offset" })?;
    let slice = buf.get(offset..end).ok_or(ChunkGroupError::Truncated {
        offset,
        needed: 8,
        available: buf.len().saturating_sub(offset),
    })?;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

/// Writes a little-endian `u32` at `offset` in `buf`.
pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let end = offset
        .checked_add(4)
        .ok_or(ChunkGroupError::Overflow { what: "write_u32_le offset" })?;
    let slice = buf.get_mut(offset..end).ok_or(ChunkGroupError::Truncated {
        offset,
        needed: 4,
        available: buf.len().saturating_sub(offset),
    })?;
    slice.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Writes a little-endian `u64` at `offset` in `buf`.
pub fn write_u64_le(buf: &mut [u8], offset: usize, value: u64) -> Result<()> {
    let end = offset
        .checked_add(8)
        .ok_or(ChunkGroupError::Overflow { what: "write_u64_le offset" })?;
    let slice = buf.get_mut(offset..end).ok_or(ChunkGroupError::Truncated {
        offset,
        needed: 8,
        available: buf.len().saturating_sub(offset),
    })?;
    slice.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_round_trip() {
        let mut buf = [0u8; 16];
        write_u32_le(&mut buf, 0, 0xdead_beef).unwrap();
        write_u64_le(&mut buf, 4, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(read_u32_le(&buf, 0).unwrap(), 0xdead_beef);
        assert_eq!(read_u64_le(&buf, 4).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn read_u32_le_truncated() {
        let buf = [0u8; 3];
        assert!(matches!(
            read_u32_le(&buf, 0),
            Err(ChunkGroupError::Truncated { .. })
        ));
    }

    #[test]
    fn read_u64_le_truncated_at_tail() {
        let buf = [0u8; 10];
        assert!(matches!(
            read_u64_le(&buf, 4),
            Err(ChunkGroupError::Truncated { .. })
        ));
    }

    #[test]
    fn write_u32_le_truncated() {
        let mut buf = [0u8; 2];
        assert!(matches!(
            write_u32_le(&mut buf, 0, 1),
            Err(ChunkGroupError::Truncated { .. })
        ));
    }
}
