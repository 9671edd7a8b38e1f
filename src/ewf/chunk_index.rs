//! Chunk index (C3).
//!
//! An append-only, `Vec`-backed translation from storage-media offset to
//! `(pool-tag, file-offset, byte-size, flags)`. Grounded on the opaque
//! `libfdata_list_t` the original source threads through every chunk-group
//! function; here it is an owned struct instead of an FFI handle.

use super::error::{ChunkGroupError, Result};
use super::range_flags::RangeFlags;

/// Names where one chunk's compressed payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Identifies which segment file (or other pool member) holds the data.
    pub pool_tag: u32,
    /// Absolute offset within that pool member.
    pub file_offset: i64,
    /// Length of the compressed payload (or 8 for pattern-fill).
    pub byte_size: u64,
    pub flags: RangeFlags,
}

/// The logical media interval `[media_offset, media_offset + length)` a
/// descriptor decompresses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappedRange {
    pub media_offset: u64,
    pub length: u64,
}

/// Ordered sequence of [`ChunkDescriptor`] with a parallel [`MappedRange`]
/// per element. No deletion; `fill_v1`/`fill_v2` append, `reconcile_v1`
/// overwrites in place, `emit` reads.
#[derive(Debug, Clone, Default)]
pub struct ChunkIndex {
    descriptors: Vec<ChunkDescriptor>,
    ranges: Vec<MappedRange>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Appends a new descriptor and returns its index.
    pub fn append(
        &mut self,
        pool_tag: u32,
        file_offset: i64,
        byte_size: u64,
        flags: RangeFlags,
    ) -> usize {
        self.descriptors.push(ChunkDescriptor {
            pool_tag,
            file_offset,
            byte_size,
            flags,
        });
        self.ranges.push(MappedRange::default());
        self.descriptors.len() - 1
    }

    /// Assigns the logical media interval of an already-appended element.
    pub fn set_mapped_range(
        &mut self,
        element_index: usize,
        media_offset: u64,
        length: u64,
    ) -> Result<()> {
        let slot = self
            .ranges
            .get_mut(element_index)
            .ok_or(ChunkGroupError::NotFound {
                index: element_index,
                len: self.ranges.len(),
            })?;
        *slot = MappedRange {
            media_offset,
            length,
        };
        Ok(())
    }

    pub fn get(&self, element_index: usize) -> Result<ChunkDescriptor> {
        self.descriptors
            .get(element_index)
            .copied()
            .ok_or(ChunkGroupError::NotFound {
                index: element_index,
                len: self.descriptors.len(),
            })
    }

    pub fn get_mapped_range(&self, element_index: usize) -> Result<MappedRange> {
        self.ranges
            .get(element_index)
            .copied()
            .ok_or(ChunkGroupError::NotFound {
                index: element_index,
                len: self.ranges.len(),
            })
    }

    /// Overwrites an already-appended descriptor in place, preserving its
    /// mapped range.
    pub fn set(
        &mut self,
        element_index: usize,
        pool_tag: u32,
        file_offset: i64,
        byte_size: u64,
        flags: RangeFlags,
    ) -> Result<()> {
        let slot = self
            .descriptors
            .get_mut(element_index)
            .ok_or(ChunkGroupError::NotFound {
                index: element_index,
                len: self.descriptors.len(),
            })?;
        *slot = ChunkDescriptor {
            pool_tag,
            file_offset,
            byte_size,
            flags,
        };
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChunkDescriptor, &MappedRange)> {
        self.descriptors.iter().zip(self.ranges.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_get_round_trips() {
        let mut index = ChunkIndex::new();
        let i = index.append(1, 0x100, 0x10000, RangeFlags::HAS_CHECKSUM);
        index.set_mapped_range(i, 0, 0x10000).unwrap();
        let d = index.get(i).unwrap();
        assert_eq!(d.pool_tag, 1);
        assert_eq!(d.file_offset, 0x100);
        assert_eq!(d.byte_size, 0x10000);
        assert_eq!(index.get_mapped_range(i).unwrap().media_offset, 0);
    }

    #[test]
    fn set_overwrites_but_keeps_mapped_range() {
        let mut index = ChunkIndex::new();
        let i = index.append(1, 0x100, 0x10000, RangeFlags::HAS_CHECKSUM);
        index.set_mapped_range(i, 0x20000, 0x10000).unwrap();
        index
            .set(i, 1, 0x200, 0x20000, RangeFlags::COMPRESSED)
            .unwrap();
        let d = index.get(i).unwrap();
        assert_eq!(d.file_offset, 0x200);
        assert_eq!(index.get_mapped_range(i).unwrap().media_offset, 0x20000);
    }

    #[test]
    fn out_of_range_is_not_found() {
        let index = ChunkIndex::new();
        assert!(matches!(
            index.get(0),
            Err(ChunkGroupError::NotFound { index: 0, len: 0 })
        ));
    }

    #[test]
    fn out_of_range_set_is_not_found() {
        let mut index = ChunkIndex::new();
        assert!(matches!(
            index.set(3, 0, 0, 0, RangeFlags::empty()),
            Err(ChunkGroupError::NotFound { .. })
        ));
    }
}
