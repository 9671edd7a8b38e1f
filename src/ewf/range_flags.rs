//! Range-flag model (C2).
//!
//! A small fixed bit-set — not worth pulling in `bitflags` for (see
//! `DESIGN.md`). Five bits matter: two are mutually exclusive on
//! well-formed entries (`COMPRESSED` / `HAS_CHECKSUM`), one implies another
//! (`PATTERN_FILL` implies `COMPRESSED`), and two (`CORRUPTED`, `TAINTED`)
//! never round-trip through the on-disk v2 `chunk_data_flags` word.

use log::warn;

/// On-disk v2 `chunk_data_flags` bit for "is compressed".
const ON_DISK_COMPRESSED: u32 = 0x1;
/// On-disk v2 `chunk_data_flags` bit for "has checksum".
const ON_DISK_HAS_CHECKSUM: u32 = 0x2;
/// On-disk v2 `chunk_data_flags` bit for "uses pattern fill".
const ON_DISK_PATTERN_FILL: u32 = 0x4;
/// All bits the format defines; anything else is reserved.
const ON_DISK_KNOWN_MASK: u32 = ON_DISK_COMPRESSED | ON_DISK_HAS_CHECKSUM | ON_DISK_PATTERN_FILL;

/// In-memory bit-set describing how one chunk's compressed payload is
/// stored and how much the reader should trust the descriptor that
/// describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeFlags(u8);

impl RangeFlags {
    pub const COMPRESSED: RangeFlags = RangeFlags(0x01);
    pub const HAS_CHECKSUM: RangeFlags = RangeFlags(0x02);
    pub const PATTERN_FILL: RangeFlags = RangeFlags(0x04);
    pub const CORRUPTED: RangeFlags = RangeFlags(0x08);
    pub const TAINTED: RangeFlags = RangeFlags(0x10);

    pub const fn empty() -> Self {
        RangeFlags(0)
    }

    pub fn contains(self, other: RangeFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: RangeFlags) {
        self.0 |= other.0;
    }

    pub fn union(self, other: RangeFlags) -> RangeFlags {
        RangeFlags(self.0 | other.0)
    }

    /// Builds the in-memory flag set from a v2 on-disk `chunk_data_flags`
    /// word, per the table in SPEC_FULL.md §4.2. Reserved bits are logged,
    /// never fatal.
    pub fn from_on_disk_v2(chunk_data_flags: u32, table_entry_index: u32) -> RangeFlags {
        let mut flags = RangeFlags::empty();
        if chunk_data_flags & ON_DISK_COMPRESSED != 0 {
            flags.insert(RangeFlags::COMPRESSED);
            if chunk_data_flags & ON_DISK_PATTERN_FILL != 0 {
                flags.insert(RangeFlags::PATTERN_FILL);
            }
        }
        if chunk_data_flags & ON_DISK_HAS_CHECKSUM != 0 {
            flags.insert(RangeFlags::HAS_CHECKSUM);
        }
        if chunk_data_flags & !ON_DISK_KNOWN_MASK != 0 {
            warn!(
                "unsupported chunk data flags: 0x{:08x} in table entry: {}",
                chunk_data_flags, table_entry_index
            );
        }
        flags
    }

    /// Inverse of [`RangeFlags::from_on_disk_v2`]: only the three persisted
    /// bits survive. `CORRUPTED`/`TAINTED` are runtime-only enrichment and
    /// never written back out.
    pub fn to_on_disk_v2(self) -> u32 {
        let mut bits = 0u32;
        if self.contains(RangeFlags::COMPRESSED) {
            bits |= ON_DISK_COMPRESSED;
        }
        if self.contains(RangeFlags::HAS_CHECKSUM) {
            bits |= ON_DISK_HAS_CHECKSUM;
        }
        if self.contains(RangeFlags::PATTERN_FILL) {
            bits |= ON_DISK_PATTERN_FILL;
        }
        bits
    }
}

impl std::ops::BitOr for RangeFlags {
    type Output = RangeFlags;
    fn bitor(self, rhs: RangeFlags) -> RangeFlags {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for RangeFlags {
    fn bitor_assign(&mut self, rhs: RangeFlags) {
        self.insert(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_and_checksum_are_distinct_bits() {
        let compressed = RangeFlags::COMPRESSED;
        let checksum = RangeFlags::HAS_CHECKSUM;
        assert!(compressed.contains(RangeFlags::COMPRESSED));
        assert!(!compressed.contains(RangeFlags::HAS_CHECKSUM));
        assert!(checksum.contains(RangeFlags::HAS_CHECKSUM));
    }

    #[test]
    fn pattern_fill_round_trips_with_compressed() {
        let flags = RangeFlags::from_on_disk_v2(0x5, 0);
        assert!(flags.contains(RangeFlags::COMPRESSED));
        assert!(flags.contains(RangeFlags::PATTERN_FILL));
        assert!(!flags.contains(RangeFlags::HAS_CHECKSUM));
        assert_eq!(flags.to_on_disk_v2(), 0x5);
    }

    #[test]
    fn corrupted_and_tainted_never_persist() {
        let flags = RangeFlags::HAS_CHECKSUM | RangeFlags::CORRUPTED | RangeFlags::TAINTED;
        assert_eq!(flags.to_on_disk_v2(), ON_DISK_HAS_CHECKSUM);
    }

    #[test]
    fn reserved_bits_do_not_change_known_flags() {
        let flags = RangeFlags::from_on_disk_v2(0xFFFF_FFF1, 7);
        assert!(flags.contains(RangeFlags::COMPRESSED));
        assert!(!flags.contains(RangeFlags::PATTERN_FILL));
        assert!(!flags.contains(RangeFlags::HAS_CHECKSUM));
    }
}
