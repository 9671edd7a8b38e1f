//! Chunk group fill/reconcile/emit (C4–C7).
//!
//! Translated line-for-line from `libewf_chunk_group_fill_v1`,
//! `libewf_chunk_group_fill_v2`, `libewf_chunk_group_correct_v1` and
//! `libewf_chunk_group_generate_table_entries_data` (libyal/libewf), with
//! the `libfdata_list_t` handle replaced by an owned [`ChunkIndex`] and
//! `libcerror_error_t` replaced by [`ChunkGroupError`].

use log::{debug, warn};

use super::chunk_index::ChunkIndex;
use super::codec::{read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use super::error::{ChunkGroupError, Result};
use super::range_flags::RangeFlags;
use super::section::SectionRef;

const INT32_MAX: u32 = 0x7FFF_FFFF;
const ADDRESS_MASK: u32 = 0x7FFF_FFFF;
const TOP_BIT: u32 = 0x8000_0000;
const V1_ENTRY_SIZE: usize = 4;
const V2_ENTRY_SIZE: usize = 16;

/// Decodes one v1 `stored_offset` into `(address, is_compressed)`, honoring
/// the overflow latch: once `overflow` is set the top bit is address bit 31
/// rather than a compression flag (SPEC_FULL.md §3, `OverflowState`).
fn decode_stored_offset(stored_offset: u32, overflow: bool) -> (u32, bool) {
    if overflow {
        (stored_offset, false)
    } else {
        (stored_offset & ADDRESS_MASK, (stored_offset >> 31) != 0)
    }
}

/// Derives one non-terminal chunk's size by differencing `current` and
/// `next`, applying the EnCase 6.7 rollover compensation from §4.4.
/// Returns `(size, corrupted)`.
fn derive_chunk_size(current_offset: u32, next_offset: u32, raw_next_stored: u32) -> (u32, bool) {
    let mut corrupted = false;
    let size = if next_offset < current_offset {
        if raw_next_stored < current_offset {
            corrupted = true;
        }
        raw_next_stored.wrapping_sub(current_offset)
    } else {
        next_offset - current_offset
    };
    if size == 0 || size > INT32_MAX {
        corrupted = true;
    }
    (size, corrupted)
}

fn compose_flags(is_compressed: bool, corrupted: bool, tainted: bool) -> RangeFlags {
    let mut flags = if is_compressed {
        RangeFlags::COMPRESSED
    } else {
        RangeFlags::HAS_CHECKSUM
    };
    if corrupted {
        flags |= RangeFlags::CORRUPTED;
    }
    if tainted {
        flags |= RangeFlags::TAINTED;
    }
    flags
}

/// One-way latch check from §4.4: after appending a non-overflow entry
/// whose address plus derived size spills past `INT32_MAX`, overflow
/// engages for the remainder of the pass.
fn maybe_latch_overflow(overflow: &mut bool, current_offset: u32, chunk_data_size: u32) {
    if !*overflow && (current_offset as u64 + chunk_data_size as u64) > INT32_MAX as u64 {
        debug!("chunk offset overflow at: {}", current_offset);
        *overflow = true;
    }
}

/// Bounds the terminal v1 chunk's size using the enclosing table section,
/// since there is no successor entry to difference against (§4.4).
fn terminal_size_from_section(
    last_chunk_data_offset: u64,
    section: &dyn SectionRef,
) -> u64 {
    let start = section.start_offset();
    let end = section.end_offset();
    if last_chunk_data_offset < start {
        start - last_chunk_data_offset
    } else if last_chunk_data_offset < end {
        end - last_chunk_data_offset
    } else {
        warn!("invalid last chunk offset value exceeds table section end offset");
        0
    }
}

/// Fills `index` from `number_of_entries` contiguous v1 table entries.
///
/// See SPEC_FULL.md §4.4. `N == 0` is rejected: there is no terminal entry
/// to decode, which the per-entry loop below assumes exists.
pub fn fill_v1(
    index: &mut ChunkIndex,
    chunk_size: u64,
    pool_tag: u32,
    section: &dyn SectionRef,
    base_offset: i64,
    number_of_entries: u32,
    table_entries_data: &[u8],
    tainted: bool,
) -> Result<()> {
    if base_offset < 0 {
        return Err(ChunkGroupError::InvalidArgument {
            what: "base_offset must be non-negative",
        });
    }
    if number_of_entries == 0 {
        return Err(ChunkGroupError::InvalidArgument {
            what: "number_of_entries must be at least 1",
        });
    }
    let required = number_of_entries as usize * V1_ENTRY_SIZE;
    if table_entries_data.len() < required {
        return Err(ChunkGroupError::Truncated {
            offset: 0,
            needed: required,
            available: table_entries_data.len(),
        });
    }

    let mut overflow = false;
    let mut storage_media_offset: u64 = 0;
    let mut stored_offset = read_u32_le(table_entries_data, 0)?;
    let mut table_entry_index: u32 = 0;

    while table_entry_index < number_of_entries - 1 {
        let (current_offset, is_compressed) = decode_stored_offset(stored_offset, overflow);

        let raw_next_stored = read_u32_le(table_entries_data, (table_entry_index as usize + 1) * V1_ENTRY_SIZE)?;
        stored_offset = raw_next_stored;
        let (next_offset, _) = decode_stored_offset(stored_offset, overflow);

        let (chunk_data_size, corrupted) = derive_chunk_size(current_offset, next_offset, raw_next_stored);
        let flags = compose_flags(is_compressed, corrupted, tainted);

        debug!(
            "table entry: {:>8} chunk data offset: 0x{:08x} chunk data size: {}",
            table_entry_index, current_offset, chunk_data_size
        );

        let element_index = index.append(
            pool_tag,
            base_offset + current_offset as i64,
            chunk_data_size as u64,
            flags,
        );
        index.set_mapped_range(element_index, storage_media_offset, chunk_size)?;
        storage_media_offset += chunk_size;

        maybe_latch_overflow(&mut overflow, current_offset, chunk_data_size);
        table_entry_index += 1;
    }

    // Terminal entry: no successor to difference against, so its size comes
    // from the enclosing table section instead.
    stored_offset = read_u32_le(table_entries_data, table_entry_index as usize * V1_ENTRY_SIZE)?;
    let (current_offset, is_compressed) = decode_stored_offset(stored_offset, overflow);

    let last_chunk_data_offset = (base_offset as i128) + (current_offset as i128);
    if last_chunk_data_offset > i64::MAX as i128 {
        return Err(ChunkGroupError::Overflow {
            what: "last chunk data offset",
        });
    }
    let last_chunk_data_offset = last_chunk_data_offset as u64;

    let last_chunk_data_size = terminal_size_from_section(last_chunk_data_offset, section);
    let corrupted = last_chunk_data_size == 0 || last_chunk_data_size > INT32_MAX as u64;
    let flags = compose_flags(is_compressed, corrupted, tainted);

    let element_index = index.append(
        pool_tag,
        last_chunk_data_offset as i64,
        last_chunk_data_size,
        flags,
    );
    index.set_mapped_range(element_index, storage_media_offset, chunk_size)?;

    Ok(())
}

/// Fills `index` from self-describing v2 table entries (§4.5). Unlike v1,
/// every entry names its own size and flags, so there is no differencing,
/// no overflow regime, and no terminal special case.
pub fn fill_v2(
    index: &mut ChunkIndex,
    chunk_size: u64,
    pool_tag: u32,
    section: &dyn SectionRef,
    table_header_size: u64,
    number_of_entries: u32,
    table_entries_data: &[u8],
    tainted: bool,
) -> Result<()> {
    let required = number_of_entries as usize * V2_ENTRY_SIZE;
    if table_entries_data.len() < required {
        return Err(ChunkGroupError::Truncated {
            offset: 0,
            needed: required,
            available: table_entries_data.len(),
        });
    }

    let mut storage_media_offset: u64 = 0;
    let mut table_entry_offset = section.start_offset() + table_header_size;
    let mut table_entry_index: u32 = 0;
    let mut remaining = table_entries_data;

    while remaining.len() >= V2_ENTRY_SIZE {
        let chunk_data_offset = read_u64_le(remaining, 0)?;
        let mut chunk_data_size = read_u32_le(remaining, 8)? as u64;
        let chunk_data_flags = read_u32_le(remaining, 12)?;

        let mut flags = RangeFlags::from_on_disk_v2(chunk_data_flags, table_entry_index);
        if tainted {
            flags |= RangeFlags::TAINTED;
        }

        let mut file_offset = chunk_data_offset as i64;
        if flags.contains(RangeFlags::PATTERN_FILL) {
            file_offset = table_entry_offset as i64;
            chunk_data_size = 8;
        }

        debug!(
            "table entry: {:>8} chunk data offset: 0x{:08x} chunk data size: {}",
            table_entry_index, file_offset, chunk_data_size
        );

        let element_index = index.append(pool_tag, file_offset, chunk_data_size, flags);
        index.set_mapped_range(element_index, storage_media_offset, chunk_size)?;
        storage_media_offset += chunk_size;

        table_entry_offset += V2_ENTRY_SIZE as u64;
        remaining = &remaining[V2_ENTRY_SIZE..];
        table_entry_index += 1;
    }
    Ok(())
}

/// Reconciles `number_of_entries` v1 entries (typically from a backup
/// `table2` section) against the `number_of_entries` elements of `index`
/// starting at `start_index`, which must already have been populated by a
/// prior `fill_v1` call over the primary table (§4.6).
///
/// `start_index` is not part of the abstract core API in SPEC_FULL.md
/// (which assumes one index per chunk group); it exists here so a single
/// segment-wide `ChunkIndex` can host more than one table/table2 pair.
/// Passing `0` recovers the single-group behavior exactly.
#[allow(clippy::too_many_arguments)]
pub fn reconcile_v1(
    index: &mut ChunkIndex,
    chunk_size: u64,
    pool_tag: u32,
    section: &dyn SectionRef,
    base_offset: i64,
    number_of_entries: u32,
    table_entries_data: &[u8],
    tainted: bool,
    start_index: usize,
) -> Result<()> {
    if base_offset < 0 {
        return Err(ChunkGroupError::InvalidArgument {
            what: "base_offset must be non-negative",
        });
    }
    if number_of_entries == 0 {
        return Err(ChunkGroupError::InvalidArgument {
            what: "number_of_entries must be at least 1",
        });
    }
    let required = number_of_entries as usize * V1_ENTRY_SIZE;
    if table_entries_data.len() < required {
        return Err(ChunkGroupError::Truncated {
            offset: 0,
            needed: required,
            available: table_entries_data.len(),
        });
    }
    if index.len() < start_index + number_of_entries as usize {
        return Err(ChunkGroupError::OutOfRange {
            what: "reconcile_v1 target index does not hold a primary pass to reconcile against",
            value: index.len() as i128,
        });
    }

    let mut overflow = false;
    let mut stored_offset = read_u32_le(table_entries_data, 0)?;
    let mut table_entry_index: u32 = 0;

    while table_entry_index < number_of_entries - 1 {
        let (current_offset, is_compressed) = decode_stored_offset(stored_offset, overflow);

        let raw_next_stored = read_u32_le(table_entries_data, (table_entry_index as usize + 1) * V1_ENTRY_SIZE)?;
        stored_offset = raw_next_stored;
        let (next_offset, _) = decode_stored_offset(stored_offset, overflow);

        let (chunk_data_size, corrupted) = derive_chunk_size(current_offset, next_offset, raw_next_stored);
        let flags = compose_flags(is_compressed, corrupted, tainted);

        reconcile_one(
            index,
            start_index + table_entry_index as usize,
            pool_tag,
            base_offset + current_offset as i64,
            chunk_data_size as u64,
            flags,
            corrupted,
            tainted,
        )?;

        maybe_latch_overflow(&mut overflow, current_offset, chunk_data_size);
        table_entry_index += 1;
    }

    stored_offset = read_u32_le(table_entries_data, table_entry_index as usize * V1_ENTRY_SIZE)?;
    let (current_offset, is_compressed) = decode_stored_offset(stored_offset, overflow);

    let last_chunk_data_offset = (base_offset as i128) + (current_offset as i128);
    if last_chunk_data_offset > i64::MAX as i128 {
        return Err(ChunkGroupError::Overflow {
            what: "last chunk data offset",
        });
    }
    let last_chunk_data_offset = last_chunk_data_offset as u64;

    // Legacy quirk (§4.6, §9): the terminal size gets the section's own
    // header size subtracted before corruption tests, with no symmetric
    // step in `fill_v1`. Preserved for bit-compatibility.
    let raw_size = terminal_size_from_section(last_chunk_data_offset, section) as i128;
    let last_chunk_data_size = raw_size - section.size() as i128;
    let corrupted = last_chunk_data_size <= 0 || last_chunk_data_size > INT32_MAX as i128;
    let flags = compose_flags(is_compressed, corrupted, tainted);
    let last_chunk_data_size = last_chunk_data_size.max(0) as u64;

    reconcile_one(
        index,
        start_index + table_entry_index as usize,
        pool_tag,
        last_chunk_data_offset as i64,
        last_chunk_data_size,
        flags,
        corrupted,
        tainted,
    )?;

    Ok(())
}

/// Applies the §4.6 precedence rule for one reconciled element: overwrite,
/// or keep the previous descriptor.
#[allow(clippy::too_many_arguments)]
fn reconcile_one(
    index: &mut ChunkIndex,
    element_index: usize,
    pool_tag: u32,
    file_offset: i64,
    byte_size: u64,
    flags: RangeFlags,
    corrupted: bool,
    tainted: bool,
) -> Result<()> {
    let previous = index.get(element_index)?;

    let mismatch = previous.file_offset != file_offset
        || previous.byte_size != byte_size
        || previous.flags.contains(RangeFlags::COMPRESSED) != flags.contains(RangeFlags::COMPRESSED);

    let update_data_range = if mismatch {
        (!corrupted && !tainted) || (previous.flags.contains(RangeFlags::CORRUPTED) && !corrupted)
    } else {
        previous.flags.contains(RangeFlags::TAINTED)
    };

    if update_data_range {
        index.set(element_index, pool_tag, file_offset, byte_size, flags)?;
    }
    Ok(())
}

/// Serializes `index` back to a v1 or v2 table-entry array (§4.7).
pub fn emit(
    index: &ChunkIndex,
    format_version: u8,
    base_offset: i64,
    out: &mut [u8],
) -> Result<()> {
    match format_version {
        1 => emit_v1(index, base_offset, out),
        2 => emit_v2(index, out),
        _ => Err(ChunkGroupError::InvalidArgument {
            what: "unsupported table format version",
        }),
    }
}

fn emit_v1(index: &ChunkIndex, base_offset: i64, out: &mut [u8]) -> Result<()> {
    if base_offset < 0 {
        return Err(ChunkGroupError::InvalidArgument {
            what: "base_offset must be non-negative",
        });
    }
    let required = index.len() * V1_ENTRY_SIZE;
    if out.len() < required {
        return Err(ChunkGroupError::Truncated {
            offset: 0,
            needed: required,
            available: out.len(),
        });
    }
    for i in 0..index.len() {
        let descriptor = index.get(i)?;
        let relative = descriptor.file_offset - base_offset;
        if relative < 0 || relative > INT32_MAX as i64 {
            return Err(ChunkGroupError::OutOfRange {
                what: "v1 chunk offset",
                value: relative as i128,
            });
        }
        let mut table_offset = relative as u32;
        if descriptor.flags.contains(RangeFlags::COMPRESSED) {
            table_offset |= TOP_BIT;
        }
        write_u32_le(out, i * V1_ENTRY_SIZE, table_offset)?;
    }
    Ok(())
}

fn emit_v2(index: &ChunkIndex, out: &mut [u8]) -> Result<()> {
    let required = index.len() * V2_ENTRY_SIZE;
    if out.len() < required {
        return Err(ChunkGroupError::Truncated {
            offset: 0,
            needed: required,
            available: out.len(),
        });
    }
    for i in 0..index.len() {
        let descriptor = index.get(i)?;
        if descriptor.byte_size > u32::MAX as u64 {
            return Err(ChunkGroupError::OutOfRange {
                what: "v2 chunk size",
                value: descriptor.byte_size as i128,
            });
        }
        let base = i * V2_ENTRY_SIZE;
        write_u64_le(out, base, descriptor.file_offset as u64)?;
        write_u32_le(out, base + 8, descriptor.byte_size as u32)?;
        write_u32_le(out, base + 12, descriptor.flags.to_on_disk_v2())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ewf::section::SimpleSection;

    fn v1_entries(values: &[u32]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(values.len() * 4);
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    fn v2_entry(offset: u64, size: u32, flags: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf
    }

    // Scenario 1: three well-formed v1 chunks, no compression.
    #[test]
    fn scenario_three_uncompressed_chunks() {
        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010, 0x00030010]);
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x40010,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        fill_v1(&mut index, 0x10000, 7, &section, 0x100, 4, &entries, false).unwrap();

        assert_eq!(index.len(), 4);
        let d0 = index.get(0).unwrap();
        assert_eq!(d0.file_offset, 0x110);
        assert_eq!(d0.byte_size, 0x10000);
        assert_eq!(d0.flags, RangeFlags::HAS_CHECKSUM);

        let d1 = index.get(1).unwrap();
        assert_eq!(d1.file_offset, 0x10110);
        let d2 = index.get(2).unwrap();
        assert_eq!(d2.file_offset, 0x20110);

        let terminal = index.get(3).unwrap();
        assert_eq!(terminal.file_offset, 0x30110);
        assert_eq!(terminal.byte_size, 0x40010 - 0x30110);
        assert_eq!(terminal.flags, RangeFlags::HAS_CHECKSUM);

        assert_eq!(index.get_mapped_range(0).unwrap().media_offset, 0);
        assert_eq!(index.get_mapped_range(1).unwrap().media_offset, 0x10000);
        assert_eq!(index.get_mapped_range(3).unwrap().media_offset, 0x30000);
    }

    // Scenario 2: compressed flag on the first entry.
    #[test]
    fn scenario_compressed_first_entry() {
        let entries = v1_entries(&[0x80000010, 0x00010010, 0x00020010, 0x00030010]);
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x40010,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        fill_v1(&mut index, 0x10000, 7, &section, 0x100, 4, &entries, false).unwrap();

        let d0 = index.get(0).unwrap();
        assert_eq!(d0.flags, RangeFlags::COMPRESSED);
        let d1 = index.get(1).unwrap();
        assert_eq!(d1.flags, RangeFlags::HAS_CHECKSUM);
    }

    // Scenario 3: overflow latch engages and is never un-set.
    #[test]
    fn scenario_overflow_latch() {
        let entries = v1_entries(&[0x40000000, 0x80000000, 0x90000000]);
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x1_0000_0000,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        fill_v1(&mut index, 0x1000, 1, &section, 0, 3, &entries, false).unwrap();

        let d0 = index.get(0).unwrap();
        assert_eq!(d0.file_offset, 0x40000000);
        assert_eq!(d0.byte_size, 0x40000000);

        let d1 = index.get(1).unwrap();
        assert_eq!(d1.file_offset, 0x80000000u64 as i64);
        assert_eq!(d1.byte_size, 0x10000000);
        assert_eq!(d1.flags, RangeFlags::HAS_CHECKSUM);
        assert!(!d1.flags.contains(RangeFlags::COMPRESSED));
    }

    // Scenario 4: terminal chunk shrinks to fit before the section start.
    #[test]
    fn scenario_terminal_before_section_start() {
        let entries = v1_entries(&[0x0010]);
        let section = SimpleSection {
            start_offset: 0x1000,
            end_offset: 0x2000,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        fill_v1(&mut index, 0x1000, 1, &section, 0xF00, 1, &entries, false).unwrap();

        let d0 = index.get(0).unwrap();
        assert_eq!(d0.file_offset, 0xF10);
        assert_eq!(d0.byte_size, 0xF0);
        assert_eq!(d0.flags, RangeFlags::HAS_CHECKSUM);
    }

    // Scenario 5: v2 pattern-fill chunk redirects offset and size.
    #[test]
    fn scenario_v2_pattern_fill() {
        let section = SimpleSection {
            start_offset: 0x2000,
            end_offset: 0x3000,
            size: 0,
        };
        let entries = v2_entry(0xDEAD, 4096, 0x5);
        let mut index = ChunkIndex::new();
        fill_v2(&mut index, 0x8000, 3, &section, 24, 1, &entries, false).unwrap();

        let d0 = index.get(0).unwrap();
        assert_eq!(d0.file_offset, 0x2000 + 24);
        assert_eq!(d0.byte_size, 8);
        assert!(d0.flags.contains(RangeFlags::COMPRESSED));
        assert!(d0.flags.contains(RangeFlags::PATTERN_FILL));
        assert!(!d0.flags.contains(RangeFlags::HAS_CHECKSUM));
    }

    #[test]
    fn v2_non_pattern_entry_keeps_its_own_offset() {
        let section = SimpleSection {
            start_offset: 0x2000,
            end_offset: 0x3000,
            size: 0,
        };
        let entries = v2_entry(0x9000, 512, 0x3); // compressed + checksum
        let mut index = ChunkIndex::new();
        fill_v2(&mut index, 0x8000, 3, &section, 24, 1, &entries, false).unwrap();
        let d0 = index.get(0).unwrap();
        assert_eq!(d0.file_offset, 0x9000);
        assert_eq!(d0.byte_size, 512);
        assert!(d0.flags.contains(RangeFlags::COMPRESSED));
        assert!(d0.flags.contains(RangeFlags::HAS_CHECKSUM));
    }

    fn seeded_index(section: &SimpleSection, base: i64) -> ChunkIndex {
        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        let mut index = ChunkIndex::new();
        fill_v1(&mut index, 0x10000, 7, section, base, 3, &entries, false).unwrap();
        index
    }

    // Scenario 6 / reconcile rule 3: previously-tainted match gets cleared.
    #[test]
    fn reconcile_clears_taint_on_confirmed_match() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x30010,
            size: 0,
        };
        let mut index = seeded_index(&section, 0x100);
        index
            .set(
                0,
                7,
                0x110,
                0x10000,
                RangeFlags::HAS_CHECKSUM | RangeFlags::TAINTED,
            )
            .unwrap();

        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        reconcile_v1(&mut index, 0x10000, 7, &section, 0x100, 3, &entries, false, 0).unwrap();

        let d0 = index.get(0).unwrap();
        assert_eq!(d0.flags, RangeFlags::HAS_CHECKSUM);
    }

    // Reconcile rule 1: clean mismatch overwrites.
    #[test]
    fn reconcile_overwrites_clean_mismatch() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x30010,
            size: 0,
        };
        let mut index = seeded_index(&section, 0x100);
        index.set(0, 7, 0xDEAD, 0x10000, RangeFlags::HAS_CHECKSUM).unwrap();

        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        reconcile_v1(&mut index, 0x10000, 7, &section, 0x100, 3, &entries, false, 0).unwrap();

        assert_eq!(index.get(0).unwrap().file_offset, 0x110);
    }

    // Reconcile rule 2: mismatch where the previous entry was corrupted and
    // the new one is not, overwrites even though corrupted||tainted would
    // normally block rule 1.
    #[test]
    fn reconcile_overwrites_when_previous_was_corrupted() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x30010,
            size: 0,
        };
        let mut index = seeded_index(&section, 0x100);
        index
            .set(
                0,
                7,
                0xDEAD,
                0x10000,
                RangeFlags::HAS_CHECKSUM | RangeFlags::CORRUPTED,
            )
            .unwrap();

        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        reconcile_v1(&mut index, 0x10000, 7, &section, 0x100, 3, &entries, false, 0).unwrap();

        assert_eq!(index.get(0).unwrap().file_offset, 0x110);
        assert!(!index.get(0).unwrap().flags.contains(RangeFlags::CORRUPTED));
    }

    // Reconcile rule 4: clean match, previous not tainted — nothing changes.
    #[test]
    fn reconcile_keeps_previous_on_clean_match() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x30010,
            size: 0,
        };
        let mut index = seeded_index(&section, 0x100);
        let before = index.get(0).unwrap();

        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        reconcile_v1(&mut index, 0x10000, 7, &section, 0x100, 3, &entries, false, 0).unwrap();

        assert_eq!(index.get(0).unwrap(), before);
    }

    // Mismatch while new entry is tainted (but not corrupted) and previous
    // entry was NOT corrupted: none of rules 1-3 fire, so it's kept.
    #[test]
    fn reconcile_keeps_previous_on_tainted_mismatch_without_prior_corruption() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x30010,
            size: 0,
        };
        let mut index = seeded_index(&section, 0x100);
        index.set(0, 7, 0xDEAD, 0x10000, RangeFlags::HAS_CHECKSUM).unwrap();

        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        reconcile_v1(&mut index, 0x10000, 7, &section, 0x100, 3, &entries, true, 0).unwrap();

        assert_eq!(index.get(0).unwrap().file_offset, 0xDEAD);
    }

    #[test]
    fn reconcile_rejects_short_index() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x30010,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        let entries = v1_entries(&[0x00000010, 0x00010010, 0x00020010]);
        let err = reconcile_v1(&mut index, 0x10000, 7, &section, 0x100, 3, &entries, false, 0)
            .unwrap_err();
        assert!(matches!(err, ChunkGroupError::OutOfRange { .. }));
    }

    #[test]
    fn emit_v1_round_trips_offsets_and_compressed_bit() {
        let entries = v1_entries(&[0x80000010, 0x00010010, 0x00020010, 0x00030010]);
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x40010,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        fill_v1(&mut index, 0x10000, 7, &section, 0x100, 4, &entries, false).unwrap();

        let mut out = vec![0u8; index.len() * 4];
        emit(&index, 1, 0x100, &mut out).unwrap();

        let mut reparsed = ChunkIndex::new();
        fill_v1(&mut reparsed, 0x10000, 7, &section, 0x100, 4, &out, false).unwrap();

        for i in 0..index.len() {
            let original = index.get(i).unwrap();
            let again = reparsed.get(i).unwrap();
            assert_eq!(original.file_offset, again.file_offset);
            assert_eq!(
                original.flags.contains(RangeFlags::COMPRESSED),
                again.flags.contains(RangeFlags::COMPRESSED)
            );
        }
    }

    #[test]
    fn emit_v1_rejects_offset_below_base() {
        let mut index = ChunkIndex::new();
        index.append(1, 0x50, 0x100, RangeFlags::HAS_CHECKSUM);
        let mut out = vec![0u8; 4];
        let err = emit(&index, 1, 0x100, &mut out).unwrap_err();
        assert!(matches!(err, ChunkGroupError::OutOfRange { .. }));
    }

    #[test]
    fn emit_v2_rejects_oversized_byte_size() {
        let mut index = ChunkIndex::new();
        index.append(1, 0x50, u32::MAX as u64 + 1, RangeFlags::HAS_CHECKSUM);
        let mut out = vec![0u8; 16];
        let err = emit(&index, 2, 0, &mut out).unwrap_err();
        assert!(matches!(err, ChunkGroupError::OutOfRange { .. }));
    }

    #[test]
    fn emit_v2_round_trips_flags() {
        let section = SimpleSection {
            start_offset: 0x2000,
            end_offset: 0x3000,
            size: 0,
        };
        let entries = v2_entry(0x9000, 512, 0x3);
        let mut index = ChunkIndex::new();
        fill_v2(&mut index, 0x8000, 3, &section, 24, 1, &entries, false).unwrap();

        let mut out = vec![0u8; 16];
        emit(&index, 2, 0, &mut out).unwrap();
        assert_eq!(&out[..16], &entries[..]);
    }

    #[test]
    fn fill_v1_rejects_zero_entries() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x10,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        let err = fill_v1(&mut index, 0x10000, 1, &section, 0, 0, &[], false).unwrap_err();
        assert!(matches!(err, ChunkGroupError::InvalidArgument { .. }));
    }

    #[test]
    fn fill_v1_rejects_negative_base_offset() {
        let section = SimpleSection {
            start_offset: 0,
            end_offset: 0x10,
            size: 0,
        };
        let mut index = ChunkIndex::new();
        let err = fill_v1(&mut index, 0x10000, 1, &section, -1, 1, &[0, 0, 0, 0], false)
            .unwrap_err();
        assert!(matches!(err, ChunkGroupError::InvalidArgument { .. }));
    }
}
