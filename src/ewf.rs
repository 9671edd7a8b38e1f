//! **EWF (Expert Witness Format) reader utilities**
//!
//! This module provides all the data-structures and helper functions required to
//! parse, inspect and stream data from a multi-segment **EWF / EnCase** forensic
//! image (`.E01`, `.L01`, …).
//!
//! Table-section decoding (`table`/`table2`) is delegated to the
//! [`chunk_group`] subsystem, which owns the offset/size derivation, the v1
//! overflow regime, pattern-fill chunks and backup-table reconciliation.
//! Everything in this top-level file is segment-file I/O and section-header
//! wire parsing; `chunk_group` never touches a `File`.

mod chunk_group;
mod chunk_index;
mod codec;
mod error;
mod range_flags;
mod section;

use chunk_index::ChunkIndex;
use range_flags::RangeFlags;
use section::SectionRef;

use flate2::read::ZlibDecoder;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Size, in bytes, of the fixed-width header every `table`/`table2` section
/// carries before its entry array: `number_of_entries`(4) + padding(4) +
/// `base_offset`(8) + padding(4) + checksum(4).
const TABLE_HEADER_SIZE: u64 = 24;

/// Header located at the very beginning of every *segment* (E01, E02 …).
///
/// The header starts with an 8-byte signature followed by some small control
/// fields. Only the *segment number* is currently exposed – the remainder is
/// preserved for integrity checks but never interpreted by the library.
#[derive(Default, Clone)]
struct EwfHeader {
    /// Either `EVF` / `MVF` signature depending on the EWF **flavour**.
    _signature: [u8; 8],
    /// Logical position of the segment in the multi-part image (starts at `1`).
    segment_number: u16,
}

/// Generic *section descriptor* that precedes **every** section in the format
/// (header, volume, table, data, …). It tells where to find the section and how
/// large it is.
///
/// Refer to the official specification <https://github.com/libyal/libewf/blob/main/documentation/Expert%20Witness%20Compression%20Format%20(EWF).asciidoc#31-section-descriptor>
#[derive(Clone)]
struct EwfSectionDescriptor {
    /// NUL-padded ASCII section kind (e.g. `header`, `table`, `done`).
    section_type_def: String,
    /// Offset **from the beginning of the segment** to this descriptor itself.
    start_offset: u64,
    /// Offset **from the beginning of the segment** to the *next* section
    /// descriptor.
    next_section_offset: u64,
    /// Raw size (in bytes) of the described section.
    section_size: u64,
    /// CRC-32 of the section header – currently ignored but kept for future
    /// verification.
    _checksum: u32,
}

/// `chunk_group` only needs to know where a table section starts and ends in
/// order to bound the terminal v1 chunk; it never parses the wire header
/// itself.
impl SectionRef for EwfSectionDescriptor {
    fn start_offset(&self) -> u64 {
        self.start_offset
    }

    fn end_offset(&self) -> u64 {
        self.next_section_offset
    }

    fn size(&self) -> u64 {
        self.section_size
    }
}

/// Compressed *header* section — contains acquisition metadata (case number,
/// examiner name, hashes, …). The structure is kept opaque for the moment.
#[derive(Default, Clone)]
struct EwfHeaderSection {
    /// Inflated Zlib payload.
    _data: Vec<u8>,
    /// Parsed tab-separated key/value fields (identifier → value).
    metadata: HashMap<String, String>,
}

/// *Volume* section – describes geometry of the acquired medium.
#[derive(Default, Clone)]
struct EwfVolumeSection {
    /// How many *chunks* (compressed or raw) build the whole image.
    chunk_count: u32,
    /// Number of 512-byte sectors packed into a single *chunk*.
    sector_per_chunk: u32,
    /// Logical sector size in bytes (usually **512**).
    bytes_per_sector: u32,
    /// Overall amount of sectors in the original evidence.
    total_sector_count: u32,
}

/// In-memory cache so repeated `read()` / `seek()` calls do not hammer the IO
/// layer. It always stores **exactly one** chunk.
#[derive(Clone)]
struct ChunkCache {
    /// Chunk index *within its owning segment* (starting at 0).
    number: usize,
    /// Owning segment index (starting at 1, to match EWF convention).
    segment: usize,
    /// Current read pointer *inside* the cached chunk.
    ptr: usize,
    /// Decompressed (or pattern-expanded) data of the cached chunk.
    data: Vec<u8>,
}

impl Default for ChunkCache {
    fn default() -> Self {
        ChunkCache {
            number: 0,
            segment: 1,
            ptr: 0,
            data: Vec::new(),
        }
    }
}

/// Public façade – implements the `Read` / `Seek` traits over an entire multi-
/// segment EWF image just like a `File` on the original evidence.
#[derive(Default)]
pub struct EWF {
    /// File descriptors for every segment (ordered).
    segments: Vec<File>,
    /// Segment header (from the *last* parsed segment).
    ewf_header: EwfHeader,
    /// All discovered section descriptors of the currently processed segment.
    sections: Vec<EwfSectionDescriptor>,
    /// Global header (only one is expected per image even in multi-segment).
    header: EwfHeaderSection,
    /// Geometry / layout information.
    volume: EwfVolumeSection,
    /// Mapping `segment → chunk index` built up from that segment's
    /// `table`/`table2` sections.
    chunks: HashMap<usize, ChunkIndex>,
    /// Mapping `segment → first global chunk number` – the running total of
    /// chunks appended before this segment's first table entry.
    first_chunk_number: HashMap<usize, usize>,
    /// Small read-ahead cache.
    cached_chunk: ChunkCache,
    /// Running counter of chunks appended so far, across every segment.
    chunk_count: usize,
    /// Last absolute position after a `seek()` (needed for relative seeks).
    position: u64,
}

// ===== impl EwfVolumeSection =================================================
impl EwfVolumeSection {
    /// Parse and inflate a *volume* section located at `offset` within `file`.
    fn new(mut file: &File, offset: u64) -> Self {
        let mut chunk_count = [0u8; 4];
        let mut sector_per_chunk = [0u8; 4];
        let mut bytes_per_sector = [0u8; 4];
        let mut total_sector_count = [0u8; 4];

        file.seek(SeekFrom::Start(offset + 4)).unwrap();
        file.read(&mut chunk_count).unwrap();
        file.seek(SeekFrom::Start(offset + 8)).unwrap();
        file.read(&mut sector_per_chunk).unwrap();
        file.seek(SeekFrom::Start(offset + 12)).unwrap();
        file.read(&mut bytes_per_sector).unwrap();
        file.seek(SeekFrom::Start(offset + 16)).unwrap();
        file.read(&mut total_sector_count).unwrap();

        Self {
            chunk_count: u32::from_le_bytes(chunk_count),
            sector_per_chunk: u32::from_le_bytes(sector_per_chunk),
            bytes_per_sector: u32::from_le_bytes(bytes_per_sector),
            total_sector_count: u32::from_le_bytes(total_sector_count),
        }
    }

    /// Computed size (in **bytes**) of a single *chunk*.
    #[inline]
    fn chunk_size(&self) -> usize {
        self.sector_per_chunk as usize * self.bytes_per_sector as usize
    }

    /// Largest valid offset (`total_sector_count × bytes_per_sector`).
    #[inline]
    fn max_offset(&self) -> usize {
        self.total_sector_count as usize * self.bytes_per_sector as usize
    }
}

// ===== impl EwfHeader ========================================================
impl EwfHeader {
    /// Read and validate an `EwfHeader` from the **start** of `file`.
    ///
    /// The function ensures the 8-byte signature matches either the *L01* or
    /// *E01* flavour and validates a few sanity bytes that must follow.
    fn new(mut file: &File) -> Result<Self, String> {
        const EWF_L01_SIGNATURE: [u8; 8] = [0x4d, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];
        const EWF_E01_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];

        let mut signature = [0u8; 8];
        file.read_exact(&mut signature).unwrap();

        if signature != EWF_L01_SIGNATURE && signature != EWF_E01_SIGNATURE {
            return Err("Invalid Signature.".into());
        }

        let mut one_byte = [0u8; 1];
        file.read_exact(&mut one_byte).unwrap();

        let mut segment_number = [0u8; 2];
        file.read_exact(&mut segment_number).unwrap();

        let mut zero_field = [0u8; 2];
        file.read_exact(&mut zero_field).unwrap();

        if one_byte[0] != 1 || zero_field != [0u8; 2] {
            return Err("Invalid Header Fields.".into());
        }

        Ok(Self {
            _signature: signature,
            segment_number: u16::from_le_bytes(segment_number),
        })
    }
}

// ===== impl EwfSectionDescriptor ============================================
impl EwfSectionDescriptor {
    /// Parse a **section descriptor** present at `offset` in `file`.
    fn new(mut file: &File, offset: u64) -> Self {
        let mut section_type_def = [0u8; 16];
        let mut next_section_offset = [0u8; 8];
        let mut section_size = [0u8; 8];
        let mut checksum = [0u8; 4];

        file.seek(SeekFrom::Start(offset)).unwrap();
        file.read(&mut section_type_def).unwrap();
        file.seek(SeekFrom::Start(offset + 16)).unwrap();
        file.read(&mut next_section_offset).unwrap();
        file.seek(SeekFrom::Start(offset + 24)).unwrap();
        file.read(&mut section_size).unwrap();
        file.seek(SeekFrom::Start(offset + 104)).unwrap();
        file.read(&mut checksum).unwrap();

        let mut section_type = String::from_utf8(section_type_def.to_vec()).unwrap();
        section_type.retain(|c| c != '\0');

        Self {
            section_type_def: section_type,
            start_offset: offset,
            next_section_offset: u64::from_le_bytes(next_section_offset),
            section_size: u64::from_le_bytes(section_size),
            _checksum: u32::from_le_bytes(checksum),
        }
    }
}

// ===== impl EwfHeaderSection ===============================================
impl EwfHeaderSection {
    /* ---------------------------------------------------------------- helpers */

    /// Decode raw bytes (`ASCII` first, then `UTF-16LE`) into a `String`.
    fn decode(raw: &[u8]) -> String {
        if let Ok(txt) = String::from_utf8(raw.to_vec()) {
            return txt;
        }
        if raw.len() % 2 == 0 {
            let utf16: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            if let Ok(txt) = String::from_utf16(&utf16) {
                return txt;
            }
        }
        String::new()
    }

    /// Build a map from a *key-row + value-row* pair (tab-separated).
    fn table_to_map(keys: &str, vals: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (k, v) in keys.split('\t').zip(vals.split('\t')) {
            map.insert(
                k.trim_matches('\0').to_string(),
                v.trim_matches('\0').to_string(),
            );
        }
        map
    }

    /// Robust parser that copes with:
    /// * optional BOM
    /// * optional blank line before the table
    /// * classic *“one entry per line”* fallback used in old images
    fn parse_metadata(raw: &[u8]) -> HashMap<String, String> {
        let txt = Self::decode(raw);
        let mut lines: Vec<&str> = txt
            .split(|c| c == '\n' || c == '\r')
            .filter(|l| !l.trim().is_empty())
            .collect();

        /* strip UTF-8 BOM if present */
        if let Some(first) = lines.first_mut() {
            *first = first.trim_start_matches('\u{FEFF}');
        }

        /* find the first two consecutive tabbed lines – those are the table */
        for i in 0..lines.len().saturating_sub(1) {
            if lines[i].contains('\t') && lines[i + 1].contains('\t') {
                return Self::table_to_map(lines[i], lines[i + 1]);
            }
        }

        /* fallback: id<TAB>value per line */
        let mut map = HashMap::new();
        for l in lines {
            if let Some((k, v)) = l.split_once('\t') {
                map.insert(
                    k.trim_matches('\0').to_string(),
                    v.trim_matches('\0').to_string(),
                );
            }
        }
        map
    }

    /// Inflate the compressed section and immediately parse its metadata.
    fn new(file: &File, offset: u64, section: &EwfSectionDescriptor) -> Result<Self, String> {
        let mut fd = file.try_clone().unwrap();
        fd.seek(SeekFrom::Start(offset)).unwrap();

        let mut compressed = vec![0; section.section_size as usize];
        fd.read_exact(&mut compressed).unwrap();

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|_| "Could not decompress the header section".into())
            .map(|_| {
                let metadata = Self::parse_metadata(&data);
                Self {
                    _data: data,
                    metadata,
                }
            })
    }
}

/// Whether a table-style section's entry array uses the v1 4-byte layout or
/// the v2 16-byte layout, keyed off the arithmetic relationship between
/// `section_size` and `number_of_entries` (there is no explicit format-version
/// field on the section itself).
enum TableEntryLayout {
    V1,
    V2,
}

fn classify_table_layout(section_size: u64, number_of_entries: u32, segment_number: u16) -> TableEntryLayout {
    let entries_bytes = section_size.saturating_sub(TABLE_HEADER_SIZE);
    let v1_bytes = number_of_entries as u64 * 4;
    let v2_bytes = number_of_entries as u64 * 16;

    if entries_bytes == v1_bytes {
        TableEntryLayout::V1
    } else if entries_bytes == v2_bytes {
        TableEntryLayout::V2
    } else {
        warn!(
            "table entry count does not match either the v1 or v2 entry layout in segment {}, assuming v1",
            segment_number
        );
        TableEntryLayout::V1
    }
}

// ===== impl EWF =============================================================
impl EWF {
    /// Create a new `EWF` reader from **any** file belonging to the image.
    ///
    /// *Example* – reading from the very first segment:
    /// ```no_run
    /// # use my_crate::EWF;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut ewf = EWF::new("/evidence/disk.E01")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(file_path: &str) -> Result<Self, String> {
        let fp = Path::new(file_path);
        let files = find_files(fp)?;

        let mut ewf = Self::default();

        // Iterate over every segment and merge their structures. No segment
        // is assumed tainted on first parse; a caller that already knows a
        // segment failed an outer integrity check (e.g. a prior corrupted
        // read) can call `parse_segment` directly with `tainted: true`.
        for file in files {
            let fd = File::open(file).map_err(|e| e.to_string())?;
            ewf = ewf.parse_segment(fd, false)?;
        }

        Ok(ewf)
    }
    /// Ref: https://github.com/libyal/libewf/blob/main/documentation/Expert%20Witness%20Compression%20Format%202%20(EWF2).asciidoc
    /// Outputs a human-readable summary to the current `log` subscriber.
    pub fn print_info(&self) {
        info!("EWF File Information:");
        info!("Number of Segments: {}", self.segments.len());

        if !self.header.metadata.is_empty() {
            info!("Acquisition Metadata:");

            // canonical display order
            let order = [
                "c", "cn", "n", "en", "a", "e", "ex", "t", "nt", "av", "ov", "m", "u", "p", "r",
            ];

            /// Map identifier → human-readable label.
            fn pretty(id: &str) -> &str {
                match id {
                    "c" | "cn" => "Case Number",
                    "n" | "en" => "Evidence Number",
                    "a" => "Description",
                    "e" | "ex" => "Examiner",
                    "t" | "nt" => "Notes",
                    "av" => "Application Version",
                    "ov" => "OS Version",
                    "m" => "Acquisition Date",
                    "u" => "System Date",
                    "p" => "Password Hash",
                    "r" => "Reserved",
                    _ => id, // fall back to the caller’s borrow
                }
            }

            // first: well-known keys in a stable order
            for k in order {
                if let Some(v) = self.header.metadata.get(k) {
                    info!("  {}: {}", pretty(k), v);
                }
            }
            // then any non-standard fields
            for (k, v) in &self.header.metadata {
                if !order.contains(&k.as_str()) {
                    info!("  {}: {}", pretty(k), v);
                }
            }
        }
        info!("Volume Information:");
        info!("  Chunk Count: {}", self.volume.chunk_count);
        info!(
            "  Sectors Per Chunk: {} ({} bytes)",
            self.volume.sector_per_chunk,
            self.volume.chunk_size()
        );
        info!("  Bytes Per Sector: {}", self.volume.bytes_per_sector);
        info!("  Total Sector Count: {}", self.volume.total_sector_count);

        info!("Chunk Information:");
        for (segment_number, index) in &self.chunks {
            info!("  Segment Number: {}", segment_number);
            info!("  Number of Chunks: {}", index.len());
            for (descriptor, range) in index.iter() {
                debug!(
                    "    Media Offset: 0x{:x} – Compressed: {} – Data Offset: 0x{:x} – Size: {}",
                    range.media_offset,
                    descriptor.flags.contains(RangeFlags::COMPRESSED),
                    descriptor.file_offset,
                    descriptor.byte_size
                );
            }
        }
    }

    /// Returns the logical sector size declared in the volume section.
    #[inline]
    pub fn get_sector_size(&self) -> u16 {
        self.volume.bytes_per_sector as u16
    }

    // ---------------------------------------------------------------------
    // Internal helpers (parsing & IO glue). Nothing below this point is part
    // of the public API.
    // ---------------------------------------------------------------------

    /// Parse a `table` section's entry array and feed it to the chunk group
    /// subsystem, appending to this segment's [`ChunkIndex`]. Returns where
    /// in that index the new group starts, so a following `table2` section
    /// can reconcile against exactly these entries.
    fn parse_table_section(
        &mut self,
        mut file: &File,
        section: &EwfSectionDescriptor,
        tainted: bool,
    ) -> Result<usize, String> {
        let payload_offset = section.start_offset + 0x4c;

        let mut count_buf = [0u8; 4];
        file.seek(SeekFrom::Start(payload_offset)).unwrap();
        file.read_exact(&mut count_buf).unwrap();
        let number_of_entries = u32::from_le_bytes(count_buf);

        let segment_number = self.ewf_header.segment_number as usize;
        let group_start = self
            .chunks
            .get(&segment_number)
            .map(ChunkIndex::len)
            .unwrap_or(0);

        if number_of_entries == 0 {
            self.chunks.entry(segment_number).or_insert_with(ChunkIndex::new);
            return Ok(group_start);
        }

        let mut base_offset_buf = [0u8; 8];
        file.seek(SeekFrom::Start(payload_offset + 8)).unwrap();
        file.read_exact(&mut base_offset_buf).unwrap();
        let base_offset = u64::from_le_bytes(base_offset_buf);

        let entries_start = payload_offset + TABLE_HEADER_SIZE;
        let layout = classify_table_layout(
            section.section_size,
            number_of_entries,
            self.ewf_header.segment_number,
        );

        let pool_tag = self.ewf_header.segment_number as u32;
        let chunk_size = self.volume.chunk_size() as u64;
        let index = self
            .chunks
            .entry(segment_number)
            .or_insert_with(ChunkIndex::new);

        match layout {
            TableEntryLayout::V1 => {
                let mut entries_data = vec![0u8; number_of_entries as usize * 4];
                file.seek(SeekFrom::Start(entries_start)).unwrap();
                file.read_exact(&mut entries_data).unwrap();

                chunk_group::fill_v1(
                    index,
                    chunk_size,
                    pool_tag,
                    section,
                    base_offset as i64,
                    number_of_entries,
                    &entries_data,
                    tainted,
                )
                .map_err(|e| e.to_string())?;
            }
            TableEntryLayout::V2 => {
                let mut entries_data = vec![0u8; number_of_entries as usize * 16];
                file.seek(SeekFrom::Start(entries_start)).unwrap();
                file.read_exact(&mut entries_data).unwrap();

                chunk_group::fill_v2(
                    index,
                    chunk_size,
                    pool_tag,
                    section,
                    TABLE_HEADER_SIZE,
                    number_of_entries,
                    &entries_data,
                    tainted,
                )
                .map_err(|e| e.to_string())?;
            }
        }

        self.chunk_count += number_of_entries as usize;
        Ok(group_start)
    }

    /// Parse a `table2` (backup) section and reconcile it against the entries
    /// a prior `table` section appended starting at `group_start`.
    fn parse_table2_section(
        &mut self,
        mut file: &File,
        section: &EwfSectionDescriptor,
        group_start: usize,
        tainted: bool,
    ) -> Result<(), String> {
        let payload_offset = section.start_offset + 0x4c;

        let mut count_buf = [0u8; 4];
        file.seek(SeekFrom::Start(payload_offset)).unwrap();
        file.read_exact(&mut count_buf).unwrap();
        let number_of_entries = u32::from_le_bytes(count_buf);

        if number_of_entries == 0 {
            return Ok(());
        }

        let mut base_offset_buf = [0u8; 8];
        file.seek(SeekFrom::Start(payload_offset + 8)).unwrap();
        file.read_exact(&mut base_offset_buf).unwrap();
        let base_offset = u64::from_le_bytes(base_offset_buf);

        let entries_start = payload_offset + TABLE_HEADER_SIZE;
        let layout = classify_table_layout(
            section.section_size,
            number_of_entries,
            self.ewf_header.segment_number,
        );
        if matches!(layout, TableEntryLayout::V2) {
            warn!("ignoring v2-layout table2 backup section: reconciliation is only defined for v1");
            return Ok(());
        }

        let segment_number = self.ewf_header.segment_number as usize;
        let pool_tag = self.ewf_header.segment_number as u32;
        let chunk_size = self.volume.chunk_size() as u64;

        let mut entries_data = vec![0u8; number_of_entries as usize * 4];
        file.seek(SeekFrom::Start(entries_start)).unwrap();
        file.read_exact(&mut entries_data).unwrap();

        let index = self
            .chunks
            .entry(segment_number)
            .or_insert_with(ChunkIndex::new);

        chunk_group::reconcile_v1(
            index,
            chunk_size,
            pool_tag,
            section,
            base_offset as i64,
            number_of_entries,
            &entries_data,
            tainted,
            group_start,
        )
        .map_err(|e| e.to_string())
    }

    /// Fully parse a single *segment* and merge its metadata into `self`.
    ///
    /// `tainted` marks every chunk descriptor this segment contributes as
    /// untrustworthy (§4.8); a later backup-table reconciliation pass is
    /// then the only thing allowed to clear it on a per-entry basis.
    fn parse_segment(mut self, file: File, tainted: bool) -> Result<Self, String> {
        self.ewf_header = EwfHeader::new(&file)?;
        let segment_number = self.ewf_header.segment_number as usize;
        self.first_chunk_number
            .insert(segment_number, self.chunk_count);

        // Position ourselves right *after* the header (13 bytes).
        let mut current_offset = 13u64;
        let ewf_section_descriptor_size = 0x4c;
        let mut last_table_group_start = 0usize;

        loop {
            let section = EwfSectionDescriptor::new(&file, current_offset);
            let section_offset = section.next_section_offset;
            let section_type = section.section_type_def.clone();
            self.sections.push(section);
            let section = self.sections.last().unwrap().clone();

            match section_type.as_str() {
                "header" | "header2" => {
                    let h = EwfHeaderSection::new(
                        &file,
                        current_offset + ewf_section_descriptor_size,
                        &section,
                    )?;
                    if self.header._data.is_empty() {
                        self.header = h;
                    } else {
                        // header2 values overwrite duplicates from header (UTF-16 beats ASCII)
                        self.header.metadata.extend(h.metadata);
                    }
                }
                "disk" | "volume" => {
                    self.volume =
                        EwfVolumeSection::new(&file, current_offset + ewf_section_descriptor_size);
                }
                "table" => {
                    last_table_group_start = self.parse_table_section(&file, &section, tainted)?;
                }
                "table2" => {
                    self.parse_table2_section(&file, &section, last_table_group_start, tainted)?;
                }
                _ => {}
            }

            if current_offset == section_offset || section_type == "done" {
                break;
            }
            current_offset = section_offset;
        }

        self.segments.push(file);
        self.chunks.entry(segment_number).or_insert_with(ChunkIndex::new);
        Ok(self)
    }

    /// Read and *optionally* inflate the `chunk_number` of `segment` (a local
    /// index within that segment's chunk index).
    fn read_chunk(&self, segment: usize, chunk_number: usize) -> Vec<u8> {
        debug!(
            "Reading chunk number {} (segment {})",
            chunk_number, segment
        );

        let index = match self.chunks.get(&segment) {
            Some(index) => index,
            None => {
                error!("No chunk index for segment {}", segment);
                std::process::exit(1);
            }
        };
        let descriptor = match index.get(chunk_number) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!(
                    "Could not read chunk number {} in segment {}: {}",
                    chunk_number, segment, e
                );
                std::process::exit(1);
            }
        };

        let mut file = self.segments[segment - 1].try_clone().unwrap();
        let chunk_size = self.volume.chunk_size();

        if descriptor.flags.contains(RangeFlags::PATTERN_FILL) {
            file.seek(SeekFrom::Start(descriptor.file_offset as u64))
                .unwrap();
            let mut pattern = [0u8; 8];
            file.read_exact(&mut pattern).unwrap();

            let mut data = Vec::with_capacity(chunk_size);
            while data.len() < chunk_size {
                let remaining = chunk_size - data.len();
                data.extend_from_slice(&pattern[..remaining.min(8)]);
            }
            return data;
        }

        file.seek(SeekFrom::Start(descriptor.file_offset as u64))
            .unwrap();

        if !descriptor.flags.contains(RangeFlags::COMPRESSED) {
            let mut data = vec![0u8; chunk_size];
            file.read_exact(&mut data).unwrap();
            return data;
        }

        let mut compressed_data = vec![0u8; descriptor.byte_size as usize];
        file.read_exact(&mut compressed_data).unwrap();

        let mut decoder = ZlibDecoder::new(&compressed_data[..]);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data).unwrap();
        data
    }

    /// Copy `buf.len()` bytes from the image into `buf`, starting at the
    /// *current* offset (tracked by `self.cached_chunk`). Returns the amount of
    /// bytes actually copied (0 on EOF).
    fn ewf_read(&mut self, buf: &mut [u8]) -> usize {
        let mut total_bytes_read = 0;
        let mut remaining = buf.len();

        // Ensure we have something in cache.
        if self.cached_chunk.data.is_empty() {
            self.cached_chunk.data =
                self.read_chunk(self.cached_chunk.segment, self.cached_chunk.number);
        }

        // While there is still room in the caller buffer.
        while remaining > 0 {
            let current_chunk_size = self.volume.chunk_size();
            let available_in_chunk = current_chunk_size - self.cached_chunk.ptr;

            if available_in_chunk >= remaining {
                // Enough data available – just copy and return.
                buf[total_bytes_read..total_bytes_read + remaining].copy_from_slice(
                    &self.cached_chunk.data
                        [self.cached_chunk.ptr..self.cached_chunk.ptr + remaining],
                );
                self.cached_chunk.ptr += remaining;
                total_bytes_read += remaining;
                remaining = 0;
            } else {
                // Drain the rest of the current chunk.
                buf[total_bytes_read..total_bytes_read + available_in_chunk]
                    .copy_from_slice(&self.cached_chunk.data[self.cached_chunk.ptr..]);
                total_bytes_read += available_in_chunk;
                remaining -= available_in_chunk;
                self.cached_chunk.ptr = current_chunk_size; // EOF of chunk.

                let current_segment_len = self
                    .chunks
                    .get(&self.cached_chunk.segment)
                    .map(ChunkIndex::len)
                    .unwrap_or(0);

                // Move to **next** chunk (same segment or the following one).
                if self.cached_chunk.number + 1 < current_segment_len {
                    self.cached_chunk.number += 1;
                    self.cached_chunk.data =
                        self.read_chunk(self.cached_chunk.segment, self.cached_chunk.number);
                    self.cached_chunk.ptr = 0;
                } else if self.cached_chunk.segment < self.segments.len() {
                    self.cached_chunk.segment += 1;
                    self.cached_chunk.number = 0;
                    self.cached_chunk.data =
                        self.read_chunk(self.cached_chunk.segment, self.cached_chunk.number);
                    self.cached_chunk.ptr = 0;
                } else {
                    // No more data.
                    break;
                }
            }
        }
        total_bytes_read
    }

    /// Translate an absolute offset into the appropriate chunk and refresh the
    /// cache so that subsequent reads start from there.
    fn ewf_seek(&mut self, offset: usize) -> io::Result<()> {
        if offset > self.volume.max_offset() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Offset 0x{:x} is beyond image size (0x{:x})",
                    offset,
                    self.volume.max_offset()
                ),
            ));
        }

        let chunk_size = self.volume.chunk_size();
        let chunk_number = offset / chunk_size;
        if chunk_number >= self.volume.chunk_count as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Chunk number exceeds declared chunk_count",
            ));
        }

        // Locate the appropriate segment.
        let mut segment = 1;
        while segment < self.segments.len() {
            let first = *self.first_chunk_number.get(&segment).unwrap_or(&0);
            let count = self.chunks.get(&segment).map(ChunkIndex::len).unwrap_or(0);
            if chunk_number >= first && chunk_number < first + count {
                break;
            }
            segment += 1;
        }

        let first = *self.first_chunk_number.get(&segment).unwrap_or(&0);
        let local_chunk_number = chunk_number - first;

        // Populate cache.
        self.cached_chunk.data = self.read_chunk(segment, local_chunk_number);
        self.cached_chunk.number = local_chunk_number;
        self.cached_chunk.segment = segment;
        self.cached_chunk.ptr = offset % chunk_size;
        self.position = offset as u64;
        Ok(())
    }
}

// ===== Clone impl ===========================================================
impl Clone for EWF {
    fn clone(&self) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|fd| fd.try_clone().expect("failed to duplicate segment FD"))
            .collect();

        Self {
            segments,
            ewf_header: self.ewf_header.clone(),
            sections: self.sections.clone(),
            header: self.header.clone(),
            volume: self.volume.clone(),
            chunks: self.chunks.clone(),
            first_chunk_number: self.first_chunk_number.clone(),
            cached_chunk: self.cached_chunk.clone(),
            chunk_count: self.chunk_count,
            position: self.position,
        }
    }
}

// ===== std::io trait implementations =======================================
impl Read for EWF {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.ewf_read(buf);
        Ok(bytes_read)
    }
}

impl Seek for EWF {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(o) => self.position as i64 + o,
            SeekFrom::End(o) => self.volume.max_offset() as i64 + o,
        };

        if new_offset < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek before start of image",
            ));
        }

        let new_offset_usize = new_offset as usize;
        self.ewf_seek(new_offset_usize)?;
        Ok(new_offset as u64)
    }
}

// ===== helpers ==============================================================
/// Look for every segment belonging to the *same* multi-part image as `path`.
///
/// The function builds a glob pattern **in the parent directory** replacing the
/// numeric suffix with a wild-card (e.g. `image.E01` ⇒ `image.E??`) and returns
/// the sorted list of matching paths.
fn find_files(path: &Path) -> Result<Vec<PathBuf>, String> {
    let path = path
        .canonicalize()
        .map_err(|_| "Invalid path".to_string())?;
    let filename = path.file_name().ok_or("Invalid file name")?;
    let filename_str = filename.to_str().ok_or("Invalid file name")?;

    if filename_str.len() < 2 {
        return Err("File name too short".into());
    }

    let base_filename = &filename_str[..filename_str.len() - 2];
    let parent = path.parent().ok_or("No parent directory")?;

    let mut pattern_path = PathBuf::from(parent);
    pattern_path.push(format!("{}??", base_filename));
    let pattern = pattern_path.to_str().ok_or("Invalid pattern")?.to_string();

    let files = glob::glob(&pattern).map_err(|e| format!("Glob error: {}", e))?;
    let mut paths: Vec<PathBuf> = files.filter_map(Result::ok).collect();
    paths.sort();

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_table_layout_picks_v1_when_entries_match() {
        let layout = classify_table_layout(24 + 4 * 10, 10, 1);
        assert!(matches!(layout, TableEntryLayout::V1));
    }

    #[test]
    fn classify_table_layout_picks_v2_when_entries_match() {
        let layout = classify_table_layout(24 + 16 * 10, 10, 1);
        assert!(matches!(layout, TableEntryLayout::V2));
    }

    #[test]
    fn classify_table_layout_falls_back_to_v1_on_mismatch() {
        let layout = classify_table_layout(24 + 7, 10, 1);
        assert!(matches!(layout, TableEntryLayout::V1));
    }
}
