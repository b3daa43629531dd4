//! Byte views over directory-record headers and entries.
//!
//! Header layout (24 bytes):
//! - Bytes 0-3: Entry count (including "." and "..")
//! - Bytes 4-7: Declared entry capacity
//! - Bytes 8-11: Sector address of this record
//! - Bytes 12-20: Volume name (null-padded)
//! - Bytes 21-23: Padding
//!
//! Entry layout (48 bytes):
//! - Bytes 0-3: File size, low word
//! - Bytes 4-7: File size, high word
//! - Bytes 8-11: Start sector (FAD, signed)
//! - Byte 12: Attributes
//! - Byte 13: Search id
//! - Bytes 14-45: Name (null-padded, at most 31 significant bytes)
//! - Bytes 46-47: Padding

use super::{
    read_name_field, write_name_field, Attributes, DIRENT_SIZE, DIR_HEADER_SIZE, NAME_FIELD_LEN,
    VOLUME_NAME_FIELD_LEN,
};

const NAME_OFFSET: usize = 14;
const VOLUME_NAME_OFFSET: usize = 12;

fn u32_at(mem: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([mem[offset], mem[offset + 1], mem[offset + 2], mem[offset + 3]])
}

/// Read-only view of a directory-record header.
pub struct DirHeaderView<'a> {
    mem: &'a [u8],
}

impl<'a> DirHeaderView<'a> {
    /// Create a view (memory must be at least 24 bytes).
    pub fn new(memory: &'a [u8]) -> Self {
        debug_assert!(memory.len() >= DIR_HEADER_SIZE);
        Self { mem: memory }
    }

    pub fn count(&self) -> u32 {
        u32_at(self.mem, 0)
    }

    pub fn capacity(&self) -> u32 {
        u32_at(self.mem, 4)
    }

    pub fn fad(&self) -> u32 {
        u32_at(self.mem, 8)
    }

    /// Volume name, or None if the field is not terminated.
    pub fn volume_name(&self) -> Option<String> {
        read_name_field(&self.mem[VOLUME_NAME_OFFSET..VOLUME_NAME_OFFSET + VOLUME_NAME_FIELD_LEN])
    }
}

/// Write a directory-record header into `mem`.
pub fn write_header(mem: &mut [u8], count: u32, capacity: u32, fad: u32, volume_name: &str) {
    mem[..DIR_HEADER_SIZE].fill(0);
    mem[0..4].copy_from_slice(&count.to_le_bytes());
    mem[4..8].copy_from_slice(&capacity.to_le_bytes());
    mem[8..12].copy_from_slice(&fad.to_le_bytes());
    write_name_field(
        &mut mem[VOLUME_NAME_OFFSET..VOLUME_NAME_OFFSET + VOLUME_NAME_FIELD_LEN],
        volume_name,
    );
}

/// Read-only view of one directory entry.
pub struct DirEntryView<'a> {
    mem: &'a [u8],
}

impl<'a> DirEntryView<'a> {
    /// Create a view (memory must be at least 48 bytes).
    pub fn new(memory: &'a [u8]) -> Self {
        debug_assert!(memory.len() >= DIRENT_SIZE);
        Self { mem: memory }
    }

    pub fn size_low(&self) -> u32 {
        u32_at(self.mem, 0)
    }

    pub fn size_high(&self) -> u32 {
        u32_at(self.mem, 4)
    }

    /// Full 64-bit size.
    pub fn size(&self) -> u64 {
        (self.size_high() as u64) << 32 | self.size_low() as u64
    }

    /// Start sector. Negative values never address valid data.
    pub fn fad(&self) -> i32 {
        u32_at(self.mem, 8) as i32
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.mem[12])
    }

    pub fn search_id(&self) -> u8 {
        self.mem[13]
    }

    pub fn raw_name(&self) -> &[u8] {
        &self.mem[NAME_OFFSET..NAME_OFFSET + NAME_FIELD_LEN]
    }

    /// Name, or None if the field is not null terminated.
    pub fn name(&self) -> Option<String> {
        read_name_field(self.raw_name())
    }
}

/// Fields of an entry as written by the image builder.
pub struct RawEntry<'a> {
    pub size: u64,
    pub fad: u32,
    pub attributes: Attributes,
    pub search_id: u8,
    pub name: &'a str,
}

/// Write one entry into `mem` (at least 48 bytes).
pub fn write_entry(mem: &mut [u8], entry: &RawEntry<'_>) {
    mem[..DIRENT_SIZE].fill(0);
    mem[0..4].copy_from_slice(&(entry.size as u32).to_le_bytes());
    mem[4..8].copy_from_slice(&((entry.size >> 32) as u32).to_le_bytes());
    mem[8..12].copy_from_slice(&entry.fad.to_le_bytes());
    mem[12] = entry.attributes.bits();
    mem[13] = entry.search_id;
    write_name_field(&mut mem[NAME_OFFSET..NAME_OFFSET + NAME_FIELD_LEN], entry.name);
}
