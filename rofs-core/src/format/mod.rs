//! On-disk layout of a ROFS image.
//!
//! ```text
//! sector 0..16   system area (ignored)
//! sector 16      volume descriptor
//! sector 17..    directory records, root first
//! ...            file data, each file sector aligned
//! ```
//!
//! All multi-byte integers are little-endian.

pub mod descriptor;
pub mod dirent;

use bitflags::bitflags;

pub use descriptor::VolumeDescriptor;
pub use dirent::{DirEntryView, DirHeaderView};

/// Sector length of the medium.
pub const SECTOR_LEN: usize = 2048;

/// Destination buffers must start on this boundary.
pub const DMA_ALIGN: usize = 64;

/// Sector holding the volume descriptor.
pub const DESCRIPTOR_SECTOR: u32 = 16;

/// Size of the name field in a directory entry.
pub const NAME_FIELD_LEN: usize = 32;

/// Longest significant file name (the field is always null terminated).
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

/// Size of the volume-name field in a directory header.
pub const VOLUME_NAME_FIELD_LEN: usize = 9;

/// Longest volume name.
pub const MAX_VOLUME_NAME_LEN: usize = VOLUME_NAME_FIELD_LEN - 1;

/// Size of the volume identifier in the descriptor.
pub const VOLUME_ID_LEN: usize = 32;

/// Directory record header: count(4) capacity(4) fad(4) volume(9) pad(3).
pub const DIR_HEADER_SIZE: usize = 24;

/// Directory entry: size-lo(4) size-hi(4) fad(4) attr(1) sid(1) name(32) pad(2).
pub const DIRENT_SIZE: usize = 48;

/// "." and ".." lead every on-disk directory record.
pub const PSEUDO_ENTRIES: usize = 2;

bitflags! {
    /// Attribute byte of a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Attributes: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
    }
}

bitflags! {
    /// Format flags stored in the volume descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatFlags: u32 {
        /// Names compare byte-exact instead of ASCII case-insensitive.
        const CASE_SENSITIVE = 0x0001;
        /// At least one entry uses the size-high word.
        const LARGE_FILES = 0x0002;
    }
}

/// Bytes occupied by a directory record holding `n_dirent` entries.
pub const fn dir_record_size(n_dirent: usize) -> usize {
    DIR_HEADER_SIZE + n_dirent * DIRENT_SIZE
}

/// Entry capacity a caller needs to hold `n_files` named entries.
pub const fn dir_capacity_for(n_files: usize) -> usize {
    n_files + PSEUDO_ENTRIES
}

/// Number of sectors needed for `bytes`.
pub fn sectors_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_LEN as u64)
}

/// Copy `name` into a fixed null-padded field, truncating to `field.len() - 1`.
pub(crate) fn write_name_field(field: &mut [u8], name: &str) {
    field.fill(0);
    let limit = field.len() - 1;
    for (dst, src) in field.iter_mut().zip(name.bytes().take(limit)) {
        *dst = src;
    }
}

/// Read a null-terminated name from a fixed field.
/// Returns None if the field has no terminator.
pub(crate) fn read_name_field(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&field[..end]).into_owned())
}
