//! Volume descriptor (sector 16).
//!
//! - Bytes 0-7: Magic "ROFSVOL1"
//! - Bytes 8-11: Format flags
//! - Bytes 12-15: Path table sector (the root directory record)
//! - Bytes 16-19: Path table size in bytes
//! - Bytes 20-23: Volume size in sectors
//! - Bytes 24-55: Volume identifier (space or null padded)

use super::{FormatFlags, VOLUME_ID_LEN};

/// Parsed volume descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub flags: FormatFlags,
    pub ptbl_sector: u32,
    pub ptbl_size: u32,
    pub volume_sectors: u32,
    pub volume_id: [u8; VOLUME_ID_LEN],
}

impl VolumeDescriptor {
    pub const MAGIC: &'static [u8; 8] = b"ROFSVOL1";

    /// Encoded length.
    pub const LEN: usize = 24 + VOLUME_ID_LEN;

    /// Parse a descriptor sector. Returns None on a bad signature.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if sector.len() < Self::LEN || &sector[0..8] != Self::MAGIC {
            return None;
        }
        let word = |offset: usize| {
            u32::from_le_bytes([
                sector[offset],
                sector[offset + 1],
                sector[offset + 2],
                sector[offset + 3],
            ])
        };
        let mut volume_id = [0u8; VOLUME_ID_LEN];
        volume_id.copy_from_slice(&sector[24..Self::LEN]);
        Some(Self {
            flags: FormatFlags::from_bits_truncate(word(8)),
            ptbl_sector: word(12),
            ptbl_size: word(16),
            volume_sectors: word(20),
            volume_id,
        })
    }

    /// Encode into the start of `sector`.
    pub fn write(&self, sector: &mut [u8]) {
        sector[..Self::LEN].fill(0);
        sector[0..8].copy_from_slice(Self::MAGIC);
        sector[8..12].copy_from_slice(&self.flags.bits().to_le_bytes());
        sector[12..16].copy_from_slice(&self.ptbl_sector.to_le_bytes());
        sector[16..20].copy_from_slice(&self.ptbl_size.to_le_bytes());
        sector[20..24].copy_from_slice(&self.volume_sectors.to_le_bytes());
        sector[24..Self::LEN].copy_from_slice(&self.volume_id);
    }

    /// Volume identifier with trailing spaces and nulls removed.
    pub fn volume_id_str(&self) -> String {
        let end = self
            .volume_id
            .iter()
            .rposition(|&b| b != 0 && b != b' ')
            .map_or(0, |p| p + 1);
        String::from_utf8_lossy(&self.volume_id[..end]).into_owned()
    }
}
