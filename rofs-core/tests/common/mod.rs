//! Common test utilities: hand-built images and a mock block device

#![allow(dead_code)]

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};
use rofs_core::format::dirent::{write_entry, write_header, RawEntry};
use rofs_core::format::VolumeDescriptor;
use rofs_core::{
    Attributes, ContainerId, FormatFlags, HandleId, HandleStatus, MemoryMedium, Rofs, RofsConfig,
    SECTOR_LEN,
};
use std::io;

pub const TRACK01_SIZE: u64 = 100_000;
pub const TRACK01_SECTOR: u32 = 16;
pub const ROOT_SECTOR: u32 = 17;

/// Disc with a 10-entry root: ".", "..", TRACK01 (100,000 bytes at
/// sector 16) and TRACK02..TRACK08 (one sector each).
///
/// Every sector from 18 on is filled with its own number so reads can be
/// checked by position.
pub fn track_disc() -> Vec<u8> {
    let tracks = 8;
    let first_free = TRACK01_SECTOR + 49;
    let total = first_free + tracks - 1;
    let mut data = vec![0u8; total as usize * SECTOR_LEN];

    for sector in 18..total {
        let at = sector as usize * SECTOR_LEN;
        data[at..at + SECTOR_LEN].fill(sector as u8);
    }

    let count = 2 + tracks;
    let mut volume_id = [b' '; 32];
    volume_id[..10].copy_from_slice(b"TRACK TEST");
    let record_size = 24 + count as usize * 48;
    VolumeDescriptor {
        flags: FormatFlags::empty(),
        ptbl_sector: ROOT_SECTOR,
        ptbl_size: record_size as u32,
        volume_sectors: total,
        volume_id,
    }
    .write(&mut data[16 * SECTOR_LEN..]);

    let root = &mut data[ROOT_SECTOR as usize * SECTOR_LEN..];
    write_header(root, count, count, ROOT_SECTOR, "DATA");
    let names: Vec<String> = (1..=tracks).map(|i| format!("TRACK{:02}", i)).collect();
    let mut entries = vec![
        RawEntry {
            size: record_size as u64,
            fad: ROOT_SECTOR,
            attributes: Attributes::DIRECTORY,
            search_id: 0,
            name: ".",
        },
        RawEntry {
            size: record_size as u64,
            fad: ROOT_SECTOR,
            attributes: Attributes::DIRECTORY,
            search_id: 1,
            name: "..",
        },
    ];
    for (i, name) in names.iter().enumerate() {
        let (size, fad) = if i == 0 {
            (TRACK01_SIZE, TRACK01_SECTOR)
        } else {
            (SECTOR_LEN as u64, first_free + i as u32 - 1)
        };
        entries.push(RawEntry {
            size,
            fad,
            attributes: Attributes::empty(),
            search_id: (i + 2) as u8,
            name: name.as_str(),
        });
    }
    for (i, entry) in entries.iter().enumerate() {
        write_entry(&mut root[24 + i * 48..], entry);
    }
    data
}

/// Work area with one memory medium holding `images`.
pub fn rofs_with(config: RofsConfig, medium: MemoryMedium) -> Rofs {
    let mut rofs = Rofs::init(config).expect("init");
    rofs.register_primitive(Box::new(medium)).expect("register");
    rofs
}

/// Mount the track disc as "DATA" on an unthrottled medium.
pub fn mounted_track_disc() -> (Rofs, ContainerId) {
    let mut medium = MemoryMedium::new();
    let disc = medium.insert(track_disc());
    let mut rofs = rofs_with(RofsConfig::default(), medium);
    rofs.add_volume("DATA", disc).expect("mount");
    (rofs, disc)
}

/// Tick until the handle leaves the busy states.
pub fn run_until_idle(rofs: &mut Rofs, h: HandleId) -> HandleStatus {
    for _ in 0..1000 {
        let status = rofs.status(h).expect("status");
        if !status.is_busy() {
            return status;
        }
        rofs.exec_server();
    }
    rofs.status(h).expect("status")
}

/// In-memory block device for testing
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    pub data: Vec<u8>,
    pub block_size: usize,
    /// Reads touching this block fail.
    pub bad_block: Option<u64>,
}

impl MemoryBlockDevice {
    pub fn new(data: Vec<u8>, block_size: usize) -> Self {
        Self {
            data,
            block_size,
            bad_block: None,
        }
    }
}

impl BlockIo for MemoryBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(self.block_size as u32).expect("valid block size")
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok((self.data.len() / self.block_size) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        let blocks = (dst.len() / self.block_size) as u64;
        if let Some(bad) = self.bad_block {
            if (start_lba.0..start_lba.0 + blocks).contains(&bad) {
                return Err(io::Error::other("bad block"));
            }
        }
        let offset = start_lba.0 as usize * self.block_size;
        if offset + dst.len() > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read beyond end of device",
            ));
        }
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only device",
        ))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
