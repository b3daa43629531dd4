//! In-memory medium.

use std::collections::HashMap;

use super::{ContainerId, PrimitiveFault, PrimitiveIo, PrimitiveStatus, Transfer};
use crate::format::SECTOR_LEN;

struct Image {
    data: Vec<u8>,
    pos: u32,
    transfer: Option<Transfer>,
    /// Bad sector and the code it fails with.
    bad_sector: Option<(u32, i32)>,
}

impl Image {
    fn sectors(&self) -> u32 {
        self.data.len().div_ceil(SECTOR_LEN) as u32
    }
}

/// Disc images held in memory.
///
/// Transfers complete inside `exec_server`, at most `sectors_per_tick`
/// sectors per call when throttled. A trailing partial sector reads as
/// zero-padded.
#[derive(Default)]
pub struct MemoryMedium {
    images: HashMap<ContainerId, Image>,
    next_id: u32,
    sectors_per_tick: Option<u32>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit progress to `n` sectors per server call. Zero stalls every
    /// transfer.
    pub fn with_sectors_per_tick(mut self, n: u32) -> Self {
        self.sectors_per_tick = Some(n);
        self
    }

    /// Open an image, returning its container handle.
    pub fn insert(&mut self, data: impl Into<Vec<u8>>) -> ContainerId {
        self.next_id += 1;
        let id = ContainerId(self.next_id);
        self.images.insert(
            id,
            Image {
                data: data.into(),
                pos: 0,
                transfer: None,
                bad_sector: None,
            },
        );
        id
    }

    /// Close an image. Returns its data if it existed.
    pub fn remove(&mut self, container: ContainerId) -> Option<Vec<u8>> {
        self.images.remove(&container).map(|image| image.data)
    }

    /// Mark `sector` unreadable: the first transfer that reaches it stops
    /// there and fails with `code`.
    pub fn inject_fault(&mut self, container: ContainerId, sector: u32, code: i32) {
        if let Some(image) = self.images.get_mut(&container) {
            image.bad_sector = Some((sector, code));
        }
    }

    fn image(&self, container: ContainerId) -> Result<&Image, PrimitiveFault> {
        self.images
            .get(&container)
            .ok_or(PrimitiveFault::UNKNOWN_CONTAINER)
    }

    fn image_mut(&mut self, container: ContainerId) -> Result<&mut Image, PrimitiveFault> {
        self.images
            .get_mut(&container)
            .ok_or(PrimitiveFault::UNKNOWN_CONTAINER)
    }
}

impl PrimitiveIo for MemoryMedium {
    fn seek(&mut self, container: ContainerId, sector: u32) -> Result<(), PrimitiveFault> {
        let image = self.image_mut(container)?;
        if image.transfer.is_some_and(|t| t.is_busy()) {
            return Err(PrimitiveFault::BUSY);
        }
        image.pos = sector;
        Ok(())
    }

    fn tell(&self, container: ContainerId) -> Result<u32, PrimitiveFault> {
        Ok(self.image(container)?.pos)
    }

    fn request_read(&mut self, container: ContainerId, count: u32) -> Result<(), PrimitiveFault> {
        let image = self.image_mut(container)?;
        if image.transfer.is_some_and(|t| t.is_busy()) {
            return Err(PrimitiveFault::BUSY);
        }
        image.transfer = Some(Transfer::new(image.pos, count));
        Ok(())
    }

    fn status(&self, container: ContainerId) -> PrimitiveStatus {
        match self.images.get(&container) {
            Some(image) => image
                .transfer
                .map_or(PrimitiveStatus::Standby, |t| t.status()),
            None => PrimitiveStatus::Error(PrimitiveFault::UNKNOWN_CONTAINER.code),
        }
    }

    fn stop(&mut self, container: ContainerId) {
        if let Some(image) = self.images.get_mut(&container) {
            if let Some(t) = image.transfer.take() {
                image.pos = t.start + t.done;
            }
        }
    }

    fn sector_len(&self) -> usize {
        SECTOR_LEN
    }

    fn transferred(&self, container: ContainerId) -> u32 {
        self.images
            .get(&container)
            .and_then(|image| image.transfer)
            .map_or(0, |t| t.done)
    }

    fn drain(&mut self, container: ContainerId, dst: &mut [u8]) -> u32 {
        let Some(image) = self.images.get_mut(&container) else {
            return 0;
        };
        let Some(t) = image.transfer.as_mut() else {
            return 0;
        };
        let n = t.drainable(dst.len(), SECTOR_LEN);
        for i in 0..n as usize {
            let sector = (t.start + t.drained) as usize + i;
            let out = &mut dst[i * SECTOR_LEN..(i + 1) * SECTOR_LEN];
            let begin = (sector * SECTOR_LEN).min(image.data.len());
            let end = (begin + SECTOR_LEN).min(image.data.len());
            let len = end - begin;
            out[..len].copy_from_slice(&image.data[begin..end]);
            out[len..].fill(0);
        }
        t.drained += n;
        n
    }

    fn exec_server(&mut self) {
        let per_tick = self.sectors_per_tick.unwrap_or(u32::MAX);
        for image in self.images.values_mut() {
            let total = image.sectors();
            let Some(t) = image.transfer.as_mut() else {
                continue;
            };
            if !t.is_busy() {
                continue;
            }
            if t.start as u64 + t.count as u64 > total as u64 {
                t.fault = Some(PrimitiveFault::OUT_OF_RANGE.code);
                continue;
            }
            let step = (t.count - t.done).min(per_tick);
            let next = t.start + t.done;
            if let Some((sector, code)) = image.bad_sector {
                if sector >= next && sector - next < step {
                    image.bad_sector = None;
                    t.done = sector - t.start;
                    t.fault = Some(code);
                    continue;
                }
            }
            t.done += step;
            if t.done == t.count {
                image.pos = t.start + t.count;
            }
        }
    }
}
