//! Medium backed by a `gpt_disk_io::BlockIo` device.

use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;
use log::warn;

use super::{ContainerId, PrimitiveFault, PrimitiveIo, PrimitiveStatus, Transfer};
use crate::error::{RofsError, RofsResult};
use crate::format::SECTOR_LEN;

struct Device<B> {
    io: B,
    /// Device blocks per ROFS sector.
    ratio: u64,
    /// First device block of the image (0 for a raw disc).
    base_lba: u64,
    pos: u32,
    transfer: Option<Transfer>,
    staged: Vec<u8>,
}

/// Block devices holding ROFS images.
///
/// Devices with a block size dividing 2048 are accepted; one ROFS sector
/// is read per device call. Progress is limited to `sectors_per_tick`
/// per server call (default 16).
pub struct BlockDeviceMedium<B: BlockIo> {
    devices: Vec<(ContainerId, Device<B>)>,
    next_id: u32,
    sectors_per_tick: u32,
}

impl<B: BlockIo> Default for BlockDeviceMedium<B> {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            next_id: 0,
            sectors_per_tick: 16,
        }
    }
}

impl<B: BlockIo> BlockDeviceMedium<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sectors_per_tick(mut self, n: u32) -> Self {
        self.sectors_per_tick = n.max(1);
        self
    }

    /// Attach a device whose image starts at `base_lba`.
    pub fn attach(&mut self, io: B, base_lba: u64) -> RofsResult<ContainerId> {
        let block_size = io.block_size().to_u32() as usize;
        if block_size == 0 || block_size > SECTOR_LEN || SECTOR_LEN % block_size != 0 {
            return Err(RofsError::InvalidParameter("block size must divide 2048"));
        }
        self.next_id += 1;
        let id = ContainerId(self.next_id);
        self.devices.push((
            id,
            Device {
                io,
                ratio: (SECTOR_LEN / block_size) as u64,
                base_lba,
                pos: 0,
                transfer: None,
                staged: Vec::new(),
            },
        ));
        Ok(id)
    }

    /// Detach a device, handing it back.
    pub fn detach(&mut self, container: ContainerId) -> Option<B> {
        let idx = self.devices.iter().position(|(id, _)| *id == container)?;
        Some(self.devices.remove(idx).1.io)
    }

    fn device(&self, container: ContainerId) -> Result<&Device<B>, PrimitiveFault> {
        self.devices
            .iter()
            .find(|(id, _)| *id == container)
            .map(|(_, d)| d)
            .ok_or(PrimitiveFault::UNKNOWN_CONTAINER)
    }

    fn device_mut(&mut self, container: ContainerId) -> Result<&mut Device<B>, PrimitiveFault> {
        self.devices
            .iter_mut()
            .find(|(id, _)| *id == container)
            .map(|(_, d)| d)
            .ok_or(PrimitiveFault::UNKNOWN_CONTAINER)
    }
}

impl<B: BlockIo + Send> PrimitiveIo for BlockDeviceMedium<B> {
    fn seek(&mut self, container: ContainerId, sector: u32) -> Result<(), PrimitiveFault> {
        let dev = self.device_mut(container)?;
        if dev.transfer.is_some_and(|t| t.is_busy()) {
            return Err(PrimitiveFault::BUSY);
        }
        dev.pos = sector;
        Ok(())
    }

    fn tell(&self, container: ContainerId) -> Result<u32, PrimitiveFault> {
        Ok(self.device(container)?.pos)
    }

    fn request_read(&mut self, container: ContainerId, count: u32) -> Result<(), PrimitiveFault> {
        let dev = self.device_mut(container)?;
        if dev.transfer.is_some_and(|t| t.is_busy()) {
            return Err(PrimitiveFault::BUSY);
        }
        dev.transfer = Some(Transfer::new(dev.pos, count));
        dev.staged.clear();
        Ok(())
    }

    fn status(&self, container: ContainerId) -> PrimitiveStatus {
        match self.device(container) {
            Ok(dev) => dev.transfer.map_or(PrimitiveStatus::Standby, |t| t.status()),
            Err(fault) => PrimitiveStatus::Error(fault.code),
        }
    }

    fn stop(&mut self, container: ContainerId) {
        if let Ok(dev) = self.device_mut(container) {
            if let Some(t) = dev.transfer.take() {
                dev.pos = t.start + t.done;
            }
            dev.staged.clear();
        }
    }

    fn sector_len(&self) -> usize {
        SECTOR_LEN
    }

    fn transferred(&self, container: ContainerId) -> u32 {
        self.device(container)
            .ok()
            .and_then(|dev| dev.transfer)
            .map_or(0, |t| t.done)
    }

    fn drain(&mut self, container: ContainerId, dst: &mut [u8]) -> u32 {
        let Ok(dev) = self.device_mut(container) else {
            return 0;
        };
        let Some(t) = dev.transfer.as_mut() else {
            return 0;
        };
        let n = t.drainable(dst.len(), SECTOR_LEN);
        let from = t.drained as usize * SECTOR_LEN;
        let len = n as usize * SECTOR_LEN;
        dst[..len].copy_from_slice(&dev.staged[from..from + len]);
        t.drained += n;
        n
    }

    fn exec_server(&mut self) {
        let per_tick = self.sectors_per_tick;
        for (id, dev) in self.devices.iter_mut() {
            let Some(t) = dev.transfer.as_mut() else {
                continue;
            };
            if !t.is_busy() {
                continue;
            }
            let target = t.done + (t.count - t.done).min(per_tick);
            while t.done < target {
                let sector = (t.start + t.done) as u64;
                let lba = Lba(dev.base_lba + sector * dev.ratio);
                let offset = dev.staged.len();
                dev.staged.resize(offset + SECTOR_LEN, 0);
                if dev.io.read_blocks(lba, &mut dev.staged[offset..]).is_err() {
                    warn!("container {}: device read failed at lba {}", id.0, lba.0);
                    dev.staged.truncate(offset);
                    t.fault = Some(PrimitiveFault::DEVICE.code);
                    break;
                }
                t.done += 1;
            }
            if t.status() == PrimitiveStatus::Complete {
                dev.pos = t.start + t.count;
            }
        }
    }
}
