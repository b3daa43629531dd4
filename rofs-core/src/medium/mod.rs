//! Primitive I/O layer.
//!
//! The filesystem never touches a medium directly. It dispatches through
//! [`PrimitiveIo`], implemented once per backing medium:
//! - `MemoryMedium`: images held in memory (tests, tools, preloaded discs)
//! - `BlockDeviceMedium`: any `gpt_disk_io::BlockIo` device

mod block;
mod memory;

pub use block::BlockDeviceMedium;
pub use memory::MemoryMedium;

use thiserror::Error;

use crate::error::RofsError;

/// Opaque handle of an already-open container (disc image, device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u32);

/// Status of the transfer in flight on one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveStatus {
    /// No transfer.
    Standby,
    Busy,
    Complete,
    /// Transfer ended with a medium-specific code.
    Error(i32),
}

/// Fault reported synchronously by a primitive call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("primitive fault {code}")]
pub struct PrimitiveFault {
    pub code: i32,
}

impl PrimitiveFault {
    pub const UNKNOWN_CONTAINER: Self = Self { code: 1 };
    pub const OUT_OF_RANGE: Self = Self { code: 2 };
    pub const BUSY: Self = Self { code: 3 };
    pub const DEVICE: Self = Self { code: 4 };
}

impl From<PrimitiveFault> for RofsError {
    fn from(fault: PrimitiveFault) -> Self {
        if fault == PrimitiveFault::BUSY {
            RofsError::Busy
        } else {
            RofsError::Primitive(fault.code)
        }
    }
}

/// Low-level block operations injected by the host.
///
/// One transfer may be in flight per container. Transfers advance only
/// inside [`exec_server`](Self::exec_server); nothing here blocks.
pub trait PrimitiveIo: Send {
    /// Move the read position of `container` to `sector`.
    fn seek(&mut self, container: ContainerId, sector: u32) -> Result<(), PrimitiveFault>;

    /// Current read position.
    fn tell(&self, container: ContainerId) -> Result<u32, PrimitiveFault>;

    /// Start reading `count` sectors from the current position.
    fn request_read(&mut self, container: ContainerId, count: u32) -> Result<(), PrimitiveFault>;

    /// Status of the current transfer.
    fn status(&self, container: ContainerId) -> PrimitiveStatus;

    /// Abort the current transfer. The position stays after the last
    /// sector that completed.
    fn stop(&mut self, container: ContainerId);

    /// Sector length of the medium.
    fn sector_len(&self) -> usize;

    /// Sectors completed in the current transfer.
    fn transferred(&self, container: ContainerId) -> u32;

    /// Copy sectors completed since the previous call into `dst`.
    /// Returns the number of whole sectors copied.
    fn drain(&mut self, container: ContainerId, dst: &mut [u8]) -> u32;

    /// Periodic server: advance every transfer in flight.
    fn exec_server(&mut self);
}

/// Bookkeeping shared by the bundled media.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Transfer {
    pub start: u32,
    pub count: u32,
    /// Sectors read from the medium.
    pub done: u32,
    /// Sectors handed out through `drain`.
    pub drained: u32,
    pub fault: Option<i32>,
}

impl Transfer {
    pub fn new(start: u32, count: u32) -> Self {
        Self {
            start,
            count,
            ..Self::default()
        }
    }

    pub fn status(&self) -> PrimitiveStatus {
        match self.fault {
            Some(code) => PrimitiveStatus::Error(code),
            None if self.done >= self.count => PrimitiveStatus::Complete,
            None => PrimitiveStatus::Busy,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.status() == PrimitiveStatus::Busy
    }

    /// Sectors ready but not yet drained, capped by what fits in `dst_len`.
    pub fn drainable(&self, dst_len: usize, sector_len: usize) -> u32 {
        let ready = self.done - self.drained;
        ready.min((dst_len / sector_len) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_status() {
        let mut t = Transfer::new(10, 2);
        assert_eq!(t.status(), PrimitiveStatus::Busy);
        t.done = 2;
        assert_eq!(t.status(), PrimitiveStatus::Complete);
        t.fault = Some(9);
        assert_eq!(t.status(), PrimitiveStatus::Error(9));
    }

    #[test]
    fn test_empty_transfer_is_complete() {
        assert_eq!(Transfer::new(0, 0).status(), PrimitiveStatus::Complete);
    }

    #[test]
    fn test_fault_mapping() {
        assert_eq!(RofsError::from(PrimitiveFault::BUSY), RofsError::Busy);
        assert_eq!(
            RofsError::from(PrimitiveFault::DEVICE),
            RofsError::Primitive(4)
        );
    }
}
