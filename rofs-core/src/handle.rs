//! Handle pool.
//!
//! Handles live in a fixed arena sized at init. A [`HandleId`] names a
//! slot plus the generation it was issued under, so an id goes stale
//! the moment its slot is released.

use std::fmt;

use crate::buffer::SectorBuffer;
use crate::error::{RofsError, RofsResult};
use crate::format::SECTOR_LEN;

/// Stable id of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    slot: u16,
    generation: u16,
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Lifecycle state of a handle's transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Idle,
    /// Accepted, waiting for the volume's container to be free.
    RequestPending,
    Transferring,
    Complete,
    Error,
}

impl HandleStatus {
    pub fn is_busy(self) -> bool {
        matches!(self, Self::RequestPending | Self::Transferring)
    }
}

/// Origin for [`Rofs::seek`](crate::Rofs::seek).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Set,
    FromCurrent,
    FromEnd,
}

#[derive(Debug)]
pub(crate) struct Handle {
    pub used: bool,
    pub generation: u16,
    pub stat: HandleStatus,
    pub err: Option<RofsError>,
    /// Volume slot.
    pub volume: usize,
    pub fsize: u64,
    /// Absolute start sector on the medium.
    pub start: u32,
    /// Sectors spanned by the file.
    pub span: u32,
    /// Sector position relative to `start`.
    pub cursor: u32,
    pub buffer: Option<SectorBuffer>,
    /// Cursor when the current request was accepted.
    pub req_start: u32,
    /// Sectors accepted for the current request.
    pub req_sct: u32,
    /// Sectors delivered into the buffer so far.
    pub trans_sct: u32,
    /// `trans_sct` value once the primitive request in flight completes.
    pub chunk_end: u32,
    /// Largest primitive request.
    pub unit: u32,
}

impl Handle {
    fn vacant() -> Self {
        Self {
            used: false,
            generation: 0,
            stat: HandleStatus::Idle,
            err: None,
            volume: 0,
            fsize: 0,
            start: 0,
            span: 0,
            cursor: 0,
            buffer: None,
            req_start: 0,
            req_sct: 0,
            trans_sct: 0,
            chunk_end: 0,
            unit: 1,
        }
    }

    /// Byte offset of the file on the medium.
    pub fn start_byte(&self) -> u64 {
        self.start as u64 * SECTOR_LEN as u64
    }

    /// Bytes of file data delivered by the current request.
    pub fn transferred_bytes(&self) -> u64 {
        let delivered = self.trans_sct as u64 * SECTOR_LEN as u64;
        let left = self
            .fsize
            .saturating_sub(self.req_start as u64 * SECTOR_LEN as u64);
        delivered.min(left)
    }

    /// Prepare the reserved slot for a synchronous load of `count`
    /// sectors from `sector`.
    pub fn begin_sync(&mut self, sector: u32, count: u32) {
        self.start = sector;
        self.span = count;
        self.cursor = 0;
        self.err = None;
        self.stat = if count == 0 {
            HandleStatus::Complete
        } else {
            HandleStatus::Transferring
        };
    }

    /// Back to idle, keeping position and buffer.
    pub fn reset_transfer(&mut self) {
        self.stat = HandleStatus::Idle;
        self.err = None;
        self.req_sct = 0;
        self.trans_sct = 0;
        self.chunk_end = 0;
    }
}

/// Geometry of a handle being opened.
pub(crate) struct Extent {
    pub volume: usize,
    pub start: u32,
    pub span: u32,
    pub fsize: u64,
}

/// Fixed-size arena of handles. The slot past the user slots is
/// reserved for synchronous loads.
pub(crate) struct HandlePool {
    slots: Vec<Handle>,
    user_slots: usize,
}

impl HandlePool {
    pub fn new(max_open: usize) -> Self {
        Self {
            slots: (0..=max_open).map(|_| Handle::vacant()).collect(),
            user_slots: max_open,
        }
    }

    pub fn allocate(&mut self, extent: Extent, unit: u32) -> RofsResult<HandleId> {
        let slot = self.slots[..self.user_slots]
            .iter()
            .position(|h| !h.used)
            .ok_or(RofsError::NoHandleAvailable)?;
        let generation = self.slots[slot].generation;
        let h = &mut self.slots[slot];
        *h = Handle::vacant();
        h.used = true;
        h.generation = generation;
        h.volume = extent.volume;
        h.start = extent.start;
        h.span = extent.span;
        h.fsize = extent.fsize;
        h.unit = unit;
        Ok(HandleId {
            slot: slot as u16,
            generation,
        })
    }

    /// Free a slot, returning whatever buffer it still held.
    pub fn release(&mut self, id: HandleId) -> RofsResult<Option<SectorBuffer>> {
        let h = self.get_mut(id)?;
        let buffer = h.buffer.take();
        let generation = h.generation.wrapping_add(1);
        *h = Handle::vacant();
        h.generation = generation;
        Ok(buffer)
    }

    pub fn get(&self, id: HandleId) -> RofsResult<&Handle> {
        match self.slots[..self.user_slots].get(id.slot as usize) {
            Some(h) if h.used && h.generation == id.generation => Ok(h),
            _ => Err(RofsError::InvalidHandle),
        }
    }

    pub fn get_mut(&mut self, id: HandleId) -> RofsResult<&mut Handle> {
        match self.slots[..self.user_slots].get_mut(id.slot as usize) {
            Some(h) if h.used && h.generation == id.generation => Ok(h),
            _ => Err(RofsError::InvalidHandle),
        }
    }

    /// Id currently issued for a used user slot.
    pub fn id_of(&self, slot: usize) -> Option<HandleId> {
        self.slots[..self.user_slots]
            .get(slot)
            .filter(|h| h.used)
            .map(|h| HandleId {
                slot: slot as u16,
                generation: h.generation,
            })
    }

    pub fn user_slots(&self) -> usize {
        self.user_slots
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut Handle {
        &mut self.slots[slot]
    }

    pub fn reserved_mut(&mut self) -> &mut Handle {
        &mut self.slots[self.user_slots]
    }

    pub fn open_count(&self) -> usize {
        self.slots[..self.user_slots].iter().filter(|h| h.used).count()
    }

    pub fn clear(&mut self) {
        for h in self.slots.iter_mut() {
            let generation = h.generation.wrapping_add(1);
            *h = Handle::vacant();
            h.generation = generation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent() -> Extent {
        Extent {
            volume: 0,
            start: 16,
            span: 49,
            fsize: 100_000,
        }
    }

    #[test]
    fn test_pool_exhaustion_and_reuse() {
        let mut pool = HandlePool::new(2);
        let a = pool.allocate(extent(), 32).unwrap();
        let _b = pool.allocate(extent(), 32).unwrap();
        assert_eq!(
            pool.allocate(extent(), 32).unwrap_err(),
            RofsError::NoHandleAvailable
        );

        pool.release(a).unwrap();
        assert!(pool.allocate(extent(), 32).is_ok());
        assert_eq!(
            pool.allocate(extent(), 32).unwrap_err(),
            RofsError::NoHandleAvailable
        );
    }

    #[test]
    fn test_stale_id_is_invalid() {
        let mut pool = HandlePool::new(1);
        let a = pool.allocate(extent(), 32).unwrap();
        pool.release(a).unwrap();
        assert_eq!(pool.release(a).unwrap_err(), RofsError::InvalidHandle);

        let b = pool.allocate(extent(), 32).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.get(a).unwrap_err(), RofsError::InvalidHandle);
        assert!(pool.get(b).is_ok());
    }

    #[test]
    fn test_reserved_slot_is_not_allocated() {
        let mut pool = HandlePool::new(1);
        pool.allocate(extent(), 32).unwrap();
        assert_eq!(pool.open_count(), 1);
        assert!(!pool.reserved_mut().used);
    }

    #[test]
    fn test_transferred_bytes_clamps_to_file_end() {
        let mut pool = HandlePool::new(1);
        let id = pool.allocate(extent(), 32).unwrap();
        let h = pool.get_mut(id).unwrap();
        h.req_start = 48;
        h.trans_sct = 1;
        // 100_000 - 48 * 2048 = 1696 bytes left in the last sector.
        assert_eq!(h.transferred_bytes(), 1696);
        assert_eq!(h.start_byte(), 16 * 2048);
    }
}
