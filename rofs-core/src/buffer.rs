//! DMA-aligned destination buffers.

use std::fmt;

use crate::format::{DMA_ALIGN, SECTOR_LEN};

/// Heap buffer whose first byte sits on a 64-byte boundary.
///
/// A buffer is handed to [`Rofs::request_read`](crate::Rofs::request_read)
/// and stays with the work area until the caller takes it back with
/// [`Rofs::take_buffer`](crate::Rofs::take_buffer).
pub struct SectorBuffer {
    raw: Vec<u8>,
    offset: usize,
    len: usize,
}

impl SectorBuffer {
    /// Zeroed buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        let raw = vec![0u8; len + DMA_ALIGN - 1];
        let addr = raw.as_ptr() as usize;
        let offset = (DMA_ALIGN - addr % DMA_ALIGN) % DMA_ALIGN;
        Self { raw, offset, len }
    }

    /// Zeroed buffer holding `count` whole sectors.
    pub fn with_sectors(count: usize) -> Self {
        Self::new(count * SECTOR_LEN)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whole sectors that fit.
    pub fn sectors(&self) -> usize {
        self.len / SECTOR_LEN
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.raw[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.raw[self.offset..self.offset + self.len]
    }

    /// Copy out the first `len` bytes.
    pub fn to_vec(&self, len: usize) -> Vec<u8> {
        self.as_slice()[..len.min(self.len)].to_vec()
    }

    pub fn is_aligned(&self) -> bool {
        self.as_slice().as_ptr() as usize % DMA_ALIGN == 0
    }
}

impl fmt::Debug for SectorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectorBuffer")
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        for len in [0, 1, 63, 2048, 5000] {
            let buf = SectorBuffer::new(len);
            assert!(buf.is_aligned());
            assert_eq!(buf.len(), len);
        }
    }

    #[test]
    fn test_with_sectors() {
        let mut buf = SectorBuffer::with_sectors(3);
        assert_eq!(buf.sectors(), 3);
        buf.as_mut_slice()[SECTOR_LEN] = 7;
        assert_eq!(buf.as_slice()[SECTOR_LEN], 7);
        assert_eq!(buf.to_vec(2).len(), 2);
    }
}
