//! Handles and the transfer state machine.
//!
//! A read moves through `Idle -> RequestPending -> Transferring ->
//! Complete`. Only one primitive request may be in flight per container,
//! so a request that finds its container busy waits in `RequestPending`
//! until a later [`Rofs::exec_server`] call dispatches it. Long requests
//! are split into primitive requests of at most `transfer_unit` sectors.

use log::{debug, trace};

use super::Rofs;
use crate::buffer::SectorBuffer;
use crate::dir::DirRecord;
use crate::error::{RofsError, RofsResult};
use crate::format::SECTOR_LEN;
use crate::handle::{Extent, Handle, HandleId, HandleStatus, SeekMode};
use crate::medium::{PrimitiveIo, PrimitiveStatus};
use crate::volume::VolumeRegistry;

impl Rofs {
    /// Open the file named by `path`, relative to `dir` when given.
    pub fn open(&mut self, path: &str, dir: Option<&DirRecord>) -> RofsResult<HandleId> {
        let result = self.open_inner(path, dir);
        self.diag.track("open", result)
    }

    fn open_inner(&mut self, path: &str, dir: Option<&DirRecord>) -> RofsResult<HandleId> {
        self.ready()?;
        let resolved = self.resolve(path, dir)?;
        if resolved.entry.is_directory() {
            return Err(RofsError::NotAFile(path.to_string()));
        }
        let start = resolved.start()?;
        let span = u32::try_from(resolved.entry.sectors()).map_err(|_| RofsError::OpenFailed)?;
        start.checked_add(span).ok_or(RofsError::OpenFailed)?;

        let volume = self.volumes.get_mut(resolved.volume)?;
        let id = self.handles.allocate(
            Extent {
                volume: resolved.volume,
                start,
                span,
                fsize: resolved.entry.size,
            },
            self.config.transfer_unit,
        )?;
        volume.open_handles += 1;
        debug!(
            "open {} -> {} (sector {}, {} bytes)",
            path, id, start, resolved.entry.size
        );
        Ok(id)
    }

    /// Open a raw run of `count` sectors from `start` on `volume` (the
    /// default volume when `None`).
    pub fn open_range(&mut self, volume: Option<&str>, start: u32, count: u32) -> RofsResult<HandleId> {
        let result = self.open_range_inner(volume, start, count);
        self.diag.track("open_range", result)
    }

    fn open_range_inner(&mut self, volume: Option<&str>, start: u32, count: u32) -> RofsResult<HandleId> {
        self.ready()?;
        start
            .checked_add(count)
            .ok_or(RofsError::InvalidParameter("sector range overflows"))?;
        let slot = match volume {
            Some(name) => self.volumes.lookup(name)?,
            None => self.volumes.default_slot()?,
        };
        let vol = self.volumes.get_mut(slot)?;
        let id = self.handles.allocate(
            Extent {
                volume: slot,
                start,
                span: count,
                fsize: count as u64 * SECTOR_LEN as u64,
            },
            self.config.transfer_unit,
        )?;
        vol.open_handles += 1;
        debug!("open_range {}:{}+{} -> {}", vol.name, start, count, id);
        Ok(id)
    }

    /// Release a handle, returning the buffer it still held.
    ///
    /// Fails with [`RofsError::Busy`] while a request is pending or in
    /// flight; stop it first.
    pub fn close(&mut self, id: HandleId) -> RofsResult<Option<SectorBuffer>> {
        let result = self.close_inner(id);
        self.diag.track("close", result)
    }

    fn close_inner(&mut self, id: HandleId) -> RofsResult<Option<SectorBuffer>> {
        self.ready()?;
        let h = self.handles.get(id)?;
        if h.stat.is_busy() {
            return Err(RofsError::Busy);
        }
        let slot = h.volume;
        let buffer = self.handles.release(id)?;
        if let Ok(volume) = self.volumes.get_mut(slot) {
            volume.open_handles = volume.open_handles.saturating_sub(1);
        }
        debug!("close {}", id);
        Ok(buffer)
    }

    /// Move the sector cursor. Returns the new position.
    pub fn seek(&mut self, id: HandleId, offset: i64, mode: SeekMode) -> RofsResult<u32> {
        let result = self.seek_inner(id, offset, mode);
        self.diag.track("seek", result)
    }

    fn seek_inner(&mut self, id: HandleId, offset: i64, mode: SeekMode) -> RofsResult<u32> {
        self.ready()?;
        let h = self.handles.get_mut(id)?;
        if h.stat.is_busy() {
            return Err(RofsError::SeekWhileBusy);
        }
        let base = match mode {
            SeekMode::Set => 0,
            SeekMode::FromCurrent => h.cursor as i64,
            SeekMode::FromEnd => h.span as i64,
        };
        let target = base.checked_add(offset).ok_or(RofsError::SeekFailed)?;
        if !(0..=h.span as i64).contains(&target) {
            return Err(RofsError::SeekFailed);
        }
        h.cursor = target as u32;
        Ok(h.cursor)
    }

    /// Sector position relative to the start of the file.
    pub fn tell(&mut self, id: HandleId) -> RofsResult<u32> {
        self.query("tell", id, |h| Ok(h.cursor))
    }

    /// Ask for the next `count` sectors into `buffer`.
    ///
    /// The count is clamped to what remains of the file; the accepted
    /// count is returned and zero completes at once. The buffer must hold
    /// the accepted sectors and be DMA-aligned. It stays with the work
    /// area until [`take_buffer`](Self::take_buffer) or
    /// [`close`](Self::close) hands it back. A request refused before it
    /// is accepted drops the buffer.
    pub fn request_read(&mut self, id: HandleId, count: u32, buffer: SectorBuffer) -> RofsResult<u32> {
        let result = self.request_read_inner(id, count, buffer);
        self.diag.track("request_read", result)
    }

    fn request_read_inner(&mut self, id: HandleId, count: u32, buffer: SectorBuffer) -> RofsResult<u32> {
        self.ready()?;
        let prim = self
            .primitive
            .as_deref_mut()
            .ok_or(RofsError::Internal("no primitive registered"))?;
        let h = self.handles.get_mut(id)?;
        match h.stat {
            HandleStatus::Idle | HandleStatus::Complete => {}
            HandleStatus::Error => return Err(RofsError::ReadRequestFailed),
            HandleStatus::RequestPending | HandleStatus::Transferring => {
                return Err(RofsError::Busy)
            }
        }
        let accepted = count.min(h.span - h.cursor);
        if buffer.len() < accepted as usize * SECTOR_LEN {
            return Err(RofsError::InvalidParameter("buffer smaller than request"));
        }
        if !buffer.is_aligned() {
            return Err(RofsError::InvalidParameter("buffer not DMA-aligned"));
        }

        h.buffer = Some(buffer);
        h.err = None;
        h.req_start = h.cursor;
        h.req_sct = accepted;
        h.trans_sct = 0;
        h.chunk_end = 0;
        if accepted == 0 {
            h.stat = HandleStatus::Complete;
            return Ok(0);
        }
        h.stat = HandleStatus::RequestPending;
        trace!("{}: read {} sectors from {}", id, accepted, h.cursor);

        if let Err(err) = dispatch(prim, &mut self.volumes, h) {
            fail(h, err.clone());
            return Err(err);
        }
        Ok(accepted)
    }

    /// Abort the request on `id` and return it to idle. The cursor stays
    /// where the last completed request left it.
    pub fn stop_transfer(&mut self, id: HandleId) -> RofsResult<()> {
        let result = self.stop_transfer_inner(id);
        self.diag.track("stop_transfer", result)
    }

    fn stop_transfer_inner(&mut self, id: HandleId) -> RofsResult<()> {
        self.ready()?;
        let h = self.handles.get_mut(id)?;
        if h.stat == HandleStatus::Transferring {
            let container = self.volumes.get(h.volume)?.container;
            if let Some(prim) = self.primitive.as_deref_mut() {
                prim.stop(container);
            }
            release_container(&mut self.volumes, h.volume);
        }
        trace!("{}: stopped in {:?}", id, h.stat);
        h.reset_transfer();
        Ok(())
    }

    /// Hand the caller's buffer back once no transfer uses it.
    pub fn take_buffer(&mut self, id: HandleId) -> RofsResult<Option<SectorBuffer>> {
        let result = self.take_buffer_inner(id);
        self.diag.track("take_buffer", result)
    }

    fn take_buffer_inner(&mut self, id: HandleId) -> RofsResult<Option<SectorBuffer>> {
        self.ready()?;
        let h = self.handles.get_mut(id)?;
        if h.stat.is_busy() {
            return Err(RofsError::Busy);
        }
        Ok(h.buffer.take())
    }

    pub fn status(&mut self, id: HandleId) -> RofsResult<HandleStatus> {
        self.query("status", id, |h| Ok(h.stat))
    }

    /// Error that moved the handle to [`HandleStatus::Error`].
    pub fn handle_error(&mut self, id: HandleId) -> RofsResult<Option<RofsError>> {
        self.query("handle_error", id, |h| Ok(h.err.clone()))
    }

    /// Bytes of file data delivered by the current request.
    pub fn transferred(&mut self, id: HandleId) -> RofsResult<u64> {
        self.query("transferred", id, |h| Ok(h.transferred_bytes()))
    }

    /// [`transferred`](Self::transferred), saturated to 32 bits.
    pub fn transferred_u32(&mut self, id: HandleId) -> RofsResult<u32> {
        self.query("transferred", id, |h| {
            Ok(u32::try_from(h.transferred_bytes()).unwrap_or(u32::MAX))
        })
    }

    pub fn file_size(&mut self, id: HandleId) -> RofsResult<u64> {
        self.query("file_size", id, |h| Ok(h.fsize))
    }

    /// File size narrowed per the configured [`SizePolicy`](crate::SizePolicy).
    pub fn file_size_u32(&mut self, id: HandleId) -> RofsResult<u32> {
        let policy = self.config.size_policy;
        self.query("file_size", id, |h| policy.narrow(h.fsize))
    }

    /// Byte offset of the file on the medium.
    pub fn start_byte(&mut self, id: HandleId) -> RofsResult<u64> {
        self.query("start_byte", id, |h| Ok(h.start_byte()))
    }

    /// Sector length of the registered medium.
    pub fn sector_len(&self) -> usize {
        self.primitive
            .as_deref()
            .map_or(SECTOR_LEN, |prim| prim.sector_len())
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.open_count()
    }

    /// Read one field of a live handle, latching the outcome.
    fn query<T>(
        &mut self,
        op: &str,
        id: HandleId,
        read: impl FnOnce(&Handle) -> RofsResult<T>,
    ) -> RofsResult<T> {
        let result = self
            .ready()
            .and_then(|()| self.handles.get(id))
            .and_then(read);
        self.diag.track(op, result)
    }

    /// Server tick: dispatch waiting requests, advance the primitive
    /// layer, then move finished data into handle buffers.
    ///
    /// Failures move the handle to [`HandleStatus::Error`], latch the
    /// error and reach the error callback.
    pub fn exec_server(&mut self) {
        if !self.initialized {
            return;
        }
        let Some(prim) = self.primitive.as_deref_mut() else {
            return;
        };
        let mut failed = Vec::new();
        let slots = self.handles.user_slots();

        for slot in 0..slots {
            let h = self.handles.slot_mut(slot);
            if h.used && h.stat == HandleStatus::RequestPending {
                if let Err(err) = dispatch(prim, &mut self.volumes, h) {
                    fail(h, err.clone());
                    failed.push((slot, err));
                }
            }
        }

        prim.exec_server();

        for slot in 0..slots {
            let h = self.handles.slot_mut(slot);
            if h.used && h.stat == HandleStatus::Transferring {
                if let Err(err) = poll(prim, &mut self.volumes, h) {
                    fail(h, err.clone());
                    failed.push((slot, err));
                }
            }
        }

        for (slot, err) in failed {
            let op = match self.handles.id_of(slot) {
                Some(id) => format!("exec_server {}", id),
                None => "exec_server".to_string(),
            };
            self.diag.report(&op, &err);
        }
    }
}

fn fail(h: &mut Handle, err: RofsError) {
    h.stat = HandleStatus::Error;
    h.err = Some(err);
}

fn release_container(volumes: &mut VolumeRegistry, slot: usize) {
    if let Ok(volume) = volumes.get_mut(slot) {
        volume.req_cnt = volume.req_cnt.saturating_sub(1);
    }
}

/// Issue the next primitive request for `h` if its container is free.
/// Returns whether a request went out.
fn dispatch(prim: &mut dyn PrimitiveIo, volumes: &mut VolumeRegistry, h: &mut Handle) -> RofsResult<bool> {
    let container = volumes.get(h.volume)?.container;
    if volumes.container_busy(container) {
        return Ok(false);
    }
    let chunk = (h.req_sct - h.trans_sct).min(h.unit);
    let sector = h.start + h.req_start + h.trans_sct;
    prim.seek(container, sector)?;
    prim.request_read(container, chunk)?;
    volumes.get_mut(h.volume)?.req_cnt += 1;
    h.chunk_end = h.trans_sct + chunk;
    h.stat = HandleStatus::Transferring;
    trace!("dispatch sector {} x{} on container {}", sector, chunk, container.0);
    Ok(true)
}

/// Collect progress for a transferring handle.
fn poll(prim: &mut dyn PrimitiveIo, volumes: &mut VolumeRegistry, h: &mut Handle) -> RofsResult<()> {
    let container = volumes.get(h.volume)?.container;
    let status = prim.status(container);
    let buffer = h
        .buffer
        .as_mut()
        .ok_or(RofsError::Internal("transfer without buffer"))?;
    let from = h.trans_sct as usize * SECTOR_LEN;
    let to = h.chunk_end as usize * SECTOR_LEN;
    h.trans_sct += prim.drain(container, &mut buffer.as_mut_slice()[from..to]);

    match status {
        PrimitiveStatus::Busy => Ok(()),
        PrimitiveStatus::Complete => {
            release_container(volumes, h.volume);
            if h.trans_sct < h.chunk_end {
                return Err(RofsError::ReadFailed);
            }
            if h.trans_sct < h.req_sct {
                if !dispatch(prim, volumes, h)? {
                    h.stat = HandleStatus::RequestPending;
                }
                return Ok(());
            }
            h.cursor = h.req_start + h.req_sct;
            h.stat = HandleStatus::Complete;
            trace!("read complete, cursor {}", h.cursor);
            Ok(())
        }
        PrimitiveStatus::Error(code) => {
            prim.stop(container);
            release_container(volumes, h.volume);
            Err(RofsError::Primitive(code))
        }
        PrimitiveStatus::Standby => {
            release_container(volumes, h.volume);
            Err(RofsError::ReadFailed)
        }
    }
}
