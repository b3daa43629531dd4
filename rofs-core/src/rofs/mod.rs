//! ROFS work area.
//!
//! A [`Rofs`] value holds everything the filesystem needs:
//! - the handle pool (plus one reserved slot for synchronous loads)
//! - the volume table and the default volume
//! - the injected [`PrimitiveIo`] implementation
//! - the last-error latch and error callback
//! - a small aligned scratch buffer for directory and descriptor loads
//!
//! Every operation takes `&mut self`; the caller owns the work area and
//! drives asynchronous transfers by calling [`Rofs::exec_server`]
//! periodically.

mod directory;
mod transfer;

use log::{debug, info};

use crate::buffer::SectorBuffer;
use crate::config::{RofsConfig, SCRATCH_SECTORS};
use crate::diag::{Diagnostics, ErrorCallback};
use crate::dir::{DirRecord, EntryDecoder};
use crate::error::{RofsError, RofsResult};
use crate::format::{
    sectors_for_bytes, VolumeDescriptor, DESCRIPTOR_SECTOR, DIRENT_SIZE, DIR_HEADER_SIZE,
    SECTOR_LEN,
};
use crate::handle::{HandlePool, HandleStatus};
use crate::medium::{ContainerId, PrimitiveIo, PrimitiveStatus};
use crate::volume::{Volume, VolumeInfo, VolumeRegistry};

/// Library version string.
pub fn version() -> &'static str {
    concat!("ROFS/Rust Ver.", env!("CARGO_PKG_VERSION"))
}

/// The filesystem context.
pub struct Rofs {
    initialized: bool,
    config: RofsConfig,
    handles: HandlePool,
    volumes: VolumeRegistry,
    primitive: Option<Box<dyn PrimitiveIo>>,
    diag: Diagnostics,
    scratch: SectorBuffer,
}

impl Rofs {
    /// Create a work area sized by `config`.
    pub fn init(config: RofsConfig) -> RofsResult<Self> {
        config.validate()?;
        debug!(
            "init: max_open={} max_volume={} max_dirent={} work_size={}",
            config.max_open,
            config.max_volume,
            config.max_dirent,
            config.work_size()
        );
        Ok(Self {
            initialized: true,
            handles: HandlePool::new(config.max_open),
            volumes: VolumeRegistry::new(config.max_volume),
            primitive: None,
            diag: Diagnostics::new(),
            scratch: SectorBuffer::with_sectors(SCRATCH_SECTORS),
            config,
        })
    }

    /// Tear the work area down. Transfers in flight are stopped, handles
    /// and volumes are dropped. Every later call fails with
    /// [`RofsError::NotInitialized`].
    pub fn finish(&mut self) {
        if !self.initialized {
            return;
        }
        if let Some(prim) = self.primitive.as_deref_mut() {
            for volume in self.volumes.iter().filter(|v| v.req_cnt > 0) {
                prim.stop(volume.container);
            }
        }
        self.handles.clear();
        self.volumes.clear();
        self.primitive = None;
        self.initialized = false;
        debug!("finish");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &RofsConfig {
        &self.config
    }

    /// Install the primitive layer. Only 2048-byte media are accepted.
    pub fn register_primitive(&mut self, primitive: Box<dyn PrimitiveIo>) -> RofsResult<()> {
        let result = self.register_primitive_inner(primitive);
        self.diag.track("register_primitive", result)
    }

    fn register_primitive_inner(&mut self, primitive: Box<dyn PrimitiveIo>) -> RofsResult<()> {
        self.ready()?;
        if primitive.sector_len() != SECTOR_LEN {
            return Err(RofsError::InvalidParameter("sector length must be 2048"));
        }
        if self.volumes.iter().any(|v| v.req_cnt > 0) {
            return Err(RofsError::Busy);
        }
        self.primitive = Some(primitive);
        Ok(())
    }

    /// Access the registered primitive layer, e.g. to insert images into
    /// an in-memory medium after registration.
    pub fn primitive_mut(&mut self) -> Option<&mut (dyn PrimitiveIo + 'static)> {
        self.primitive.as_deref_mut()
    }

    // --- diagnostics ---

    pub fn set_error_callback(&mut self, callback: Option<ErrorCallback>) {
        self.diag.set_callback(callback);
    }

    /// Error of the most recent fallible call, `None` if it succeeded.
    pub fn last_error(&self) -> Option<&RofsError> {
        self.diag.last_error()
    }

    pub fn version(&self) -> &'static str {
        version()
    }

    // --- volumes ---

    /// Mount the image in `container` under `name`.
    ///
    /// Reads the volume descriptor and loads the root directory as the
    /// volume's current directory. Nothing is registered unless both
    /// succeed. The first volume mounted becomes the default.
    pub fn add_volume(&mut self, name: &str, container: ContainerId) -> RofsResult<()> {
        let result = self.mount(name, container);
        self.diag.track("add_volume", result)
    }

    fn mount(&mut self, name: &str, container: ContainerId) -> RofsResult<()> {
        self.ready()?;
        let name = VolumeRegistry::normalize_name(name)?;
        let slot = self.volumes.vacant_slot(&name)?;

        let mut descriptor = None;
        self.read_sync(container, DESCRIPTOR_SECTOR, 1, |bytes| {
            descriptor = VolumeDescriptor::parse(bytes);
            Ok(())
        })?;
        let descriptor = descriptor.ok_or(RofsError::OpenFailed)?;

        let mut root = DirRecord::with_capacity(self.config.max_dirent);
        self.load_record(container, descriptor.ptbl_sector, &name, &mut root)?;

        info!(
            "mounted {} on container {} ({} entries in root, flags {:?})",
            name,
            container.0,
            root.count(),
            descriptor.flags
        );
        self.volumes
            .insert(slot, Volume::new(name, container, descriptor, root));
        Ok(())
    }

    /// Unmount a volume. Fails with [`RofsError::Busy`] while handles on
    /// it are open.
    pub fn remove_volume(&mut self, name: &str) -> RofsResult<()> {
        let result = self.ready().and_then(|()| self.volumes.remove(name));
        let result = result.map(|volume| debug!("unmounted {}", volume.name));
        self.diag.track("remove_volume", result)
    }

    pub fn set_default_volume(&mut self, name: &str) -> RofsResult<()> {
        let result = self.ready().and_then(|()| self.volumes.set_default(name));
        self.diag.track("set_default_volume", result)
    }

    /// Name of the default volume, if one is set.
    pub fn default_volume(&self) -> Option<&str> {
        self.volumes.default_name()
    }

    /// Point a volume at a different container. Open handles stay valid;
    /// callers stop in-flight transfers first.
    pub fn switch_container(&mut self, name: &str, container: ContainerId) -> RofsResult<()> {
        let result = self
            .ready()
            .and_then(|()| self.volumes.switch_container(name, container));
        self.diag.track("switch_container", result)
    }

    pub fn volume_info(&mut self, name: &str) -> RofsResult<VolumeInfo> {
        let result = self.ready().and_then(|()| self.volumes.info(name));
        self.diag.track("volume_info", result)
    }

    /// Names of mounted volumes.
    pub fn volume_names(&self) -> Vec<String> {
        self.volumes.names()
    }

    // --- internals shared by the submodules ---

    fn ready(&self) -> RofsResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(RofsError::NotInitialized)
        }
    }

    /// Synchronously read `count` sectors from `sector`, handing the data
    /// to `sink` one scratch buffer at a time.
    ///
    /// Runs on the reserved handle slot and pumps the primitive server
    /// itself, so it must not overlap a transfer on the same container.
    fn read_sync<F>(
        &mut self,
        container: ContainerId,
        sector: u32,
        count: u32,
        mut sink: F,
    ) -> RofsResult<()>
    where
        F: FnMut(&[u8]) -> RofsResult<()>,
    {
        if self.volumes.container_busy(container) {
            return Err(RofsError::Busy);
        }
        let limit = self.config.sync_poll_limit;
        let prim = self
            .primitive
            .as_deref_mut()
            .ok_or(RofsError::Internal("no primitive registered"))?;

        let reserved = self.handles.reserved_mut();
        reserved.begin_sync(sector, count);
        while reserved.stat == HandleStatus::Transferring {
            let n = (reserved.span - reserved.cursor).min(SCRATCH_SECTORS as u32);
            let dst = &mut self.scratch.as_mut_slice()[..n as usize * SECTOR_LEN];
            let from = reserved.start + reserved.cursor;
            match pump(prim, container, from, n, limit, dst).and_then(|()| sink(dst)) {
                Ok(()) => {
                    reserved.cursor += n;
                    if reserved.cursor >= reserved.span {
                        reserved.stat = HandleStatus::Complete;
                    }
                }
                Err(err) => {
                    reserved.err = Some(err);
                    reserved.stat = HandleStatus::Error;
                }
            }
        }
        match reserved.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Load the directory record at `fad` into `out`, tagging it with
    /// `volume_name`. `out` is empty on failure.
    fn load_record(
        &mut self,
        container: ContainerId,
        fad: u32,
        volume_name: &str,
        out: &mut DirRecord,
    ) -> RofsResult<usize> {
        match self.load_record_inner(container, fad, out) {
            Ok(count) => {
                out.set_volume(volume_name);
                debug!("loaded {} entries from sector {}", count, fad);
                Ok(count)
            }
            Err(err) => {
                out.reset();
                Err(err)
            }
        }
    }

    fn load_record_inner(
        &mut self,
        container: ContainerId,
        fad: u32,
        out: &mut DirRecord,
    ) -> RofsResult<usize> {
        let mut total = 0;
        let mut decoder = None;
        self.read_sync(container, fad, 1, |bytes| {
            total = out.begin_load(bytes, fad)?;
            let mut d = EntryDecoder::new((total - DIR_HEADER_SIZE) / DIRENT_SIZE);
            d.feed(&bytes[..total.min(bytes.len())], out)?;
            decoder = Some(d);
            Ok(())
        })?;
        let mut decoder = decoder.ok_or(RofsError::Internal("directory header not read"))?;

        let sectors = sectors_for_bytes(total as u64) as u32;
        if sectors > 1 {
            let next = fad.checked_add(1).ok_or(RofsError::MalformedDirectory(fad))?;
            self.read_sync(container, next, sectors - 1, |bytes| {
                decoder.feed(bytes, out)
            })?;
        }
        if !decoder.is_done() {
            return Err(RofsError::MalformedDirectory(fad));
        }
        out.finish_load()
    }
}

/// One synchronous primitive request, polled to completion.
fn pump(
    prim: &mut dyn PrimitiveIo,
    container: ContainerId,
    sector: u32,
    count: u32,
    limit: u32,
    dst: &mut [u8],
) -> RofsResult<()> {
    prim.seek(container, sector)?;
    prim.request_read(container, count)?;

    let mut got = 0;
    for _ in 0..limit {
        prim.exec_server();
        let status = prim.status(container);
        got += prim.drain(container, &mut dst[got as usize * SECTOR_LEN..]);
        match status {
            PrimitiveStatus::Busy => {}
            PrimitiveStatus::Complete if got >= count => return Ok(()),
            PrimitiveStatus::Complete | PrimitiveStatus::Standby => {
                prim.stop(container);
                return Err(RofsError::ReadFailed);
            }
            PrimitiveStatus::Error(code) => {
                prim.stop(container);
                return Err(RofsError::Primitive(code));
            }
        }
    }
    prim.stop(container);
    Err(RofsError::Timeout(limit))
}
