//! Volume registry: named, mounted containers.
//!
//! Mirrors a drive table: a fixed number of slots, each either empty or
//! holding one mounted image. Names are unique (ASCII case-insensitive)
//! and at most one volume is the default.

use crate::dir::DirRecord;
use crate::error::{RofsError, RofsResult};
use crate::format::{FormatFlags, VolumeDescriptor, MAX_VOLUME_NAME_LEN};
use crate::medium::ContainerId;

/// One mounted image.
#[derive(Debug)]
pub struct Volume {
    pub(crate) name: String,
    pub(crate) container: ContainerId,
    pub(crate) descriptor: VolumeDescriptor,
    /// Directory used to resolve relative names.
    pub(crate) current: DirRecord,
    /// Primitive requests in flight against the container (0 or 1).
    pub(crate) req_cnt: u32,
    /// Handles referencing this volume.
    pub(crate) open_handles: usize,
}

impl Volume {
    pub(crate) fn new(
        name: String,
        container: ContainerId,
        descriptor: VolumeDescriptor,
        current: DirRecord,
    ) -> Self {
        Self {
            name,
            container,
            descriptor,
            current,
            req_cnt: 0,
            open_handles: 0,
        }
    }

    pub(crate) fn case_sensitive(&self) -> bool {
        self.descriptor.flags.contains(FormatFlags::CASE_SENSITIVE)
    }

    /// Sector of the root directory record.
    pub(crate) fn root_fad(&self) -> u32 {
        self.descriptor.ptbl_sector
    }
}

/// Snapshot of a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub container: ContainerId,
    pub volume_id: String,
    pub flags: FormatFlags,
    pub ptbl_sector: u32,
    pub ptbl_size: u32,
    pub volume_sectors: u32,
    /// Sector of the current directory record.
    pub current_dir: u32,
    pub is_default: bool,
}

/// Fixed-capacity table of mounted volumes.
pub struct VolumeRegistry {
    slots: Vec<Option<Volume>>,
    default: Option<usize>,
}

impl VolumeRegistry {
    pub fn new(max_volume: usize) -> Self {
        Self {
            slots: (0..max_volume).map(|_| None).collect(),
            default: None,
        }
    }

    /// Normalize a volume name (uppercase) after checking its shape.
    pub fn normalize_name(name: &str) -> RofsResult<String> {
        let valid = !name.is_empty()
            && name.len() <= MAX_VOLUME_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(name.to_ascii_uppercase())
        } else {
            Err(RofsError::InvalidVolumeName(name.to_string()))
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|v| v.name.eq_ignore_ascii_case(name))
        })
    }

    /// Slot index of a mounted volume.
    pub fn lookup(&self, name: &str) -> RofsResult<usize> {
        self.position(name)
            .ok_or_else(|| RofsError::InvalidVolumeName(name.to_string()))
    }

    /// Free slot for a new volume named `name`.
    pub fn vacant_slot(&self, name: &str) -> RofsResult<usize> {
        if self.position(name).is_some() {
            return Err(RofsError::DuplicateVolumeName(name.to_string()));
        }
        self.slots
            .iter()
            .position(Option::is_none)
            .ok_or(RofsError::InvalidParameter("volume table full"))
    }

    /// Place a volume. The first volume becomes default if none is set.
    pub fn insert(&mut self, slot: usize, volume: Volume) {
        self.slots[slot] = Some(volume);
        if self.default.is_none() {
            self.default = Some(slot);
        }
    }

    /// Remove a volume; clears the default if it was the default.
    pub fn remove(&mut self, name: &str) -> RofsResult<Volume> {
        let slot = self.lookup(name)?;
        if self.slots[slot].as_ref().is_some_and(|v| v.open_handles > 0) {
            return Err(RofsError::Busy);
        }
        if self.default == Some(slot) {
            self.default = None;
        }
        self.slots[slot]
            .take()
            .ok_or(RofsError::Internal("volume slot vanished"))
    }

    pub fn get(&self, slot: usize) -> RofsResult<&Volume> {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(RofsError::VolumeLookup)
    }

    pub fn get_mut(&mut self, slot: usize) -> RofsResult<&mut Volume> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(RofsError::VolumeLookup)
    }

    pub fn set_default(&mut self, name: &str) -> RofsResult<()> {
        self.default = Some(self.lookup(name)?);
        Ok(())
    }

    /// Slot of the default volume.
    pub fn default_slot(&self) -> RofsResult<usize> {
        self.default.ok_or(RofsError::VolumeLookup)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|v| v.name.as_str())
    }

    /// Replace the container behind a volume. Open handles keep working
    /// against the new container.
    pub fn switch_container(&mut self, name: &str, container: ContainerId) -> RofsResult<()> {
        let slot = self.lookup(name)?;
        self.get_mut(slot)?.container = container;
        Ok(())
    }

    pub fn info(&self, name: &str) -> RofsResult<VolumeInfo> {
        let slot = self.lookup(name)?;
        let v = self.get(slot)?;
        Ok(VolumeInfo {
            name: v.name.clone(),
            container: v.container,
            volume_id: v.descriptor.volume_id_str(),
            flags: v.descriptor.flags,
            ptbl_sector: v.descriptor.ptbl_sector,
            ptbl_size: v.descriptor.ptbl_size,
            volume_sectors: v.descriptor.volume_sectors,
            current_dir: v.current.fad(),
            is_default: self.default == Some(slot),
        })
    }

    /// True while any volume on `container` has a primitive request in flight.
    pub fn container_busy(&self, container: ContainerId) -> bool {
        self.iter()
            .any(|v| v.container == container && v.req_cnt > 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.slots.iter().flatten()
    }

    /// Names of mounted volumes in slot order.
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|v| v.name.clone()).collect()
    }

    /// Unmount everything.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.default = None;
    }
}
