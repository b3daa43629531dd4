//! Work-area configuration and sizing.

use serde::{Deserialize, Serialize};

use crate::error::{RofsError, RofsResult};
use crate::format::dir_record_size;

/// Bytes of fixed work-area state (flags, counters, tables).
pub const WORK_HEADER_SIZE: usize = 256;

/// Bytes per handle slot.
pub const HANDLE_SIZE: usize = 96;

/// Bytes per volume slot, excluding its directory record.
pub const VOLUME_SIZE: usize = 80;

/// Sectors in the shared scratch buffer.
pub const SCRATCH_SECTORS: usize = 2;

/// Slack: the scratch buffer plus alignment padding.
pub const WORK_SLACK: usize = SCRATCH_SECTORS * crate::format::SECTOR_LEN + 64;

/// How 64-bit sizes narrow to 32 bits for callers that need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SizePolicy {
    /// Cap at `u32::MAX`.
    #[default]
    Saturate,
    /// Fail with `InvalidParameter` when the value does not fit.
    Reject,
}

impl SizePolicy {
    pub fn narrow(self, value: u64) -> RofsResult<u32> {
        match (self, u32::try_from(value)) {
            (_, Ok(v)) => Ok(v),
            (SizePolicy::Saturate, Err(_)) => Ok(u32::MAX),
            (SizePolicy::Reject, Err(_)) => {
                Err(RofsError::InvalidParameter("value exceeds 32 bits"))
            }
        }
    }
}

/// Capacities and policies fixed at init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RofsConfig {
    /// Handles a caller may hold open at once.
    pub max_open: usize,
    /// Volumes that may be mounted at once.
    pub max_volume: usize,
    /// Entries per directory record, including "." and "..".
    pub max_dirent: usize,
    /// Narrowing for the 32-bit size accessors.
    pub size_policy: SizePolicy,
    /// Server rounds a synchronous load may take.
    pub sync_poll_limit: u32,
    /// Largest primitive request, in sectors; longer reads are split.
    pub transfer_unit: u32,
}

impl Default for RofsConfig {
    fn default() -> Self {
        Self {
            max_open: 8,
            max_volume: 4,
            max_dirent: 64,
            size_policy: SizePolicy::default(),
            sync_poll_limit: 10_000,
            transfer_unit: 32,
        }
    }
}

impl RofsConfig {
    pub fn validate(&self) -> RofsResult<()> {
        if self.max_open == 0 || self.max_open > u16::MAX as usize {
            return Err(RofsError::InvalidParameter("max_open out of range"));
        }
        if self.max_volume == 0 {
            return Err(RofsError::InvalidParameter("max_volume out of range"));
        }
        if self.max_dirent < crate::format::PSEUDO_ENTRIES {
            return Err(RofsError::InvalidParameter("max_dirent out of range"));
        }
        if self.sync_poll_limit == 0 {
            return Err(RofsError::InvalidParameter("sync_poll_limit out of range"));
        }
        if self.transfer_unit == 0 {
            return Err(RofsError::InvalidParameter("transfer_unit out of range"));
        }
        Ok(())
    }

    /// Work-area size for this configuration.
    pub fn work_size(&self) -> usize {
        work_size(self.max_open, self.max_volume, self.max_dirent)
    }
}

/// Work-area size for the given capacities. One handle slot beyond
/// `max_open` is reserved for synchronous loads.
pub const fn work_size(max_open: usize, max_volume: usize, max_dirent: usize) -> usize {
    WORK_HEADER_SIZE
        + (max_open + 1) * HANDLE_SIZE
        + max_volume * (dir_record_size(max_dirent) + VOLUME_SIZE)
        + WORK_SLACK
}
