//! Path resolution and directory operations.
//!
//! Paths look like `[VOLUME:]a/b/c`. Either `/` or `\` separates
//! components; a leading separator starts at the root, anything else at
//! the volume's current directory (or a caller-supplied record). `.` and
//! `..` are ordinary entries of every record, so they resolve like names.

use log::trace;

use super::Rofs;
use crate::dir::{DirEntry, DirRecord};
use crate::error::{RofsError, RofsResult};
use crate::volume::VolumeRegistry;

const SEPARATORS: [char; 2] = ['/', '\\'];

/// Outcome of a name lookup.
pub(super) struct Resolved {
    /// Volume slot.
    pub volume: usize,
    pub entry: DirEntry,
    /// Sector of the record the entry was found in.
    pub parent: u32,
}

impl Resolved {
    /// Start sector of the entry's data.
    pub fn start(&self) -> RofsResult<u32> {
        u32::try_from(self.entry.fad).map_err(|_| RofsError::MalformedDirectory(self.parent))
    }
}

/// Split an optional `VOLUME:` prefix off a path.
fn split_volume(path: &str) -> (Option<&str>, &str) {
    match path.split_once(':') {
        Some((volume, rest)) => (Some(volume), rest),
        None => (None, path),
    }
}

/// Record a lookup walks from: the last record loaded during the walk,
/// then the caller's record, then the volume's current directory.
fn walk_dir<'a>(
    volumes: &'a VolumeRegistry,
    slot: usize,
    base: Option<&'a DirRecord>,
    loaded: Option<&'a DirRecord>,
) -> RofsResult<&'a DirRecord> {
    match loaded.or(base) {
        Some(record) => Ok(record),
        None => Ok(&volumes.get(slot)?.current),
    }
}

/// Current directory of the named volume, or of the default volume.
fn current_record<'a>(
    volumes: &'a VolumeRegistry,
    volume: Option<&str>,
) -> RofsResult<&'a DirRecord> {
    let slot = match volume {
        Some(name) => volumes.lookup(name)?,
        None => volumes.default_slot()?,
    };
    Ok(&volumes.get(slot)?.current)
}

impl Rofs {
    /// Resolve `path` to a directory entry without opening it.
    pub(super) fn resolve(&mut self, path: &str, base: Option<&DirRecord>) -> RofsResult<Resolved> {
        let (volume, rest) = split_volume(path);
        if let Some(record) = base {
            if record.count() == 0 {
                return Err(RofsError::InvalidParameter("directory record not loaded"));
            }
        }
        let slot = match (volume, base) {
            (Some(name), _) => self.volumes.lookup(name)?,
            (None, Some(record)) => self.volumes.lookup(record.volume_name())?,
            (None, None) => self.volumes.default_slot()?,
        };
        let (container, case_sensitive, root, name) = {
            let v = self.volumes.get(slot)?;
            (v.container, v.case_sensitive(), v.root_fad(), v.name.clone())
        };
        // A record from another volume does not anchor this lookup.
        let base = base.filter(|r| r.volume_name().eq_ignore_ascii_case(&name));

        let mut loaded = None;
        if rest.starts_with(SEPARATORS) {
            let mut record = DirRecord::with_capacity(self.config.max_dirent);
            self.load_record(container, root, &name, &mut record)?;
            loaded = Some(record);
        }

        let components: Vec<&str> = rest.split(SEPARATORS).filter(|c| !c.is_empty()).collect();
        let Some((last, dirs)) = components.split_last() else {
            let dir = walk_dir(&self.volumes, slot, base, loaded.as_ref())?;
            let entry = dir
                .entries()
                .first()
                .cloned()
                .ok_or(RofsError::MalformedDirectory(dir.fad()))?;
            return Ok(Resolved {
                volume: slot,
                parent: dir.fad(),
                entry,
            });
        };

        for component in dirs {
            let found = {
                let dir = walk_dir(&self.volumes, slot, base, loaded.as_ref())?;
                let entry = dir
                    .find(component, case_sensitive)
                    .cloned()
                    .ok_or_else(|| RofsError::FileNotFound(path.to_string()))?;
                Resolved {
                    volume: slot,
                    parent: dir.fad(),
                    entry,
                }
            };
            if !found.entry.is_directory() {
                return Err(RofsError::NotADirectory(component.to_string()));
            }
            let fad = found.start()?;
            trace!("resolve {}: descend into {} at {}", path, component, fad);
            let mut record = DirRecord::with_capacity(self.config.max_dirent);
            self.load_record(container, fad, &name, &mut record)?;
            loaded = Some(record);
        }

        let dir = walk_dir(&self.volumes, slot, base, loaded.as_ref())?;
        let entry = dir
            .find(last, case_sensitive)
            .cloned()
            .ok_or_else(|| RofsError::FileNotFound(path.to_string()))?;
        Ok(Resolved {
            volume: slot,
            parent: dir.fad(),
            entry,
        })
    }

    /// Load the directory named by `path` into `out`.
    ///
    /// `out` keeps the capacity it was created with; a directory with more
    /// entries fails with [`RofsError::DirectoryOverflow`] and leaves `out`
    /// empty. Returns the entry count, "." and ".." included.
    pub fn load_directory(&mut self, path: &str, out: &mut DirRecord) -> RofsResult<usize> {
        let result = self.load_directory_inner(path, out);
        self.diag.track("load_directory", result)
    }

    fn load_directory_inner(&mut self, path: &str, out: &mut DirRecord) -> RofsResult<usize> {
        self.ready()?;
        out.reset();
        let resolved = self.resolve(path, None)?;
        if !resolved.entry.is_directory() {
            return Err(RofsError::NotADirectory(path.to_string()));
        }
        let fad = resolved.start()?;
        let (container, name) = {
            let v = self.volumes.get(resolved.volume)?;
            (v.container, v.name.clone())
        };
        self.load_record(container, fad, &name, out)
    }

    /// Make a loaded record the current directory of its volume.
    pub fn set_current_directory(&mut self, record: DirRecord) -> RofsResult<()> {
        let result = self.set_current_inner(record);
        self.diag.track("set_current_directory", result)
    }

    fn set_current_inner(&mut self, record: DirRecord) -> RofsResult<()> {
        self.ready()?;
        if record.count() == 0 {
            return Err(RofsError::InvalidParameter("directory record not loaded"));
        }
        let slot = self.volumes.lookup(record.volume_name())?;
        let volume = self.volumes.get_mut(slot)?;
        trace!("{}: current directory now at {}", volume.name, record.fad());
        volume.current = record;
        Ok(())
    }

    /// Load `path` and make it the current directory in one step.
    pub fn change_directory(&mut self, path: &str) -> RofsResult<usize> {
        let result = self.change_directory_inner(path);
        self.diag.track("change_directory", result)
    }

    fn change_directory_inner(&mut self, path: &str) -> RofsResult<usize> {
        let mut record = DirRecord::with_capacity(self.config.max_dirent);
        let count = self.load_directory_inner(path, &mut record)?;
        self.set_current_inner(record)?;
        Ok(count)
    }

    /// Current directory of `volume`, or of the default volume.
    pub fn current_directory(&mut self, volume: Option<&str>) -> RofsResult<&DirRecord> {
        let result = match self.ready() {
            Ok(()) => current_record(&self.volumes, volume),
            Err(err) => Err(err),
        };
        self.diag.track("current_directory", result)
    }

    /// Entries of `record`, or of the default volume's current directory.
    pub fn list_directory(&mut self, record: Option<&DirRecord>) -> RofsResult<Vec<DirEntry>> {
        let result = self.ready().and_then(|()| match record {
            Some(record) => Ok(record.entries().to_vec()),
            None => current_record(&self.volumes, None).map(|dir| dir.entries().to_vec()),
        });
        self.diag.track("list_directory", result)
    }

    /// Plain files in `record`, or in the default volume's current
    /// directory.
    pub fn count_files(&mut self, record: Option<&DirRecord>) -> RofsResult<usize> {
        let result = self.ready().and_then(|()| match record {
            Some(record) => Ok(record.count_files()),
            None => current_record(&self.volumes, None).map(DirRecord::count_files),
        });
        self.diag.track("count_files", result)
    }

    /// Whether `path` names an entry. Only a missing name answers `false`;
    /// other failures are returned.
    pub fn file_exists(&mut self, path: &str) -> RofsResult<bool> {
        let result = self.ready().and_then(|()| match self.resolve(path, None) {
            Ok(_) => Ok(true),
            Err(RofsError::FileNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        });
        self.diag.track("file_exists", result)
    }
}
