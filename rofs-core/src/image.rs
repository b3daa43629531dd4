//! Image authoring.
//!
//! [`ImageBuilder`] collects files and directories in memory and lays
//! them out as a mountable image: descriptor at sector 16, directory
//! records breadth-first from sector 17 (root first), then file data in
//! record order. Entries within a record are sorted by name.

use crate::error::{PackError, PackResult};
use crate::format::dirent::{write_entry, write_header, RawEntry};
use crate::format::{
    dir_record_size, sectors_for_bytes, Attributes, FormatFlags, VolumeDescriptor,
    DESCRIPTOR_SECTOR, DIRENT_SIZE, DIR_HEADER_SIZE, MAX_NAME_LEN, PSEUDO_ENTRIES, SECTOR_LEN,
    VOLUME_ID_LEN,
};
use crate::volume::VolumeRegistry;

const SEPARATORS: [char; 2] = ['/', '\\'];

enum NodeKind {
    File(Vec<u8>),
    Dir(Vec<Node>),
}

struct Node {
    name: String,
    hidden: bool,
    kind: NodeKind,
}

impl Node {
    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Dir(children) => dir_record_size(children.len() + PSEUDO_ENTRIES) as u64,
        }
    }
}

/// A directory record waiting for its sector.
struct Planned<'a> {
    children: Vec<&'a Node>,
    parent: usize,
    sector: u32,
    /// Start sector of each child.
    fads: Vec<u32>,
}

impl Planned<'_> {
    fn record_size(&self) -> usize {
        dir_record_size(self.children.len() + PSEUDO_ENTRIES)
    }
}

/// Builds ROFS images.
pub struct ImageBuilder {
    volume_id: String,
    volume_name: String,
    flags: FormatFlags,
    root: Vec<Node>,
}

impl ImageBuilder {
    /// New builder. `volume_id` is stored in the descriptor (at most 32
    /// ASCII bytes); it is checked by [`build`](Self::build).
    pub fn new(volume_id: &str) -> Self {
        Self {
            volume_id: volume_id.to_string(),
            volume_name: "ROFS".to_string(),
            flags: FormatFlags::empty(),
            root: Vec::new(),
        }
    }

    /// Make names compare exactly. Set before adding entries.
    pub fn case_sensitive(&mut self, on: bool) -> &mut Self {
        self.flags.set(FormatFlags::CASE_SENSITIVE, on);
        self
    }

    /// Name written into every record header.
    pub fn volume_name(&mut self, name: &str) -> PackResult<&mut Self> {
        self.volume_name = VolumeRegistry::normalize_name(name)
            .map_err(|_| PackError::InvalidName(name.to_string()))?;
        Ok(self)
    }

    /// Add a file. Missing parent directories are created.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) -> PackResult<()> {
        self.insert(path, NodeKind::File(data))
    }

    /// Add an (empty) directory. Adding an existing directory is a no-op.
    pub fn add_dir(&mut self, path: &str) -> PackResult<()> {
        self.insert(path, NodeKind::Dir(Vec::new()))
    }

    /// Set the hidden attribute on an existing entry.
    pub fn set_hidden(&mut self, path: &str, hidden: bool) -> PackResult<()> {
        let case_sensitive = self.is_case_sensitive();
        let parts = split_path(path)?;
        let (leaf, dirs) = parts
            .split_last()
            .ok_or_else(|| PackError::InvalidName(path.to_string()))?;
        let mut children = &mut self.root;
        for dir in dirs {
            let found = children
                .iter_mut()
                .find(|n| same_name(&n.name, dir, case_sensitive))
                .ok_or_else(|| PackError::InvalidName(path.to_string()))?;
            children = match &mut found.kind {
                NodeKind::Dir(c) => c,
                NodeKind::File(_) => return Err(PackError::NotADirectory(dir.to_string())),
            };
        }
        let node = children
            .iter_mut()
            .find(|n| same_name(&n.name, leaf, case_sensitive))
            .ok_or_else(|| PackError::InvalidName(path.to_string()))?;
        node.hidden = hidden;
        Ok(())
    }

    fn is_case_sensitive(&self) -> bool {
        self.flags.contains(FormatFlags::CASE_SENSITIVE)
    }

    fn insert(&mut self, path: &str, kind: NodeKind) -> PackResult<()> {
        let case_sensitive = self.is_case_sensitive();
        let parts = split_path(path)?;
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(PackError::InvalidName(path.to_string()));
        };

        let mut children = &mut self.root;
        for dir in dirs {
            let idx = match children
                .iter()
                .position(|n| same_name(&n.name, dir, case_sensitive))
            {
                Some(idx) => idx,
                None => {
                    children.push(Node {
                        name: dir.to_string(),
                        hidden: false,
                        kind: NodeKind::Dir(Vec::new()),
                    });
                    children.len() - 1
                }
            };
            children = match &mut children[idx].kind {
                NodeKind::Dir(c) => c,
                NodeKind::File(_) => return Err(PackError::NotADirectory(dir.to_string())),
            };
        }

        if let Some(existing) = children
            .iter()
            .find(|n| same_name(&n.name, leaf, case_sensitive))
        {
            return match (&existing.kind, &kind) {
                (NodeKind::Dir(_), NodeKind::Dir(_)) => Ok(()),
                _ => Err(PackError::DuplicatePath(path.to_string())),
            };
        }
        children.push(Node {
            name: leaf.to_string(),
            hidden: false,
            kind,
        });
        Ok(())
    }

    /// Lay the image out and encode it.
    pub fn build(&self) -> PackResult<Vec<u8>> {
        if !self.volume_id.is_ascii() || self.volume_id.len() > VOLUME_ID_LEN {
            return Err(PackError::InvalidName(self.volume_id.clone()));
        }
        let case_sensitive = self.is_case_sensitive();

        // Breadth-first list of records; `targets` maps a child to the
        // record it owns.
        let mut dirs = vec![Planned {
            children: sorted(&self.root, case_sensitive),
            parent: 0,
            sector: 0,
            fads: Vec::new(),
        }];
        let mut targets: Vec<Vec<Option<usize>>> = Vec::new();
        let mut i = 0;
        while i < dirs.len() {
            let children = dirs[i].children.clone();
            let mut owned = vec![None; children.len()];
            for (k, child) in children.iter().enumerate() {
                if let NodeKind::Dir(grandchildren) = &child.kind {
                    dirs.push(Planned {
                        children: sorted(grandchildren, case_sensitive),
                        parent: i,
                        sector: 0,
                        fads: Vec::new(),
                    });
                    owned[k] = Some(dirs.len() - 1);
                }
            }
            targets.push(owned);
            i += 1;
        }

        let mut next = DESCRIPTOR_SECTOR as u64 + 1;
        for dir in dirs.iter_mut() {
            dir.sector = sector_u32(next)?;
            next += sectors_for_bytes(dir.record_size() as u64);
        }
        let mut flags = self.flags;
        for i in 0..dirs.len() {
            let mut fads = Vec::with_capacity(dirs[i].children.len());
            for (k, child) in dirs[i].children.iter().enumerate() {
                match targets[i][k] {
                    Some(owned) => fads.push(dirs[owned].sector),
                    None => {
                        fads.push(sector_u32(next)?);
                        next += sectors_for_bytes(child.size());
                        if child.size() > u32::MAX as u64 {
                            flags |= FormatFlags::LARGE_FILES;
                        }
                    }
                }
            }
            dirs[i].fads = fads;
        }
        let total = sector_u32(next)?;

        let mut image = vec![0u8; total as usize * SECTOR_LEN];
        let mut volume_id = [b' '; VOLUME_ID_LEN];
        volume_id[..self.volume_id.len()].copy_from_slice(self.volume_id.as_bytes());
        VolumeDescriptor {
            flags,
            ptbl_sector: dirs[0].sector,
            ptbl_size: dirs[0].record_size() as u32,
            volume_sectors: total,
            volume_id,
        }
        .write(&mut image[DESCRIPTOR_SECTOR as usize * SECTOR_LEN..]);

        for dir in &dirs {
            let parent = &dirs[dir.parent];
            self.write_record(&mut image, dir, parent);
            for (child, &fad) in dir.children.iter().zip(&dir.fads) {
                if let NodeKind::File(data) = &child.kind {
                    let at = fad as usize * SECTOR_LEN;
                    image[at..at + data.len()].copy_from_slice(data);
                }
            }
        }
        Ok(image)
    }

    fn write_record(&self, image: &mut [u8], dir: &Planned<'_>, parent: &Planned<'_>) {
        let base = dir.sector as usize * SECTOR_LEN;
        let mem = &mut image[base..base + dir.record_size()];
        let count = (dir.children.len() + PSEUDO_ENTRIES) as u32;
        write_header(mem, count, count, dir.sector, &self.volume_name);

        let pseudo = [(".", dir), ("..", parent)];
        let entries = pseudo
            .iter()
            .map(|(name, d)| RawEntry {
                size: d.record_size() as u64,
                fad: d.sector,
                attributes: Attributes::DIRECTORY,
                search_id: 0,
                name: *name,
            })
            .chain(
                dir.children
                    .iter()
                    .zip(&dir.fads)
                    .map(|(child, &fad)| RawEntry {
                        size: child.size(),
                        fad,
                        attributes: attributes_of(child),
                        search_id: 0,
                        name: &child.name,
                    }),
            );
        for (i, mut entry) in entries.enumerate() {
            entry.search_id = i.min(u8::MAX as usize) as u8;
            let at = DIR_HEADER_SIZE + i * DIRENT_SIZE;
            write_entry(&mut mem[at..], &entry);
        }
    }
}

fn attributes_of(node: &Node) -> Attributes {
    let mut attributes = Attributes::empty();
    attributes.set(Attributes::DIRECTORY, matches!(node.kind, NodeKind::Dir(_)));
    attributes.set(Attributes::HIDDEN, node.hidden);
    attributes
}

fn sorted(nodes: &[Node], case_sensitive: bool) -> Vec<&Node> {
    let mut out: Vec<&Node> = nodes.iter().collect();
    if case_sensitive {
        out.sort_by(|a, b| a.name.cmp(&b.name));
    } else {
        out.sort_by_key(|n| n.name.to_ascii_uppercase());
    }
    out
}

fn same_name(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// Sectors are addressed by a signed 32-bit FAD on disk.
fn sector_u32(sector: u64) -> PackResult<u32> {
    if sector > i32::MAX as u64 {
        return Err(PackError::TooLarge(sector));
    }
    Ok(sector as u32)
}

fn split_path(path: &str) -> PackResult<Vec<&str>> {
    let parts: Vec<&str> = path.split(SEPARATORS).filter(|p| !p.is_empty()).collect();
    for part in &parts {
        validate_name(part)?;
    }
    Ok(parts)
}

/// Entry names: 1..=31 printable ASCII bytes, no separators or `:`.
pub fn validate_name(name: &str) -> PackResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| (b' '..=b'~').contains(&b) && !matches!(b, b'/' | b'\\' | b':'));
    if valid {
        Ok(())
    } else {
        Err(PackError::InvalidName(name.to_string()))
    }
}
