//! Directory records.
//!
//! A [`DirRecord`] is a caller-sized table of entries. Loading fills it
//! from the medium; it never grows past the capacity it was created with.

use crate::error::{RofsError, RofsResult};
use crate::format::{
    sectors_for_bytes, Attributes, DirEntryView, DirHeaderView, DIRENT_SIZE, DIR_HEADER_SIZE,
    PSEUDO_ENTRIES,
};

/// One parsed directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    /// Start sector.
    pub fad: i32,
    pub attributes: Attributes,
    pub search_id: u8,
}

impl DirEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    /// "." or "..".
    pub fn is_pseudo(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    pub fn size_low(&self) -> u32 {
        self.size as u32
    }

    pub fn size_high(&self) -> u32 {
        (self.size >> 32) as u32
    }

    /// Sectors spanned by the data.
    pub fn sectors(&self) -> u64 {
        sectors_for_bytes(self.size)
    }

    /// Name comparison honoring the volume's case rule.
    pub fn matches(&self, name: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            self.name == name
        } else {
            self.name.eq_ignore_ascii_case(name)
        }
    }
}

/// Parsed directory table.
#[derive(Debug, Clone)]
pub struct DirRecord {
    entries: Vec<DirEntry>,
    capacity: usize,
    fad: u32,
    volume: String,
}

impl DirRecord {
    /// Empty record able to hold `max_entries` entries ("." and ".."
    /// included; see [`crate::format::dir_capacity_for`]).
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_entries),
            capacity: max_entries,
            fad: 0,
            volume: String::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sector the record was loaded from.
    pub fn fad(&self) -> u32 {
        self.fad
    }

    /// Volume the record was loaded from.
    pub fn volume_name(&self) -> &str {
        &self.volume
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Entries other than "." and "..".
    pub fn children(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| !e.is_pseudo())
    }

    /// Plain files in this directory.
    pub fn count_files(&self) -> usize {
        self.children().filter(|e| !e.is_directory()).count()
    }

    pub fn find(&self, name: &str, case_sensitive: bool) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.matches(name, case_sensitive))
    }

    /// Tag the record with the name its volume was mounted under.
    pub(crate) fn set_volume(&mut self, name: &str) {
        self.volume.clear();
        self.volume.push_str(name);
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.fad = 0;
        self.volume.clear();
    }

    /// Validate a header sector and prepare to receive its entries.
    /// Returns the byte length of the whole on-disk record.
    pub(crate) fn begin_load(&mut self, header: &[u8], fad: u32) -> RofsResult<usize> {
        self.reset();
        let view = DirHeaderView::new(header);
        let count = view.count() as usize;
        if view.fad() != fad || count > view.capacity() as usize || count < PSEUDO_ENTRIES {
            return Err(RofsError::MalformedDirectory(fad));
        }
        if count > self.capacity {
            return Err(RofsError::DirectoryOverflow {
                count,
                capacity: self.capacity,
            });
        }
        let volume = view
            .volume_name()
            .ok_or(RofsError::MalformedDirectory(fad))?;
        self.fad = fad;
        self.volume = volume;
        Ok(DIR_HEADER_SIZE + count * DIRENT_SIZE)
    }

    /// Check the pseudo entries once every entry arrived.
    pub(crate) fn finish_load(&mut self) -> RofsResult<usize> {
        let ok = self.entries.len() >= PSEUDO_ENTRIES
            && self.entries[0].name == "."
            && self.entries[1].name == ".."
            && self.entries[0].is_directory()
            && self.entries[1].is_directory();
        if !ok {
            let fad = self.fad;
            self.reset();
            return Err(RofsError::MalformedDirectory(fad));
        }
        Ok(self.entries.len())
    }

    fn push(&mut self, raw: &[u8]) -> RofsResult<()> {
        let view = DirEntryView::new(raw);
        let name = view
            .name()
            .filter(|n| !n.is_empty())
            .ok_or(RofsError::MalformedDirectory(self.fad))?;
        self.entries.push(DirEntry {
            name,
            size: view.size(),
            fad: view.fad(),
            attributes: view.attributes(),
            search_id: view.search_id(),
        });
        Ok(())
    }
}

/// Reassembles fixed-size entries from a byte stream that arrives one
/// scratch buffer at a time. Entries may straddle sector boundaries.
pub(crate) struct EntryDecoder {
    pending: [u8; DIRENT_SIZE],
    pending_len: usize,
    /// Header bytes still to skip.
    skip: usize,
    remaining: usize,
}

impl EntryDecoder {
    pub fn new(count: usize) -> Self {
        Self {
            pending: [0; DIRENT_SIZE],
            pending_len: 0,
            skip: DIR_HEADER_SIZE,
            remaining: count,
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub fn feed(&mut self, mut bytes: &[u8], record: &mut DirRecord) -> RofsResult<()> {
        let skip = self.skip.min(bytes.len());
        bytes = &bytes[skip..];
        self.skip -= skip;

        while self.remaining > 0 && !bytes.is_empty() {
            if self.pending_len == 0 && bytes.len() >= DIRENT_SIZE {
                record.push(&bytes[..DIRENT_SIZE])?;
                bytes = &bytes[DIRENT_SIZE..];
                self.remaining -= 1;
                continue;
            }
            let take = (DIRENT_SIZE - self.pending_len).min(bytes.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&bytes[..take]);
            self.pending_len += take;
            bytes = &bytes[take..];
            if self.pending_len == DIRENT_SIZE {
                record.push(&self.pending)?;
                self.pending_len = 0;
                self.remaining -= 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::dirent::{write_entry, write_header, RawEntry};
    use crate::format::{dir_record_size, SECTOR_LEN};

    fn encode(fad: u32, names: &[&str]) -> Vec<u8> {
        let count = names.len() + 2;
        let mut mem = vec![0u8; dir_record_size(count)];
        write_header(&mut mem, count as u32, count as u32, fad, "DATA");
        let all = [".", ".."].iter().chain(names.iter());
        for (i, name) in all.enumerate() {
            let attributes = if i < 2 {
                Attributes::DIRECTORY
            } else {
                Attributes::empty()
            };
            let off = DIR_HEADER_SIZE + i * DIRENT_SIZE;
            write_entry(
                &mut mem[off..],
                &RawEntry {
                    size: 100 * i as u64,
                    fad: 20 + i as u32,
                    attributes,
                    search_id: i as u8,
                    name,
                },
            );
        }
        mem
    }

    fn load(record: &mut DirRecord, bytes: &[u8], fad: u32, chunk: usize) -> RofsResult<usize> {
        let total = record.begin_load(bytes, fad)?;
        let count = (total - DIR_HEADER_SIZE) / DIRENT_SIZE;
        let mut decoder = EntryDecoder::new(count);
        for piece in bytes[..total].chunks(chunk) {
            decoder.feed(piece, record)?;
        }
        assert!(decoder.is_done());
        record.finish_load()
    }

    #[test]
    fn test_load_entries() {
        let bytes = encode(17, &["TRACK01", "TRACK02"]);
        let mut record = DirRecord::with_capacity(10);
        assert_eq!(load(&mut record, &bytes, 17, 4096).unwrap(), 4);
        assert_eq!(record.fad(), 17);
        assert_eq!(record.volume_name(), "DATA");
        assert_eq!(record.count_files(), 2);
        assert!(record.find("track01", false).is_some());
        assert!(record.find("track01", true).is_none());
    }

    #[test]
    fn test_entries_straddle_chunks() {
        let names: Vec<String> = (0..60).map(|i| format!("FILE{:02}.BIN", i)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let bytes = encode(40, &refs);
        assert!(bytes.len() > SECTOR_LEN);

        let mut record = DirRecord::with_capacity(62);
        assert_eq!(load(&mut record, &bytes, 40, 7).unwrap(), 62);
        assert_eq!(record.entries()[61].name, "FILE59.BIN");
    }

    #[test]
    fn test_overflow_leaves_record_empty() {
        let bytes = encode(17, &["A", "B", "C"]);
        let mut record = DirRecord::with_capacity(4);
        let err = record.begin_load(&bytes, 17).unwrap_err();
        assert_eq!(
            err,
            RofsError::DirectoryOverflow {
                count: 5,
                capacity: 4
            }
        );
        assert_eq!(record.count(), 0);
    }

    #[test]
    fn test_wrong_self_address() {
        let bytes = encode(17, &["A"]);
        let mut record = DirRecord::with_capacity(4);
        assert_eq!(
            record.begin_load(&bytes, 18),
            Err(RofsError::MalformedDirectory(18))
        );
    }

    #[test]
    fn test_missing_pseudo_entries() {
        let mut bytes = encode(17, &["A"]);
        // Rename "." so the record no longer starts with the self entry.
        bytes[DIR_HEADER_SIZE + 14] = b'X';
        let mut record = DirRecord::with_capacity(4);
        assert_eq!(
            load(&mut record, &bytes, 17, 2048),
            Err(RofsError::MalformedDirectory(17))
        );
        assert_eq!(record.count(), 0);
    }

    #[test]
    fn test_entry_helpers() {
        let entry = DirEntry {
            name: "BIG.DAT".into(),
            size: (3u64 << 32) | 5,
            fad: 99,
            attributes: Attributes::empty(),
            search_id: 0,
        };
        assert_eq!(entry.size_low(), 5);
        assert_eq!(entry.size_high(), 3);
        assert!(!entry.is_directory());
        assert!(!entry.is_pseudo());
    }
}
