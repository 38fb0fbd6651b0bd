//! An OffsetIndex file contains a set of 12-byte values, without header or footer.
//! These 12-bytes consist of:
//! - (4 bytes) offset of a record, relative to the base offset of its segment
//! - (8 bytes) physical position inside the store file on disk of such record
//!
//! Both values are big-endian. Entry `n` lives at bytes `[n * 12, n * 12 + 12)`.
//! While open, the file is preallocated to the configured capacity and memory mapped, on close it
//! is truncated back to the bytes actually used. Reopening an index reads the file length to know
//! where the next entry goes, so no scan of the entries is needed.
//!
//! The index performs no locking, the owning segment serializes access to it.

use crate::log::log_config::Config;
use bytes::{Buf, BufMut};
use fs_err::{File, OpenOptions};
use memmap2::MmapMut;
use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const OFFSET_WIDTH: usize = 4;
pub const POSITION_WIDTH: usize = 8;
pub const ENTRY_WIDTH: usize = OFFSET_WIDTH + POSITION_WIDTH;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Index file {0} is full, its capacity is {1} bytes")]
    IndexFull(String, u64),
    #[error("End of index {0}: no entry at {1}")]
    EndOfIndex(String, IndexSlot),
    #[error("No entry number {0}, only -1 and non-negative entry numbers are addressable")]
    InvalidEntryNumber(i64),
    #[error("Corrupt index {0}: found {1} bytes which is not a multiple of the entry width")]
    CorruptIndex(String, u64),
    #[error("Index file {0} has {1} bytes, above its capacity of {2} bytes")]
    IndexSizeAboveMax(String, u64, u64),
    #[error("Index file {0} max size of {1} bytes cannot hold a single entry")]
    InvalidMaxIndexSize(String, u64),
}

impl IndexError {
    /// Reading past the last written entry is routine, for example when probing for the last
    /// entry of a fresh index, this separates it from actual failures.
    pub fn is_end_of_index(&self) -> bool {
        matches!(self, Self::EndOfIndex(_, _) | Self::InvalidEntryNumber(_))
    }
}

/// The entry requested from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSlot {
    /// Zero-based entry number.
    Absolute(u64),
    /// The most recently written entry.
    Last,
}

impl fmt::Display for IndexSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(n) => write!(f, "slot {}", n),
            Self::Last => write!(f, "last slot"),
        }
    }
}

impl TryFrom<i64> for IndexSlot {
    type Error = IndexError;

    /// `-1` is the last entry, any other negative is never a written entry.
    fn try_from(entry_number: i64) -> Result<Self, Self::Error> {
        match entry_number {
            -1 => Ok(Self::Last),
            n if n >= 0 => Ok(Self::Absolute(n as u64)),
            n => Err(IndexError::InvalidEntryNumber(n)),
        }
    }
}

/// A decoded index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPosition {
    /// Offset relative to the segment base offset
    pub offset: u32,
    /// Byte position of the record inside the store file
    pub position: u64,
}

#[derive(Debug)]
pub struct OffsetIndex {
    /// The mapped region, sized to `max_index_size`. Declared before `file` so it is unmapped
    /// before the file handle is closed.
    mmap: MmapMut,
    file: File,
    /// Bytes used by written entries, always a multiple of ENTRY_WIDTH
    size: u64,
    /// Capacity in bytes, the configured max rounded down to a multiple of ENTRY_WIDTH
    max_index_size: u64,
    /// Set once `close` ran, so that dropping does not trim a second time
    closed: bool,
}

impl OffsetIndex {
    /// Takes ownership of an already opened, read-write `file`. Entries found in the file are kept
    /// and the next write goes right after them.
    pub fn new(file: File, config: &Config) -> Result<Self, IndexError> {
        let name = file.path().display().to_string();
        let max_index_size = round_down_to_entry(config.segment.max_index_bytes);
        if max_index_size == 0 {
            return Err(IndexError::InvalidMaxIndexSize(name, config.segment.max_index_bytes));
        }
        let size = file.metadata()?.len();
        if size % ENTRY_WIDTH as u64 != 0 {
            return Err(IndexError::CorruptIndex(name, size));
        }
        if size > max_index_size {
            return Err(IndexError::IndexSizeAboveMax(name, size, max_index_size));
        }
        // Growing the file leaves the existing entries untouched.
        file.set_len(max_index_size)?;
        // SAFETY: The file is owned by this OffsetIndex until it is dropped, and nothing else in
        // this process resizes or writes it. The mapping is dropped before the file handle.
        let mmap = match unsafe { MmapMut::map_mut(file.file()) } {
            Ok(mmap) => mmap,
            Err(err) => {
                // Leave the file as found, a preallocated length would be recovered as entries.
                if let Err(restore_err) = file.set_len(size) {
                    warn!("Unable to restore {} to {} bytes: {}", name, size, restore_err);
                }
                let err = io::Error::new(err.kind(), format!("failed to map {}: {}", name, err));
                return Err(IndexError::Io(err));
            },
        };
        debug!(
            "Opened offset index {} with {} entries and {} bytes of capacity",
            name,
            size / ENTRY_WIDTH as u64,
            max_index_size
        );
        Ok(Self { mmap, file, size, max_index_size, closed: false })
    }

    /// Opens the index file at `path` for reading and writing, creating it if it doesn't exist.
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self, IndexError> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path.as_ref())?;
        Self::new(file, config)
    }

    /// Opens an index file that must already exist, for inspecting the entries of earlier runs.
    pub fn open_existing<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self, IndexError> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        Self::new(file, config)
    }

    /// Appends an entry. The offset and position are trusted as given, ordering is up to the
    /// segment. Fails with `IndexFull` once there is no room left, at which point the segment must
    /// be rolled.
    pub fn write(&mut self, offset: u32, position: u64) -> Result<(), IndexError> {
        if self.is_full() {
            return Err(IndexError::IndexFull(self.name_string(), self.max_index_size));
        }
        let start = self.size as usize;
        let mut entry = &mut self.mmap[start..start + ENTRY_WIDTH];
        entry.put_u32(offset);
        entry.put_u64(position);
        self.size += ENTRY_WIDTH as u64;
        trace!(
            "OffsetIndex::write() {} entry {}: ({}, {})",
            self.name().display(),
            start / ENTRY_WIDTH,
            offset,
            position
        );
        Ok(())
    }

    /// Reads an entry in constant time. Any slot at or past the number of written entries,
    /// including `Last` on an empty index, is an `EndOfIndex` error.
    pub fn read(&self, slot: IndexSlot) -> Result<OffsetPosition, IndexError> {
        let entry_number = match slot {
            IndexSlot::Last if self.size == 0 => {
                return Err(IndexError::EndOfIndex(self.name_string(), slot));
            },
            IndexSlot::Last => self.entries() - 1,
            IndexSlot::Absolute(n) => n,
        };
        if entry_number >= self.entries() {
            return Err(IndexError::EndOfIndex(self.name_string(), slot));
        }
        let start = entry_number as usize * ENTRY_WIDTH;
        let mut entry = &self.mmap[start..start + ENTRY_WIDTH];
        let offset = entry.get_u32();
        let position = entry.get_u64();
        Ok(OffsetPosition { offset, position })
    }

    /// The path of the backing file
    pub fn name(&self) -> &Path {
        self.file.path()
    }

    fn name_string(&self) -> String {
        self.name().display().to_string()
    }

    /// Commits the mapped region to disk without closing the index.
    pub fn flush(&self) -> Result<(), IndexError> {
        self.mmap.flush()?;
        Ok(())
    }

    /// The number of entries written
    pub fn entries(&self) -> u64 {
        self.size / ENTRY_WIDTH as u64
    }

    /// The number of entries that fit in the index
    pub fn max_entries(&self) -> u64 {
        self.max_index_size / ENTRY_WIDTH as u64
    }

    pub fn is_full(&self) -> bool {
        self.size + ENTRY_WIDTH as u64 > self.mmap.len() as u64
    }

    /// Bytes taken by the written entries
    pub fn size_in_bytes(&self) -> u64 {
        self.size
    }

    pub fn max_index_size(&self) -> u64 {
        self.max_index_size
    }

    /// Flushes the entries and truncates the file to exactly the used bytes, then releases the
    /// mapping and the file handle. On error the mapping and handle are still released, but the
    /// entries must not be assumed durable.
    pub fn close(mut self) -> Result<(), IndexError> {
        self.closed = true;
        self.trim_to_valid_size()?;
        debug!("Closed offset index {} with {} entries", self.name().display(), self.entries());
        Ok(())
    }

    fn trim_to_valid_size(&mut self) -> Result<(), IndexError> {
        self.mmap.flush()?;
        // The mapping outlives the truncation, the region past `size` is never touched again.
        self.file.set_len(self.size)?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for OffsetIndex {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.trim_to_valid_size() {
            warn!("Unable to trim offset index {} on drop: {}", self.name().display(), err);
        }
    }
}

fn round_down_to_entry(bytes: u64) -> u64 {
    bytes - bytes % ENTRY_WIDTH as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::log_config::SegmentConfig;
    use tempfile::TempDir;

    fn config(max_index_bytes: u64) -> Config {
        Config { segment: SegmentConfig { max_index_bytes } }
    }

    fn index_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("00000000000000000000.index")
    }

    fn open_rw(path: &Path) -> File {
        OpenOptions::new().read(true).write(true).create(true).open(path).unwrap()
    }

    #[test_log::test]
    fn it_reads_empty_index_as_end_of_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let idx = OffsetIndex::new(open_rw(&path), &config(1024)).unwrap();
        assert_eq!(idx.name(), path.as_path());
        assert!(idx.read(IndexSlot::Last).unwrap_err().is_end_of_index());
        assert!(idx.read(IndexSlot::Absolute(0)).unwrap_err().is_end_of_index());
        assert_eq!(idx.entries(), 0);
        // The file is preallocated while open
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 1020);
        idx.close().unwrap();
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 0);
    }

    #[test_log::test]
    fn it_writes_and_reads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let mut idx = OffsetIndex::new(open_rw(&path), &config(1024)).unwrap();
        let entries = [
            OffsetPosition { offset: 0, position: 0 },
            OffsetPosition { offset: 1, position: 10 },
        ];
        for (n, want) in entries.iter().enumerate() {
            idx.write(want.offset, want.position).unwrap();
            assert_eq!(idx.read(IndexSlot::Absolute(n as u64)).unwrap(), *want);
            assert_eq!(idx.read(IndexSlot::Last).unwrap(), *want);
        }
        assert_eq!(idx.entries(), 2);
        assert_eq!(idx.size_in_bytes(), 24);
        let err = idx.read(IndexSlot::Absolute(entries.len() as u64)).unwrap_err();
        assert!(err.is_end_of_index());
        idx.close().unwrap();
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 24);
    }

    #[test_log::test]
    fn it_builds_index_state_from_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let mut idx = OffsetIndex::new(open_rw(&path), &config(1024)).unwrap();
        idx.write(0, 0).unwrap();
        idx.write(1, 10).unwrap();
        let last_before_close = idx.read(IndexSlot::Last).unwrap();
        idx.close().unwrap();

        let mut idx = OffsetIndex::new(open_rw(&path), &config(1024)).unwrap();
        assert_eq!(idx.read(IndexSlot::Last).unwrap(), last_before_close);
        assert_eq!(idx.read(IndexSlot::Last).unwrap(), OffsetPosition { offset: 1, position: 10 });
        assert_eq!(idx.entries(), 2);
        assert_eq!(idx.size_in_bytes(), 24);
        // Appending continues after the recovered entries
        idx.write(2, 25).unwrap();
        assert_eq!(idx.read(IndexSlot::Absolute(0)).unwrap(), OffsetPosition {
            offset: 0,
            position: 0
        });
        assert_eq!(idx.read(IndexSlot::Absolute(2)).unwrap(), OffsetPosition {
            offset: 2,
            position: 25
        });
        idx.close().unwrap();
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 36);
    }

    #[test_log::test]
    fn it_errors_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = OffsetIndex::open(index_path(&dir), &config(2 * ENTRY_WIDTH as u64)).unwrap();
        assert_eq!(idx.max_entries(), 2);
        idx.write(0, 0).unwrap();
        assert!(!idx.is_full());
        idx.write(1, 10).unwrap();
        assert!(idx.is_full());
        assert!(matches!(idx.write(2, 20), Err(IndexError::IndexFull(_, 24))));
        assert_eq!(idx.read(IndexSlot::Absolute(0)).unwrap(), OffsetPosition {
            offset: 0,
            position: 0
        });
        assert_eq!(idx.read(IndexSlot::Last).unwrap(), OffsetPosition { offset: 1, position: 10 });
    }

    #[test]
    fn it_rounds_capacity_down_to_whole_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let mut idx = OffsetIndex::open(&path, &config(30)).unwrap();
        assert_eq!(idx.max_index_size(), 24);
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 24);
        idx.write(0, 0).unwrap();
        idx.write(1, 1).unwrap();
        assert!(matches!(idx.write(2, 2), Err(IndexError::IndexFull(_, _))));
    }

    #[test]
    fn it_rejects_capacity_below_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let res = OffsetIndex::open(index_path(&dir), &config(11));
        assert!(matches!(res, Err(IndexError::InvalidMaxIndexSize(_, 11))));
    }

    #[test]
    fn it_encodes_entries_big_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let mut idx = OffsetIndex::open(&path, &config(1024)).unwrap();
        idx.write(0x0102_0304, 0x0506_0708_090a_0b0c).unwrap();
        idx.close().unwrap();
        let raw = fs_err::read(&path).unwrap();
        assert_eq!(raw, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn it_refuses_partial_entries_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        fs_err::write(&path, [0u8; 13]).unwrap();
        let res = OffsetIndex::open(&path, &config(1024));
        assert!(matches!(res, Err(IndexError::CorruptIndex(_, 13))));
        // Nothing was preallocated
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 13);
    }

    #[test]
    fn it_reports_growth_failure_and_keeps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        fs_err::write(&path, [0u8; 24]).unwrap();
        let read_only = OpenOptions::new().read(true).open(&path).unwrap();
        let res = OffsetIndex::new(read_only, &config(1024));
        assert!(matches!(res, Err(IndexError::Io(_))));
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 24);
    }

    #[test]
    fn it_reports_mapping_failure_and_restores_the_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        fs_err::write(&path, [0u8; 24]).unwrap();
        // Growing works on a write-only handle, mapping it does not.
        let write_only = OpenOptions::new().write(true).open(&path).unwrap();
        match OffsetIndex::new(write_only, &config(1024)) {
            Err(IndexError::Io(err)) => {
                assert!(err.to_string().contains(&path.display().to_string()))
            },
            other => panic!("expected an Io error, got {:?}", other),
        }
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 24);
    }

    #[test]
    fn it_does_not_create_missing_files_when_opening_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let res = OffsetIndex::open_existing(&path, &config(1024));
        assert!(matches!(res, Err(IndexError::Io(_))));
        assert!(!path.exists());

        let mut idx = OffsetIndex::open(&path, &config(1024)).unwrap();
        idx.write(3, 33).unwrap();
        idx.close().unwrap();
        let idx = OffsetIndex::open_existing(&path, &config(1024)).unwrap();
        assert_eq!(idx.read(IndexSlot::Last).unwrap(), OffsetPosition { offset: 3, position: 33 });
    }

    #[test]
    fn it_refuses_existing_file_above_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        let mut idx = OffsetIndex::open(&path, &config(1024)).unwrap();
        for n in 0..3 {
            idx.write(n, u64::from(n) * 100).unwrap();
        }
        idx.close().unwrap();
        let res = OffsetIndex::open(&path, &config(24));
        assert!(matches!(res, Err(IndexError::IndexSizeAboveMax(_, 36, 24))));
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 36);
    }

    #[test_log::test]
    fn it_trims_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(&dir);
        {
            let mut idx = OffsetIndex::open(&path, &config(1024)).unwrap();
            idx.write(0, 7).unwrap();
            idx.flush().unwrap();
        }
        assert_eq!(fs_err::metadata(&path).unwrap().len(), 12);
        let idx = OffsetIndex::open(&path, &config(1024)).unwrap();
        assert_eq!(idx.read(IndexSlot::Last).unwrap(), OffsetPosition { offset: 0, position: 7 });
    }

    #[test]
    fn it_maps_signed_entry_numbers_to_slots() {
        assert_eq!(IndexSlot::try_from(-1).unwrap(), IndexSlot::Last);
        assert_eq!(IndexSlot::try_from(0).unwrap(), IndexSlot::Absolute(0));
        assert_eq!(IndexSlot::try_from(41).unwrap(), IndexSlot::Absolute(41));
        assert!(IndexSlot::try_from(-2).unwrap_err().is_end_of_index());
    }
}
