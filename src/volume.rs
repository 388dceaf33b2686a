//! The volume engine: one open SFS image plus the state derived from it.
//!
//! A volume is a host file laid out, at block granularity, as three regions:
//!
//! ```text
//! ┌──────────────┬────────────────────────────────┬───────────────┐
//! │ Reserved     │ Data                           │ Index         │
//! │ blocks       │ file payloads, each one        │ 64-byte entry │
//! │ (superblock  │ contiguous extent              │ slots, grows  │
//! │  at 0x18E)   │                                │ ← downward    │
//! └──────────────┴────────────────────────────────┴───────────────┘
//! ```
//!
//! Directories are pure index entries — a file's full path is its name
//! field, so there are no per-directory child lists on disk.  The engine
//! keeps two derived maps, `by_path` and `children_of`, and rebuilds them
//! from the on-disk index after every mutation rather than maintaining
//! them incrementally.
//!
//! Mutations are ordered so that an interrupted operation leaves a
//! parseable image: payload bytes go to freshly allocated blocks first,
//! index entries next, tombstone bytes after that, and the superblock —
//! the only carrier of the volume geometry — last.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::alloc;
use crate::codec;
use crate::entry::{Entry, ENTRY_SIZE, TYPE_DIR_DEL, TYPE_FILE_DEL, TYPE_VOL_ID};
use crate::error::SfsError;
use crate::index::{self, Index};
use crate::superblock::{Superblock, DEFAULT_BLOCK_EXP};

/// Label written into the volume-id entry of freshly formatted images.
pub const DEFAULT_LABEL: &str = "SFS_VOLUME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct FileStat {
    pub kind: NodeKind,
    /// Length in bytes; always 0 for directories.
    pub length: u64,
    /// Modification time, whole seconds since the Unix epoch.
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
}

pub struct Volume {
    pub(crate) file: File,
    pub superblock: Superblock,
    pub(crate) index: Index,
    pub(crate) by_path: HashMap<String, usize>,
    pub(crate) children_of: HashMap<String, BTreeSet<String>>,
    write_buffers: HashMap<String, Vec<u8>>,
    next_handle: u64,
}

/// Strip the leading `/` and fold backslashes; the empty string is root.
pub fn normalize(path: &str) -> String {
    let forward = path.replace('\\', "/");
    forward.trim_start_matches('/').to_string()
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

impl Volume {
    /// Open an existing image.
    pub fn open(path: &Path) -> Result<Self, SfsError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_err(format!("opening image {}", path.display()), e))?;
        let superblock = Superblock::load(&mut file)?;
        if superblock.data_start() + superblock.data_size + superblock.index_blocks()
            > superblock.total_blocks
        {
            return Err(SfsError::Corrupt {
                reason: "region sizes exceed the total volume size".into(),
            });
        }
        let mut vol = Self {
            file,
            superblock,
            index: Index::default(),
            by_path: HashMap::new(),
            children_of: HashMap::new(),
            write_buffers: HashMap::new(),
            next_handle: 3,
        };
        vol.rebuild()?;
        Ok(vol)
    }

    /// Create and format a fresh image of (at most) `size_bytes` bytes,
    /// rounded down to whole 512-byte blocks.
    pub fn format(path: &Path, size_bytes: u64) -> Result<Self, SfsError> {
        let block_size: u64 = 1 << (DEFAULT_BLOCK_EXP + 7);
        let total_blocks = size_bytes / block_size;
        if total_blocks < 2 {
            return Err(SfsError::InvalidSize {
                message: format!(
                    "image must hold at least 2 blocks ({} bytes)",
                    2 * block_size
                ),
            });
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| io_err(format!("creating image {}", path.display()), e))?;
        file.set_len(total_blocks * block_size)
            .map_err(|e| io_err("sizing image", e))?;

        // reserved region first, superblock inside it
        file.seek(SeekFrom::Start(0))
            .map_err(|e| io_err("seeking to reserved region", e))?;
        file.write_all(&vec![0u8; block_size as usize])
            .map_err(|e| io_err("zeroing reserved region", e))?;
        let superblock = Superblock {
            timestamp: codec::timestamp_now(),
            data_size: 0,
            index_size: block_size,
            total_blocks,
            rsvd_blocks: 1,
            block_exp: DEFAULT_BLOCK_EXP,
        };
        superblock.store(&mut file)?;

        // one index block: START low, UNUSED middle, volume label high
        let slots = (block_size as usize) / ENTRY_SIZE;
        let mut region = Vec::with_capacity(block_size as usize);
        region.extend_from_slice(&Entry::start_marker().raw);
        for s in 1..slots - 1 {
            region.extend_from_slice(&Entry::unused(s).raw);
        }
        region.extend_from_slice(
            &Entry::volume_label(DEFAULT_LABEL, superblock.timestamp).raw,
        );
        file.seek(SeekFrom::Start(superblock.index_offset()))
            .map_err(|e| io_err("seeking to index region", e))?;
        file.write_all(&region)
            .map_err(|e| io_err("writing initial index", e))?;

        tracing::info!(path = %path.display(), total_blocks, "formatted volume");
        let mut vol = Self {
            file,
            superblock,
            index: Index::default(),
            by_path: HashMap::new(),
            children_of: HashMap::new(),
            write_buffers: HashMap::new(),
            next_handle: 3,
        };
        vol.rebuild()?;
        Ok(vol)
    }

    /// Re-read the index from disk and rebuild the derived path maps.
    pub(crate) fn rebuild(&mut self) -> Result<(), SfsError> {
        self.index = Index::read(&mut self.file, &self.superblock)?;
        self.by_path.clear();
        self.children_of.clear();
        self.children_of.insert(String::new(), BTreeSet::new());
        for (i, e) in self.index.entries.iter().enumerate() {
            if !(e.is_file() || e.is_dir()) {
                continue;
            }
            let path = e.name();
            let (parent, name) = split_parent(&path);
            self.children_of
                .entry(parent.to_string())
                .or_default()
                .insert(name.to_string());
            self.by_path.insert(path, i);
        }
        Ok(())
    }

    /// Refresh the modification timestamp and persist the superblock.
    /// Called exactly once, last, by every committed mutation.
    pub(crate) fn commit_super(&mut self) -> Result<(), SfsError> {
        self.superblock.timestamp = codec::timestamp_now();
        self.superblock.store(&mut self.file)
    }

    fn lookup(&self, path: &str) -> Result<&Entry, SfsError> {
        self.by_path
            .get(path)
            .map(|&i| &self.index.entries[i])
            .ok_or_else(|| SfsError::NotFound {
                path: path.to_string(),
            })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.by_path.contains_key(&normalize(path))
    }

    /// The volume label, if the volume-id entry is present.
    pub fn label(&self) -> Option<String> {
        self.index
            .entries
            .iter()
            .find(|e| e.entry_type() == TYPE_VOL_ID)
            .map(|e| e.name())
    }

    /// All live paths, sorted.
    pub fn all_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.by_path.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn stat(&self, path: &str) -> Result<FileStat, SfsError> {
        let p = normalize(path);
        if p.is_empty() {
            return Ok(FileStat {
                kind: NodeKind::Dir,
                length: 0,
                mtime: codec::timestamp_secs(self.superblock.timestamp),
            });
        }
        let e = self.lookup(&p)?;
        Ok(FileStat {
            kind: if e.is_dir() {
                NodeKind::Dir
            } else {
                NodeKind::File
            },
            length: if e.is_file() { e.length() } else { 0 },
            mtime: codec::timestamp_secs(e.timestamp()),
        })
    }

    /// Immediate child names of a directory, sorted.
    pub fn list(&self, dir_path: &str) -> Result<Vec<String>, SfsError> {
        let p = normalize(dir_path);
        if !p.is_empty() && !self.lookup(&p)?.is_dir() {
            return Err(SfsError::NotFound { path: p });
        }
        Ok(self
            .children_of
            .get(&p)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn statfs(&self) -> FsStats {
        FsStats {
            block_size: self.superblock.block_size(),
            total_blocks: self.superblock.total_blocks,
            free_blocks: alloc::free_block_count(&self.superblock, &self.index.entries),
        }
    }

    /// Read up to `length` bytes at `offset`, straight from the extent.
    /// Reads past the end of the file return fewer (possibly zero) bytes.
    pub fn read(&mut self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, SfsError> {
        let p = normalize(path);
        let e = self.lookup(&p)?;
        if !e.is_file() {
            return Err(SfsError::NotFound { path: p });
        }
        let file_len = e.length();
        if offset >= file_len {
            return Ok(Vec::new());
        }
        let n = (file_len - offset).min(length as u64) as usize;
        let pos = e.extent_start() * self.superblock.block_size() + offset;
        let mut buf = vec![0u8; n];
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| io_err("seeking to file extent", e))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| io_err("reading file extent", e))?;
        Ok(buf)
    }

    /// Create an empty file: a live entry with no extent.  Returns a handle
    /// for the caller's bookkeeping; the engine itself keys staged writes by
    /// path.
    pub fn create(&mut self, path: &str) -> Result<u64, SfsError> {
        let p = normalize(path);
        if p.is_empty() || self.by_path.contains_key(&p) {
            return Err(SfsError::AlreadyExists { path: p });
        }
        let entry = Entry::new_file(&p, codec::timestamp_now(), 0, 0, 0);
        self.write_entry(entry)?;
        self.commit_super()?;
        self.rebuild()?;
        self.next_handle += 1;
        tracing::debug!(path = %p, "created empty file");
        Ok(self.next_handle)
    }

    /// Stage bytes at `offset` into the in-memory buffer for `path`,
    /// zero-extending any gap.  Nothing reaches the image until `flush`.
    ///
    /// Growth is pre-checked against the free-block count so that a write
    /// accepted here cannot fail `flush` for lack of *total* space — only
    /// fragmentation can still defeat the flush.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, SfsError> {
        let p = normalize(path);
        let live = match self.by_path.get(&p) {
            Some(&i) => {
                let e = &self.index.entries[i];
                if e.is_dir() {
                    return Err(SfsError::NotFound { path: p });
                }
                Some((e.extent_start(), e.extent_end(), e.length()))
            }
            None => None,
        };

        if !self.write_buffers.contains_key(&p) {
            let initial = match live {
                Some((start, _, length)) if length > 0 => {
                    let pos = start * self.superblock.block_size();
                    let mut buf = vec![0u8; length as usize];
                    self.file
                        .seek(SeekFrom::Start(pos))
                        .map_err(|e| io_err("seeking to file extent", e))?;
                    self.file
                        .read_exact(&mut buf)
                        .map_err(|e| io_err("materializing write buffer", e))?;
                    buf
                }
                _ => Vec::new(),
            };
            self.write_buffers.insert(p.clone(), initial);
        }

        let end = offset + data.len() as u64;
        let required = end.div_ceil(self.superblock.block_size());
        let current = match live {
            Some((start, extent_end, _)) if start > 0 => extent_end - start + 1,
            _ => 0,
        };
        if required > current {
            let delta = required - current;
            let free = alloc::free_block_count(&self.superblock, &self.index.entries);
            if delta > free {
                return Err(SfsError::NoSpace);
            }
        }

        let buf = self.write_buffers.get_mut(&p).expect("buffer just ensured");
        if end as usize > buf.len() {
            buf.resize(end as usize, 0);
        }
        buf[offset as usize..end as usize].copy_from_slice(data);
        Ok(data.len())
    }

    /// Commit the staged buffer for `path` as a copy-on-write replacement.
    ///
    /// The new extent is reserved while the old file still counts as
    /// occupied, the payload lands in it, and only then is the old entry
    /// tombstoned and the fresh one written.  On allocation failure the
    /// staged content is unrecoverable, so the path is dropped entirely.
    pub fn flush(&mut self, path: &str) -> Result<(), SfsError> {
        let p = normalize(path);
        let Some(content) = self.write_buffers.remove(&p) else {
            return Ok(());
        };
        let block_size = self.superblock.block_size();
        let blocks = (content.len() as u64).div_ceil(block_size);

        let start = match alloc::allocate(&mut self.superblock, &self.index.entries, blocks) {
            Ok(start) => start,
            Err(err) => {
                if self.by_path.contains_key(&p) {
                    self.tombstone(&p)?;
                    self.commit_super()?;
                    self.rebuild()?;
                }
                tracing::debug!(path = %p, "flush failed, staged content dropped");
                return Err(err);
            }
        };

        if !content.is_empty() {
            self.file
                .seek(SeekFrom::Start(start * block_size))
                .map_err(|e| io_err("seeking to new extent", e))?;
            self.file
                .write_all(&content)
                .map_err(|e| io_err("writing file payload", e))?;
            let pad = (blocks * block_size) as usize - content.len();
            if pad > 0 {
                self.file
                    .write_all(&vec![0u8; pad])
                    .map_err(|e| io_err("padding final block", e))?;
            }
        }

        if self.by_path.contains_key(&p) {
            self.tombstone(&p)?;
            // re-parse so the tombstone's slots are reusable for the
            // replacement entry
            self.rebuild()?;
        }

        let (start, end, length) = if content.is_empty() {
            (0, 0, 0)
        } else {
            (start, start + blocks - 1, content.len() as u64)
        };
        let entry = Entry::new_file(&p, codec::timestamp_now(), start, end, length);
        self.write_entry(entry)?;
        self.commit_super()?;
        self.rebuild()?;
        tracing::debug!(path = %p, start, end, length, "flushed file");
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), SfsError> {
        let p = normalize(path);
        if !self.by_path.contains_key(&p) {
            return Err(SfsError::NotFound { path: p });
        }
        self.tombstone(&p)?;
        self.commit_super()?;
        self.rebuild()
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), SfsError> {
        let p = normalize(path);
        if p.is_empty() || self.by_path.contains_key(&p) {
            return Err(SfsError::AlreadyExists { path: p });
        }
        let entry = Entry::new_dir(&p, codec::timestamp_now());
        self.write_entry(entry)?;
        self.commit_super()?;
        self.rebuild()?;
        tracing::debug!(path = %p, "created directory");
        Ok(())
    }

    /// Remove an empty directory.  Emptiness means no live path extends
    /// `<dir>/` — a stricter check than the child map alone, so orphaned
    /// descendants still block removal.
    pub fn rmdir(&mut self, path: &str) -> Result<(), SfsError> {
        let p = normalize(path);
        if !self.lookup(&p)?.is_dir() {
            return Err(SfsError::NotFound { path: p });
        }
        let prefix = format!("{p}/");
        if self.by_path.keys().any(|k| k.starts_with(&prefix)) {
            return Err(SfsError::NotEmpty { path: p });
        }
        self.tombstone(&p)?;
        self.commit_super()?;
        self.rebuild()
    }

    /// Move an entry to a new path.  For files the extent fields are
    /// carried over — no payload is copied.  The replacement entry is
    /// written before the old one is tombstoned.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), SfsError> {
        let old_p = normalize(old);
        let new_p = normalize(new);
        if new_p.is_empty() || self.by_path.contains_key(&new_p) {
            return Err(SfsError::AlreadyExists { path: new_p });
        }
        let source = self.lookup(&old_p)?;
        let entry = if source.is_dir() {
            Entry::new_dir(&new_p, codec::timestamp_now())
        } else {
            Entry::new_file(
                &new_p,
                codec::timestamp_now(),
                source.extent_start(),
                source.extent_end(),
                source.length(),
            )
        };
        self.write_entry(entry)?;
        // slot numbers may have shifted if the index grew; relocate by path
        self.rebuild()?;
        self.tombstone(&old_p)?;
        self.commit_super()?;
        self.rebuild()?;
        tracing::debug!(from = %old_p, to = %new_p, "renamed");
        Ok(())
    }

    /// Overwrite the primary slot's tag byte with the matching tombstone
    /// code.  The CRC is deliberately left stale; tombstones are exempt
    /// from validation.
    fn tombstone(&mut self, path: &str) -> Result<(), SfsError> {
        let &i = self
            .by_path
            .get(path)
            .ok_or_else(|| SfsError::NotFound {
                path: path.to_string(),
            })?;
        let e = &self.index.entries[i];
        let code = if e.is_dir() { TYPE_DIR_DEL } else { TYPE_FILE_DEL };
        let pos = self.superblock.index_offset() + (e.slot * ENTRY_SIZE) as u64;
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| io_err("seeking to index slot", e))?;
        self.file
            .write_all(&[code])
            .map_err(|e| io_err("writing tombstone", e))?;
        Ok(())
    }

    /// Write an entry into the first free slot run, growing the index by
    /// one block (and retrying) as long as no run fits.
    fn write_entry(&mut self, entry: Entry) -> Result<(), SfsError> {
        let needed = entry.slots();
        loop {
            if let Some(slot) = self.index.find_free_run(needed) {
                let pos = self.superblock.index_offset() + (slot * ENTRY_SIZE) as u64;
                self.file
                    .seek(SeekFrom::Start(pos))
                    .map_err(|e| io_err("seeking to free index slots", e))?;
                self.file
                    .write_all(&entry.raw)
                    .map_err(|e| io_err("writing index entry", e))?;
                for cont in &entry.continuations {
                    self.file
                        .write_all(cont)
                        .map_err(|e| io_err("writing continuation slot", e))?;
                }
                tracing::debug!(slot, slots = needed, "wrote index entry");
                return Ok(());
            }
            index::grow_one_block(&mut self.file, &mut self.superblock)?;
            self.index = Index::read(&mut self.file, &self.superblock)?;
        }
    }
}

fn io_err(context: impl Into<String>, source: std::io::Error) -> SfsError {
    SfsError::Io {
        context: context.into(),
        source,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) fn temp_volume(size_bytes: u64) -> (tempfile::TempDir, Volume) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.sfs");
        let vol = Volume::format(&path, size_bytes).unwrap();
        (dir, vol)
    }

    /// Stage + flush in one go.
    pub(crate) fn put_file(vol: &mut Volume, path: &str, data: &[u8]) {
        vol.write(path, 0, data).unwrap();
        vol.flush(path).unwrap();
    }

    pub(crate) fn extent_of(vol: &Volume, path: &str) -> (u64, u64) {
        let i = vol.by_path[&normalize(path)];
        let e = &vol.index.entries[i];
        (e.extent_start(), e.extent_end())
    }
}
