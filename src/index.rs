//! The index region: a trailing array of 64-byte entry slots.
//!
//! The index occupies the last `index_size` bytes of the image and grows
//! *downward*: when no free run of slots can hold a new entry, one more
//! block is carved off the top of the free data area and prepended below
//! the existing region.  The `START` sentinel always sits in the lowest-
//! addressed slot and the volume label in the highest-addressed one, so a
//! reader can recognize both ends of the region.
//!
//! Parsing walks slots left-to-right.  A primary slot consumes its claimed
//! continuation slots; running out of slots mid-chain means the region is
//! corrupt.  Slots with an unknown tag, and live entries whose CRC does not
//! sum out, are logged and treated as unused so that one bad slot does not
//! take down the whole volume.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::entry::{
    Entry, ENTRY_SIZE, TYPE_DIR, TYPE_DIR_DEL, TYPE_FILE, TYPE_FILE_DEL, TYPE_START,
    TYPE_UNUSED, TYPE_VOL_ID,
};
use crate::error::SfsError;
use crate::superblock::Superblock;

/// Parsed view of the index region, in physical slot order.  Unused slots
/// are kept as entries so free-run scans can work off this list alone.
#[derive(Debug, Default)]
pub struct Index {
    pub entries: Vec<Entry>,
    pub slot_count: usize,
}

impl Index {
    /// Read the index region from the image and parse it.
    pub fn read(file: &mut File, sb: &Superblock) -> Result<Self, SfsError> {
        let mut raw = vec![0u8; sb.index_size as usize];
        file.seek(SeekFrom::Start(sb.index_offset()))
            .map_err(|e| SfsError::Io {
                context: "seeking to index region".into(),
                source: e,
            })?;
        file.read_exact(&mut raw).map_err(|_| SfsError::Corrupt {
            reason: "index region extends past the end of the image".into(),
        })?;
        Self::parse(&raw)
    }

    /// Parse a raw index region into entries.
    pub fn parse(raw: &[u8]) -> Result<Self, SfsError> {
        let slot_count = raw.len() / ENTRY_SIZE;
        let mut entries = Vec::new();
        let mut i = 0;
        while i < slot_count {
            let chunk: [u8; ENTRY_SIZE] = raw[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE]
                .try_into()
                .unwrap();
            match chunk[0] {
                TYPE_UNUSED => {
                    entries.push(Entry::from_raw(chunk, i));
                    i += 1;
                }
                TYPE_VOL_ID | TYPE_START => {
                    let e = Entry::from_raw(chunk, i);
                    if e.crc_ok() {
                        entries.push(e);
                    } else {
                        tracing::warn!(slot = i, tag = chunk[0], "entry failed checksum; treating slot as unused");
                        entries.push(Entry::unused(i));
                    }
                    i += 1;
                }
                TYPE_DIR | TYPE_FILE | TYPE_DIR_DEL | TYPE_FILE_DEL => {
                    let num_cont = chunk[2] as usize;
                    // a chain running off the end of the region is not a
                    // per-slot defect: the whole index is unwalkable
                    Entry::from_raw(chunk, i)
                        .check_continuations(slot_count - i - 1)
                        .map_err(|err| SfsError::Corrupt {
                            reason: err.to_string(),
                        })?;
                    let continuations = (1..=num_cont)
                        .map(|k| {
                            raw[(i + k) * ENTRY_SIZE..(i + k + 1) * ENTRY_SIZE]
                                .try_into()
                                .unwrap()
                        })
                        .collect();
                    let e = Entry {
                        raw: chunk,
                        continuations,
                        slot: i,
                    };
                    // tombstones are written by rewriting the tag byte only,
                    // so their CRC is allowed to be stale
                    if e.is_tombstone() || e.crc_ok() {
                        entries.push(e);
                    } else {
                        tracing::warn!(
                            slot = i,
                            name = %e.name(),
                            "entry failed checksum; treating its slots as unused"
                        );
                        for k in 0..=num_cont {
                            entries.push(Entry::unused(i + k));
                        }
                    }
                    i += 1 + num_cont;
                }
                other => {
                    tracing::warn!(slot = i, tag = other, "unknown entry type; treating slot as unused");
                    entries.push(Entry::unused(i));
                    i += 1;
                }
            }
        }
        Ok(Self {
            entries,
            slot_count,
        })
    }

    /// First run of at least `needed` consecutive reusable slots, lowest
    /// physical address wins.  Unused slots and tombstones — including the
    /// continuation slots of tombstones — all count as free.
    pub fn find_free_run(&self, needed: usize) -> Option<usize> {
        if needed == 0 {
            return None;
        }
        let mut free = vec![false; self.slot_count];
        for e in &self.entries {
            if e.is_reusable() {
                for s in e.slot..e.slot + e.slots() {
                    free[s] = true;
                }
            }
        }
        let mut run = 0;
        for (s, &f) in free.iter().enumerate() {
            if f {
                run += 1;
                if run == needed {
                    return Some(s + 1 - needed);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Live entries only (files and directories).
    pub fn live(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|e| e.is_file() || e.is_dir())
    }
}

/// Extend the index region by one block, downward.
///
/// The block immediately below the current region must not hold file data.
/// The `START` sentinel is relocated to the first slot of the new block and
/// its old slot freed, then the whole region is rewritten at the new, lower
/// offset and the grown `index_size` persisted.
pub fn grow_one_block(file: &mut File, sb: &mut Superblock) -> Result<(), SfsError> {
    let block_size = sb.block_size();
    if sb.total_blocks - sb.index_blocks() <= sb.data_start() + sb.data_size {
        return Err(SfsError::NoSpace);
    }

    let old_offset = sb.index_offset();
    let mut old = vec![0u8; sb.index_size as usize];
    file.seek(SeekFrom::Start(old_offset))
        .map_err(|e| io_err("seeking to index region", e))?;
    file.read_exact(&mut old)
        .map_err(|e| io_err("reading index region", e))?;

    let mut block = Vec::with_capacity(block_size as usize);
    for s in 0..(block_size as usize / ENTRY_SIZE) {
        block.extend_from_slice(&Entry::unused(s).raw);
    }
    if old[0] == TYPE_START {
        block[..ENTRY_SIZE].copy_from_slice(&old[..ENTRY_SIZE]);
        old[..ENTRY_SIZE].copy_from_slice(&Entry::unused(0).raw);
    }

    let new_offset = old_offset - block_size;
    file.seek(SeekFrom::Start(new_offset))
        .map_err(|e| io_err("seeking to grown index region", e))?;
    file.write_all(&block)
        .map_err(|e| io_err("writing new index block", e))?;
    file.write_all(&old)
        .map_err(|e| io_err("rewriting index region", e))?;

    sb.index_size += block_size;
    sb.store(file)?;
    tracing::debug!(index_size = sb.index_size, "index grew by one block");
    Ok(())
}

fn io_err(context: &str, source: std::io::Error) -> SfsError {
    SfsError::Io {
        context: context.to_string(),
        source,
    }
}
