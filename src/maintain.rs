//! Offline maintenance: defragmentation and whole-image resizing.
//!
//! All three operations move the index region wholesale.  Defragmentation
//! additionally slides every file extent down toward the start of the data
//! region; because files are processed in ascending extent order, each copy
//! writes into blocks that are either free or already vacated, so a plain
//! forward copy never clobbers a file that has not moved yet.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::codec;
use crate::entry::{Entry, ENTRY_SIZE, TYPE_FILE, TYPE_UNUSED, TYPE_VOL_ID};
use crate::error::SfsError;
use crate::volume::{Volume, DEFAULT_LABEL};

impl Volume {
    /// Compact all file extents to the low end of the data region and
    /// rewrite the index: non-file entries first, then files in their new
    /// physical order, unused fill, and the volume label pinned to the
    /// final slot.
    pub fn defrag(&mut self) -> Result<(), SfsError> {
        self.rebuild()?;
        let block_size = self.superblock.block_size();

        let mut label: Option<Entry> = None;
        let mut others: Vec<Entry> = Vec::new();
        let mut files: Vec<Entry> = Vec::new();
        for e in &self.index.entries {
            match e.entry_type() {
                TYPE_UNUSED => {}
                TYPE_VOL_ID => label = Some(e.clone()),
                TYPE_FILE => files.push(e.clone()),
                _ => others.push(e.clone()),
            }
        }
        let label = label.unwrap_or_else(|| {
            tracing::warn!("volume label entry missing; synthesizing one");
            Entry::volume_label(DEFAULT_LABEL, codec::timestamp_now())
        });
        files.sort_by_key(Entry::extent_start);

        tracing::info!(files = files.len(), "defragmenting volume");
        let mut cursor = self.superblock.data_start();
        for f in &mut files {
            let length = f.length();
            let needed = length.div_ceil(block_size);
            if needed == 0 {
                f.set_extent(0, 0);
                f.update_crc();
                continue;
            }
            let old_start = f.extent_start();
            let new_start = cursor;
            if old_start != new_start {
                let mut payload = vec![0u8; length as usize];
                self.file
                    .seek(SeekFrom::Start(old_start * block_size))
                    .map_err(|e| io_err("seeking to old extent", e))?;
                self.file
                    .read_exact(&mut payload)
                    .map_err(|e| io_err("reading extent during defrag", e))?;
                self.file
                    .seek(SeekFrom::Start(new_start * block_size))
                    .map_err(|e| io_err("seeking to compacted extent", e))?;
                self.file
                    .write_all(&payload)
                    .map_err(|e| io_err("moving extent during defrag", e))?;
                let pad = (needed * block_size) as usize - payload.len();
                if pad > 0 {
                    self.file
                        .write_all(&vec![0u8; pad])
                        .map_err(|e| io_err("padding moved extent", e))?;
                }
            }
            f.set_extent(new_start, new_start + needed - 1);
            f.update_crc();
            cursor += needed;
        }
        self.superblock.data_size = cursor - self.superblock.data_start();

        let index_size = self.superblock.index_size as usize;
        let mut region = Vec::with_capacity(index_size);
        for e in others.iter().chain(files.iter()) {
            region.extend_from_slice(&e.raw);
            for cont in &e.continuations {
                region.extend_from_slice(cont);
            }
        }
        if region.len() > index_size - ENTRY_SIZE {
            tracing::warn!("index region overflowed during rewrite; truncating");
            region.truncate(index_size - ENTRY_SIZE);
        }
        while region.len() < index_size - ENTRY_SIZE {
            region.extend_from_slice(&Entry::unused(0).raw);
        }
        region.extend_from_slice(&label.raw);

        self.file
            .seek(SeekFrom::Start(self.superblock.index_offset()))
            .map_err(|e| io_err("seeking to index region", e))?;
        self.file
            .write_all(&region)
            .map_err(|e| io_err("rewriting index region", e))?;

        self.commit_super()?;
        self.rebuild()?;
        tracing::info!(
            data_blocks = self.superblock.data_size,
            "defragmentation complete"
        );
        Ok(())
    }

    /// Truncate the image to the smallest size that still holds the
    /// reserved region, the data region, and the index.  The index itself
    /// never shrinks.
    pub fn shrink_to_fit(&mut self) -> Result<(), SfsError> {
        let block_size = self.superblock.block_size();
        let new_total = self.superblock.data_start()
            + self.superblock.data_size
            + self.superblock.index_blocks();
        if new_total >= self.superblock.total_blocks {
            tracing::info!("volume already at minimum size");
            return Ok(());
        }

        let index = self.read_index_bytes()?;
        let new_offset = new_total * block_size - self.superblock.index_size;
        self.file
            .seek(SeekFrom::Start(new_offset))
            .map_err(|e| io_err("seeking to new index location", e))?;
        self.file
            .write_all(&index)
            .map_err(|e| io_err("relocating index region", e))?;
        self.file
            .set_len(new_total * block_size)
            .map_err(|e| io_err("truncating image", e))?;

        self.superblock.total_blocks = new_total;
        self.commit_super()?;
        self.rebuild()?;
        tracing::info!(total_blocks = new_total, "shrink complete");
        Ok(())
    }

    /// Grow the image to `new_byte_size` (rounded down to whole blocks),
    /// moving the index region to the new tail.  Shrinking goes through
    /// [`Volume::shrink_to_fit`] instead.
    pub fn resize(&mut self, new_byte_size: u64) -> Result<(), SfsError> {
        let block_size = self.superblock.block_size();
        let new_total = new_byte_size / block_size;
        if new_total <= self.superblock.total_blocks {
            return Err(SfsError::InvalidSize {
                message: "new size must exceed the current size (use `shrink` to reduce)".into(),
            });
        }

        let index = self.read_index_bytes()?;
        let old_offset = self.superblock.index_offset();
        let new_offset = new_total * block_size - self.superblock.index_size;
        self.file
            .set_len(new_total * block_size)
            .map_err(|e| io_err("extending image", e))?;
        self.file
            .seek(SeekFrom::Start(new_offset))
            .map_err(|e| io_err("seeking to new index location", e))?;
        self.file
            .write_all(&index)
            .map_err(|e| io_err("relocating index region", e))?;
        // clear the stale bytes below the relocated region; the old and new
        // locations overlap when the image grew by less than the index size
        let stale = (new_offset - old_offset).min(self.superblock.index_size);
        self.file
            .seek(SeekFrom::Start(old_offset))
            .map_err(|e| io_err("seeking to stale index copy", e))?;
        self.file
            .write_all(&vec![0u8; stale as usize])
            .map_err(|e| io_err("clearing stale index copy", e))?;

        self.superblock.total_blocks = new_total;
        self.commit_super()?;
        self.rebuild()?;
        tracing::info!(total_blocks = new_total, "resized volume");
        Ok(())
    }

    fn read_index_bytes(&mut self) -> Result<Vec<u8>, SfsError> {
        let mut buf = vec![0u8; self.superblock.index_size as usize];
        self.file
            .seek(SeekFrom::Start(self.superblock.index_offset()))
            .map_err(|e| io_err("seeking to index region", e))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| io_err("reading index region", e))?;
        Ok(buf)
    }
}

fn io_err(context: &str, source: std::io::Error) -> SfsError {
    SfsError::Io {
        context: context.to_string(),
        source,
    }
}
