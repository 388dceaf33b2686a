//! Contiguous extent allocation over the data region.
//!
//! Files occupy exactly one contiguous block range, so allocation is a
//! first-fit scan over the gaps between live extents: start at the first
//! data block, walk the sorted (merged) extents, and take the first gap
//! wide enough.  If no gap between files fits, the trailing gap up to the
//! index region is considered; taking it may push `data_size` outward.
//! Deleting a file simply tombstones its entry, so its blocks reappear as
//! a gap on the next scan — there is no free list to maintain.

use crate::entry::Entry;
use crate::error::SfsError;
use crate::superblock::Superblock;

/// Sorted, merged extents of all live files.  Zero-length files carry no
/// extent (both fields zero) and are skipped.
pub fn live_extents(entries: &[Entry]) -> Vec<(u64, u64)> {
    let mut extents: Vec<(u64, u64)> = entries
        .iter()
        .filter(|e| e.is_file() && e.extent_start() > 0)
        .map(|e| (e.extent_start(), e.extent_end()))
        .collect();
    extents.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(extents.len());
    for (start, end) in extents {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end + 1 => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Blocks held by live file extents.
pub fn used_blocks(entries: &[Entry]) -> u64 {
    entries
        .iter()
        .filter(|e| e.is_file())
        .map(|e| {
            let (start, end) = (e.extent_start(), e.extent_end());
            if start > 0 && end >= start {
                end - start + 1
            } else {
                0
            }
        })
        .sum()
}

/// Blocks not covered by the reserved region, the index region, or any
/// live extent.
pub fn free_block_count(sb: &Superblock, entries: &[Entry]) -> u64 {
    sb.total_blocks - sb.data_start() - sb.index_blocks() - used_blocks(entries)
}

/// Place `needed` contiguous blocks, reusing the first gap that fits.
///
/// When only the trailing gap fits, `data_size` is advanced in memory to
/// cover the new extent — the caller persists the superblock when its
/// operation commits.
pub fn allocate(
    sb: &mut Superblock,
    entries: &[Entry],
    needed: u64,
) -> Result<u64, SfsError> {
    if needed == 0 {
        return Ok(0);
    }
    let mut cursor = sb.data_start();
    for (start, end) in live_extents(entries) {
        if start - cursor >= needed {
            tracing::debug!(start = cursor, blocks = needed, "reusing gap between extents");
            return Ok(cursor);
        }
        cursor = end + 1;
    }
    let index_start = sb.total_blocks - sb.index_blocks();
    if index_start - cursor >= needed {
        let new_end = cursor + needed;
        if new_end > sb.data_start() + sb.data_size {
            sb.data_size = new_end - sb.data_start();
        }
        tracing::debug!(start = cursor, blocks = needed, "allocated at data tail");
        return Ok(cursor);
    }
    Err(SfsError::NoSpace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superblock::DEFAULT_BLOCK_EXP;

    fn sb(total: u64, data: u64, index_bytes: u64) -> Superblock {
        Superblock {
            timestamp: 0,
            data_size: data,
            index_size: index_bytes,
            total_blocks: total,
            rsvd_blocks: 1,
            block_exp: DEFAULT_BLOCK_EXP,
        }
    }

    fn file(start: u64, end: u64, length: u64) -> Entry {
        Entry::new_file("f", 0, start, end, length)
    }

    #[test]
    fn empty_volume_allocates_at_data_start() {
        let mut s = sb(128, 0, 512);
        let start = allocate(&mut s, &[], 4).unwrap();
        assert_eq!(start, 1);
        assert_eq!(s.data_size, 4);
    }

    #[test]
    fn first_fit_reuses_gap() {
        // extents [1,2] and [5,6]; gap [3,4] fits two blocks
        let entries = vec![file(1, 2, 1024), file(5, 6, 1024)];
        let mut s = sb(128, 6, 512);
        assert_eq!(allocate(&mut s, &entries, 2).unwrap(), 3);
        // gap untouched when too narrow
        assert_eq!(allocate(&mut s, &entries, 3).unwrap(), 7);
        assert_eq!(s.data_size, 9);
    }

    #[test]
    fn tail_allocation_advances_data_size() {
        let entries = vec![file(1, 4, 2048)];
        let mut s = sb(128, 4, 512);
        let start = allocate(&mut s, &entries, 8).unwrap();
        assert_eq!(start, 5);
        assert_eq!(s.data_size, 12);
    }

    #[test]
    fn allocation_respects_index_boundary() {
        // 16 blocks total, 1 reserved, 1 index block: 14 data blocks max
        let mut s = sb(16, 0, 512);
        assert_eq!(allocate(&mut s, &[], 14).unwrap(), 1);
        let entries = vec![file(1, 14, 14 * 512)];
        assert!(matches!(
            allocate(&mut s, &entries, 1),
            Err(SfsError::NoSpace)
        ));
    }

    #[test]
    fn zero_length_files_hold_no_blocks() {
        let entries = vec![file(0, 0, 0)];
        assert_eq!(used_blocks(&entries), 0);
        assert!(live_extents(&entries).is_empty());
    }

    #[test]
    fn free_count_identity() {
        // free + used + index + reserved == total
        let entries = vec![file(1, 2, 1024), file(7, 9, 1500)];
        let s = sb(64, 9, 1024);
        let free = free_block_count(&s, &entries);
        assert_eq!(free + used_blocks(&entries) + s.index_blocks() + s.data_start(), 64);
    }

    #[test]
    fn adjacent_extents_merge() {
        let entries = vec![file(1, 2, 1024), file(3, 4, 1024)];
        assert_eq!(live_extents(&entries), vec![(1, 4)]);
    }
}
