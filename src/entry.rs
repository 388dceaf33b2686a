//! The 64-byte index entry — the only on-disk metadata record in SFS.
//!
//! Every object in the index (the volume label, the start sentinel, files,
//! directories, free slots, tombstones) is described by one 64-byte *primary
//! slot*, optionally followed by *continuation slots* that extend the name
//! field.  The first byte of a slot is its type tag:
//!
//! | Tag    | Meaning                                             |
//! |--------|-----------------------------------------------------|
//! | `0x01` | Volume label (highest-addressed slot of the index)  |
//! | `0x02` | Start sentinel (lowest-addressed slot of the index) |
//! | `0x10` | Unused slot                                         |
//! | `0x11` | Directory                                           |
//! | `0x12` | Regular file                                        |
//! | `0x19` | Deleted directory (tombstone)                       |
//! | `0x1A` | Deleted file (tombstone)                            |
//!
//! Primary slot layout for a file entry:
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! |   0    |   1  | Type tag                               |
//! |   1    |   1  | CRC (sums primary + continuations to 0) |
//! |   2    |   1  | Continuation slot count                |
//! |   3    |   8  | Timestamp (16.16 fixed-point, LE i64)  |
//! |  11    |   8  | Extent start block (LE u64)            |
//! |  19    |   8  | Extent end block, inclusive (LE u64)   |
//! |  27    |   8  | File length in bytes (LE u64)          |
//! |  35    |  29  | Name (UTF-8, NUL-terminated)           |
//!
//! Directory entries carry only the timestamp, with the name window starting
//! at byte 11 (53 bytes).  The volume label's name window starts at byte 12.
//!
//! A name longer than its primary window spills into whole 64-byte
//! continuation slots.  When the name exactly fills the last window there is
//! no in-band NUL, so a terminal zero-filled continuation is appended.  The
//! CRC of the primary covers the concatenation of primary and continuations;
//! continuations are never validated on their own.

use crate::codec;
use crate::error::SfsError;

pub const ENTRY_SIZE: usize = 64;

pub const TYPE_VOL_ID: u8 = 0x01;
pub const TYPE_START: u8 = 0x02;
pub const TYPE_UNUSED: u8 = 0x10;
pub const TYPE_DIR: u8 = 0x11;
pub const TYPE_FILE: u8 = 0x12;
pub const TYPE_DIR_DEL: u8 = 0x19;
pub const TYPE_FILE_DEL: u8 = 0x1A;

pub const OFF_CRC: usize = 1;
pub const OFF_NUM_CONT: usize = 2;
pub const OFF_TIMESTAMP: usize = 3;
pub const OFF_DIR_NAME: usize = 11;
pub const OFF_EXTENT_START: usize = 11;
pub const OFF_EXTENT_END: usize = 19;
pub const OFF_FILE_LENGTH: usize = 27;
pub const OFF_FILE_NAME: usize = 35;
pub const OFF_VOL_NAME: usize = 12;

/// Name bytes available in the primary slot of a file entry.
pub const FILE_NAME_LEN: usize = ENTRY_SIZE - OFF_FILE_NAME; // 29
/// Name bytes available in the primary slot of a directory entry.
pub const DIR_NAME_LEN: usize = ENTRY_SIZE - OFF_DIR_NAME; // 53
/// Name bytes available in the volume label.
pub const VOL_NAME_LEN: usize = 52;

/// One parsed index entry: a primary slot plus its continuation slots.
#[derive(Debug, Clone)]
pub struct Entry {
    pub raw: [u8; ENTRY_SIZE],
    pub continuations: Vec<[u8; ENTRY_SIZE]>,
    /// Index of the primary slot within the index region.
    pub slot: usize,
}

impl Entry {
    pub fn from_raw(raw: [u8; ENTRY_SIZE], slot: usize) -> Self {
        Self {
            raw,
            continuations: Vec::new(),
            slot,
        }
    }

    /// A free slot, CRC already valid.
    pub fn unused(slot: usize) -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        raw[0] = TYPE_UNUSED;
        raw[OFF_CRC] = codec::checksum(&raw);
        Self::from_raw(raw, slot)
    }

    /// The sentinel pinned at the lowest-addressed slot of the index.
    pub fn start_marker() -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        raw[0] = TYPE_START;
        raw[OFF_CRC] = codec::checksum(&raw);
        Self::from_raw(raw, 0)
    }

    /// The volume label pinned at the highest-addressed slot of the index.
    pub fn volume_label(label: &str, timestamp: i64) -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        raw[0] = TYPE_VOL_ID;
        codec::write_i64(&mut raw, OFF_TIMESTAMP, timestamp);
        let bytes = label.as_bytes();
        let n = bytes.len().min(VOL_NAME_LEN);
        raw[OFF_VOL_NAME..OFF_VOL_NAME + n].copy_from_slice(&bytes[..n]);
        raw[OFF_CRC] = codec::checksum(&raw);
        Self::from_raw(raw, 0)
    }

    pub fn new_dir(path: &str, timestamp: i64) -> Self {
        let mut entry = Self::named(TYPE_DIR, path);
        codec::write_i64(&mut entry.raw, OFF_TIMESTAMP, timestamp);
        entry.update_crc();
        entry
    }

    pub fn new_file(path: &str, timestamp: i64, start: u64, end: u64, length: u64) -> Self {
        let mut entry = Self::named(TYPE_FILE, path);
        codec::write_i64(&mut entry.raw, OFF_TIMESTAMP, timestamp);
        codec::write_u64(&mut entry.raw, OFF_EXTENT_START, start);
        codec::write_u64(&mut entry.raw, OFF_EXTENT_END, end);
        codec::write_u64(&mut entry.raw, OFF_FILE_LENGTH, length);
        entry.update_crc();
        entry
    }

    /// Build a primary slot + continuations holding `name`, CRC not yet set.
    fn named(entry_type: u8, name: &str) -> Self {
        let (name_off, window) = match entry_type {
            TYPE_FILE => (OFF_FILE_NAME, FILE_NAME_LEN),
            _ => (OFF_DIR_NAME, DIR_NAME_LEN),
        };
        let bytes = name.as_bytes();
        let mut continuations = Vec::new();
        if bytes.len() > window {
            let mut rest = &bytes[window..];
            while !rest.is_empty() {
                let take = rest.len().min(ENTRY_SIZE);
                let mut cont = [0u8; ENTRY_SIZE];
                cont[..take].copy_from_slice(&rest[..take]);
                continuations.push(cont);
                rest = &rest[take..];
            }
            // name exactly fills the last continuation: no in-band NUL,
            // so append a zero-filled terminator slot
            if (bytes.len() - window).is_multiple_of(ENTRY_SIZE) {
                continuations.push([0u8; ENTRY_SIZE]);
            }
        } else if bytes.len() == window {
            continuations.push([0u8; ENTRY_SIZE]);
        }

        let mut raw = [0u8; ENTRY_SIZE];
        raw[0] = entry_type;
        raw[OFF_NUM_CONT] = continuations.len() as u8;
        let first = bytes.len().min(window);
        raw[name_off..name_off + first].copy_from_slice(&bytes[..first]);
        Self {
            raw,
            continuations,
            slot: 0,
        }
    }

    pub fn entry_type(&self) -> u8 {
        self.raw[0]
    }

    /// Continuation count claimed by the primary slot.  Only the four
    /// name-carrying types chain continuations.
    pub fn num_cont(&self) -> usize {
        match self.entry_type() {
            TYPE_FILE | TYPE_DIR | TYPE_FILE_DEL | TYPE_DIR_DEL => {
                self.raw[OFF_NUM_CONT] as usize
            }
            _ => 0,
        }
    }

    /// Total slots occupied (primary + continuations).
    pub fn slots(&self) -> usize {
        1 + self.continuations.len()
    }

    pub fn is_file(&self) -> bool {
        self.entry_type() == TYPE_FILE
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type() == TYPE_DIR
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.entry_type(), TYPE_DIR_DEL | TYPE_FILE_DEL)
    }

    /// Slots of unused entries and tombstones may be reclaimed by new
    /// entries; tombstone continuations are reclaimable too.
    pub fn is_reusable(&self) -> bool {
        self.entry_type() == TYPE_UNUSED || self.is_tombstone()
    }

    /// Decode the name: the bytes of the type-specific window plus all
    /// continuations, up to the first NUL, as UTF-8.
    pub fn name(&self) -> String {
        let window = match self.entry_type() {
            TYPE_DIR | TYPE_DIR_DEL => &self.raw[OFF_DIR_NAME..],
            TYPE_FILE | TYPE_FILE_DEL => &self.raw[OFF_FILE_NAME..],
            TYPE_VOL_ID => &self.raw[OFF_VOL_NAME..OFF_VOL_NAME + VOL_NAME_LEN],
            _ => return String::new(),
        };
        let mut bytes = window.to_vec();
        for cont in &self.continuations {
            bytes.extend_from_slice(cont);
        }
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    pub fn timestamp(&self) -> i64 {
        codec::read_i64(&self.raw, OFF_TIMESTAMP)
    }

    pub fn extent_start(&self) -> u64 {
        codec::read_u64(&self.raw, OFF_EXTENT_START)
    }

    pub fn extent_end(&self) -> u64 {
        codec::read_u64(&self.raw, OFF_EXTENT_END)
    }

    pub fn length(&self) -> u64 {
        codec::read_u64(&self.raw, OFF_FILE_LENGTH)
    }

    pub fn set_extent(&mut self, start: u64, end: u64) {
        codec::write_u64(&mut self.raw, OFF_EXTENT_START, start);
        codec::write_u64(&mut self.raw, OFF_EXTENT_END, end);
    }

    /// Recompute the CRC byte over the primary + continuation concatenation.
    pub fn update_crc(&mut self) {
        self.raw[OFF_CRC] = 0;
        let mut crc = codec::checksum(&self.raw);
        for cont in &self.continuations {
            crc = crc.wrapping_add(codec::checksum(cont));
        }
        self.raw[OFF_CRC] = crc;
    }

    pub fn crc_ok(&self) -> bool {
        // complements are additive: the concatenation sums to 0 mod 256
        // iff the per-slot complements cancel out
        let mut crc = codec::checksum(&self.raw);
        for cont in &self.continuations {
            crc = crc.wrapping_add(codec::checksum(cont));
        }
        crc == 0
    }

    /// Reject primaries whose claimed continuation chain cannot fit in the
    /// slots remaining after `slot`.
    pub fn check_continuations(&self, slots_available: usize) -> Result<(), SfsError> {
        if self.num_cont() > slots_available {
            return Err(SfsError::MalformedEntry {
                slot: self.slot,
                reason: format!(
                    "claims {} continuation slots, only {} remain",
                    self.num_cont(),
                    slots_available
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_file_name_has_no_continuations() {
        let e = Entry::new_file("a.txt", 12345, 1, 2, 600);
        assert_eq!(e.num_cont(), 0);
        assert_eq!(e.slots(), 1);
        assert_eq!(e.name(), "a.txt");
        assert!(e.crc_ok());
    }

    #[test]
    fn file_name_filling_primary_window_gets_terminator_slot() {
        // exactly 29 bytes: no room for a NUL in the primary window
        let name = "a".repeat(FILE_NAME_LEN);
        let e = Entry::new_file(&name, 0, 0, 0, 0);
        assert_eq!(e.num_cont(), 1);
        assert_eq!(e.continuations.len(), 1);
        assert!(e.continuations[0].iter().all(|&b| b == 0));
        assert_eq!(e.name(), name);
        assert!(e.crc_ok());
    }

    #[test]
    fn dir_name_filling_primary_window_gets_terminator_slot() {
        let name = "d".repeat(DIR_NAME_LEN);
        let e = Entry::new_dir(&name, 0);
        assert_eq!(e.num_cont(), 1);
        assert_eq!(e.name(), name);
    }

    #[test]
    fn long_name_spills_into_continuations() {
        // 29 + 64 + 7 bytes: two continuations, NUL lands in the second
        let name = "x".repeat(FILE_NAME_LEN + ENTRY_SIZE + 7);
        let e = Entry::new_file(&name, 0, 3, 4, 1000);
        assert_eq!(e.num_cont(), 2);
        assert_eq!(e.name(), name);
        assert!(e.crc_ok());
    }

    #[test]
    fn long_name_filling_last_continuation_gets_terminator_slot() {
        // 29 + 128 bytes: both continuations completely full, third is zeros
        let name = "y".repeat(FILE_NAME_LEN + 2 * ENTRY_SIZE);
        let e = Entry::new_file(&name, 0, 0, 0, 0);
        assert_eq!(e.num_cont(), 3);
        assert!(e.continuations[2].iter().all(|&b| b == 0));
        assert_eq!(e.name(), name);
    }

    #[test]
    fn multibyte_utf8_name_round_trips() {
        let name = "докум/мой-файл-αβγ-数据.bin";
        let e = Entry::new_file(name, 0, 0, 0, 0);
        assert_eq!(e.name(), name);
    }

    #[test]
    fn file_fields_round_trip() {
        let e = Entry::new_file("f", 0x1_0000, 7, 11, 2345);
        assert_eq!(e.extent_start(), 7);
        assert_eq!(e.extent_end(), 11);
        assert_eq!(e.length(), 2345);
        assert_eq!(e.timestamp(), 0x1_0000);
    }

    #[test]
    fn crc_covers_continuations() {
        let name = "z".repeat(FILE_NAME_LEN + 10);
        let mut e = Entry::new_file(&name, 0, 0, 0, 0);
        assert!(e.crc_ok());
        e.continuations[0][3] ^= 0xFF;
        assert!(!e.crc_ok());
        e.update_crc();
        assert!(e.crc_ok());
    }

    #[test]
    fn tombstone_detection() {
        let mut e = Entry::new_file("f", 0, 0, 0, 0);
        e.raw[0] = TYPE_FILE_DEL;
        assert!(e.is_tombstone());
        assert!(e.is_reusable());
        assert!(!e.is_file());
        // tombstoning rewrites only the tag byte, so the CRC goes stale
        assert!(!e.crc_ok());
    }

    #[test]
    fn sentinel_entries_validate() {
        assert!(Entry::start_marker().crc_ok());
        assert!(Entry::unused(0).crc_ok());
        assert!(Entry::volume_label("SFS_VOLUME", 99 << 16).crc_ok());
    }

    #[test]
    fn volume_label_name() {
        let e = Entry::volume_label("MY_DISK", 0);
        assert_eq!(e.name(), "MY_DISK");
    }

    #[test]
    fn continuation_claim_checked_against_remaining_slots() {
        let name = "w".repeat(FILE_NAME_LEN + 40);
        let e = Entry::new_file(&name, 0, 0, 0, 0);
        assert!(e.check_continuations(5).is_ok());
        assert!(e.check_continuations(0).is_err());
    }
}
