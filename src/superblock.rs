//! The 42-byte volume superblock.
//!
//! The superblock lives at a fixed byte offset inside the reserved region
//! and is the only record of the volume geometry.  It is rewritten exactly
//! once at the end of every operation that changes `data_size`,
//! `index_size`, `total_blocks`, or the modification timestamp — always
//! *after* the data and index writes of that operation, so an interrupted
//! operation leaves the previous geometry in effect.
//!
//! | Offset | Size | Field                                      |
//! |--------|------|--------------------------------------------|
//! |   0    |   8  | Modification timestamp (16.16 fixed, i64)  |
//! |   8    |   8  | Data region size in blocks (u64)           |
//! |  16    |   8  | Index region size in **bytes** (u64)       |
//! |  24    |   3  | Magic (`"SFS"`)                            |
//! |  27    |   1  | Format version (0x1A)                      |
//! |  28    |   8  | Total volume size in blocks (u64)          |
//! |  36    |   4  | Reserved region size in blocks (u32)       |
//! |  40    |   1  | Block size exponent (block = 1 << (n + 7)) |
//! |  41    |   1  | CRC (sums the 42 bytes to 0 mod 256)       |

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::codec;
use crate::error::SfsError;

/// Byte offset of the superblock inside the reserved region.
pub const SUPERBLOCK_OFFSET: u64 = 0x18E;
pub const SUPERBLOCK_SIZE: usize = 42;

pub const SFS_MAGIC: [u8; 3] = *b"SFS";
pub const SFS_VERSION: u8 = 0x1A;

/// Canonical block size exponent: 1 << (2 + 7) = 512 bytes.
pub const DEFAULT_BLOCK_EXP: u8 = 2;

const OFF_TIMESTAMP: usize = 0;
const OFF_DATA_SIZE: usize = 8;
const OFF_INDEX_SIZE: usize = 16;
const OFF_MAGIC: usize = 24;
const OFF_VERSION: usize = 27;
const OFF_TOTAL_BLOCKS: usize = 28;
const OFF_RSVD_BLOCKS: usize = 36;
const OFF_BLOCK_EXP: usize = 40;
const OFF_CRC: usize = 41;

#[derive(Debug, Clone)]
pub struct Superblock {
    pub timestamp: i64,
    /// Size of the data region, in blocks.
    pub data_size: u64,
    /// Size of the index region, in bytes.
    pub index_size: u64,
    pub total_blocks: u64,
    pub rsvd_blocks: u32,
    pub block_exp: u8,
}

impl Superblock {
    pub fn block_size(&self) -> u64 {
        1 << (self.block_exp + 7)
    }

    /// Blocks covered by the index region.
    pub fn index_blocks(&self) -> u64 {
        self.index_size.div_ceil(self.block_size())
    }

    /// Byte offset where the index region begins (it ends at the image tail).
    pub fn index_offset(&self) -> u64 {
        self.total_blocks * self.block_size() - self.index_size
    }

    /// First block usable by file data.
    pub fn data_start(&self) -> u64 {
        u64::from(self.rsvd_blocks)
    }

    fn pack(&self, crc: u8) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        codec::write_i64(&mut buf, OFF_TIMESTAMP, self.timestamp);
        codec::write_u64(&mut buf, OFF_DATA_SIZE, self.data_size);
        codec::write_u64(&mut buf, OFF_INDEX_SIZE, self.index_size);
        buf[OFF_MAGIC..OFF_MAGIC + 3].copy_from_slice(&SFS_MAGIC);
        buf[OFF_VERSION] = SFS_VERSION;
        codec::write_u64(&mut buf, OFF_TOTAL_BLOCKS, self.total_blocks);
        codec::write_u32(&mut buf, OFF_RSVD_BLOCKS, self.rsvd_blocks);
        buf[OFF_BLOCK_EXP] = self.block_exp;
        buf[OFF_CRC] = crc;
        buf
    }

    /// Read and validate the superblock.  A wrong magic is fatal; a CRC
    /// mismatch is only logged, for compatibility with images written by
    /// tools that computed the CRC incorrectly.
    pub fn load(file: &mut File) -> Result<Self, SfsError> {
        file.seek(SeekFrom::Start(SUPERBLOCK_OFFSET))
            .map_err(|e| io_err("seeking to superblock", e))?;
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        file.read_exact(&mut buf)
            .map_err(|_| SfsError::NotAnSfsVolume)?;

        if buf[OFF_MAGIC..OFF_MAGIC + 3] != SFS_MAGIC {
            return Err(SfsError::NotAnSfsVolume);
        }
        let version = buf[OFF_VERSION];
        if version != SFS_VERSION {
            return Err(SfsError::Corrupt {
                reason: format!("unsupported format version {version:#04x}"),
            });
        }
        if !codec::checksum_ok(&buf) {
            tracing::warn!("superblock CRC mismatch; continuing");
        }

        Ok(Self {
            timestamp: codec::read_i64(&buf, OFF_TIMESTAMP),
            data_size: codec::read_u64(&buf, OFF_DATA_SIZE),
            index_size: codec::read_u64(&buf, OFF_INDEX_SIZE),
            total_blocks: codec::read_u64(&buf, OFF_TOTAL_BLOCKS),
            rsvd_blocks: codec::read_u32(&buf, OFF_RSVD_BLOCKS),
            block_exp: buf[OFF_BLOCK_EXP],
        })
    }

    /// Pack with a fresh CRC and write at the fixed offset.
    pub fn store(&self, file: &mut File) -> Result<(), SfsError> {
        let crc = codec::checksum(&self.pack(0));
        let buf = self.pack(crc);
        file.seek(SeekFrom::Start(SUPERBLOCK_OFFSET))
            .map_err(|e| io_err("seeking to superblock", e))?;
        file.write_all(&buf)
            .map_err(|e| io_err("writing superblock", e))?;
        Ok(())
    }
}

fn io_err(context: &str, source: std::io::Error) -> SfsError {
    SfsError::Io {
        context: context.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            timestamp: 1_700_000_000 << 16,
            data_size: 12,
            index_size: 1024,
            total_blocks: 128,
            rsvd_blocks: 1,
            block_exp: DEFAULT_BLOCK_EXP,
        }
    }

    #[test]
    fn packed_superblock_validates() {
        let sb = sample();
        let crc = codec::checksum(&sb.pack(0));
        let buf = sb.pack(crc);
        assert_eq!(buf.len(), SUPERBLOCK_SIZE);
        assert!(codec::checksum_ok(&buf));
        assert_eq!(&buf[OFF_MAGIC..OFF_MAGIC + 3], b"SFS");
        assert_eq!(buf[OFF_VERSION], SFS_VERSION);
    }

    #[test]
    fn geometry_helpers() {
        let sb = sample();
        assert_eq!(sb.block_size(), 512);
        assert_eq!(sb.index_blocks(), 2);
        assert_eq!(sb.index_offset(), 128 * 512 - 1024);
        assert_eq!(sb.data_start(), 1);
    }

    #[test]
    fn load_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.sfs");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(128 * 512).unwrap();

        let sb = sample();
        sb.store(&mut file).unwrap();
        let loaded = Superblock::load(&mut file).unwrap();
        assert_eq!(loaded.timestamp, sb.timestamp);
        assert_eq!(loaded.data_size, 12);
        assert_eq!(loaded.index_size, 1024);
        assert_eq!(loaded.total_blocks, 128);
        assert_eq!(loaded.rsvd_blocks, 1);
        assert_eq!(loaded.block_exp, DEFAULT_BLOCK_EXP);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not.sfs");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(64 * 1024).unwrap();
        assert!(matches!(
            Superblock::load(&mut file),
            Err(SfsError::NotAnSfsVolume)
        ));
    }
}
