//! Byte-level primitives shared by the superblock and entry codecs.
//!
//! Every multi-byte integer in an SFS image is little-endian, regardless of
//! the host architecture.  The checksum is an 8-bit complement: the CRC byte
//! is chosen so that the unsigned sum of all bytes in the checksummed range
//! is 0 mod 256.  Validation therefore never needs to know where the CRC
//! byte lives — it just re-sums the whole range.

use std::time::SystemTime;

/// Sum of all bytes, mod 256.
fn byte_sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Compute the complement checksum for a buffer whose CRC byte is zeroed.
pub fn checksum(data: &[u8]) -> u8 {
    0u8.wrapping_sub(byte_sum(data))
}

/// A checksummed range validates iff its bytes sum to 0 mod 256.
pub fn checksum_ok(data: &[u8]) -> bool {
    byte_sum(data) == 0
}

// ── Little-endian field helpers ─────────────────────────────────

pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub fn write_u32(buf: &mut [u8], offset: usize, val: u32) {
    buf[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
}

pub fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

pub fn write_u64(buf: &mut [u8], offset: usize, val: u64) {
    buf[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
}

pub fn read_i64(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

pub fn write_i64(buf: &mut [u8], offset: usize, val: i64) {
    buf[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
}

// ── Timestamps ──────────────────────────────────────────────────
//
// On-disk timestamps are 64-bit signed fixed-point seconds since the Unix
// epoch with a 16-bit fraction: `seconds * 65536 + fraction`.

/// Current time as a 16.16 fixed-point timestamp.
pub fn timestamp_now() -> i64 {
    let dur = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let frac = (u64::from(dur.subsec_nanos()) << 16) / 1_000_000_000;
    ((dur.as_secs() << 16) + frac) as i64
}

/// Whole seconds of a fixed-point timestamp.
pub fn timestamp_secs(ts: i64) -> i64 {
    ts >> 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_makes_sum_zero() {
        let mut buf = vec![0u8; 64];
        buf[0] = 0x12;
        buf[5] = 0xFF;
        buf[63] = 0x7A;
        buf[1] = checksum(&buf);
        assert!(checksum_ok(&buf));
    }

    #[test]
    fn checksum_of_empty_is_zero() {
        assert_eq!(checksum(&[]), 0);
        assert!(checksum_ok(&[]));
    }

    #[test]
    fn checksum_detects_flip() {
        let mut buf = vec![3u8; 16];
        buf[1] = 0;
        buf[1] = checksum(&buf);
        assert!(checksum_ok(&buf));
        buf[7] ^= 0x01;
        assert!(!checksum_ok(&buf));
    }

    #[test]
    fn le_field_round_trip() {
        let mut buf = [0u8; 24];
        write_u64(&mut buf, 0, 0x0102_0304_0506_0708);
        write_u32(&mut buf, 8, 0xDEAD_BEEF);
        write_i64(&mut buf, 12, -42);
        assert_eq!(read_u64(&buf, 0), 0x0102_0304_0506_0708);
        assert_eq!(read_u32(&buf, 8), 0xDEAD_BEEF);
        assert_eq!(read_i64(&buf, 12), -42);
        // little-endian: least significant byte first
        assert_eq!(buf[0], 0x08);
        assert_eq!(buf[8], 0xEF);
    }

    #[test]
    fn timestamp_fixed_point_scale() {
        let ts = timestamp_now();
        let secs = timestamp_secs(ts);
        // sanity: after 2020-01-01, before 2100
        assert!(secs > 1_577_836_800);
        assert!(secs < 4_102_444_800);
        assert_eq!(secs, ts / 65536);
    }
}
