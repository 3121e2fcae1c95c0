//! Prefix table: the tiny, order-preserving, linearly-scanned list of
//! configured address blocks.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed address literal: {0:?}")]
    MalformedAddress(String),
    #[error("prefix length {0} out of range for address family")]
    PrefixOutOfRange(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// A family-tagged address range. Immutable after startup; the bits of
/// `base` below `prefix_len` are kept verbatim so they can be reused as
/// the first synthetic hop.
#[derive(Debug, Clone, Copy)]
pub struct PrefixBlock {
    pub family: Family,
    pub base: [u8; 16],
    pub prefix_len: u8,
}

impl PrefixBlock {
    pub fn base_v4(&self) -> [u8; 4] {
        self.base[0..4].try_into().unwrap()
    }
}

/// Ordered, order-preserving sequence of configured blocks.
pub struct PrefixTable {
    blocks: Vec<PrefixBlock>,
}

impl PrefixTable {
    /// Parse each entry as `<addr>` or `<addr>/<prefix_len>`. Presence of
    /// `:` selects the v6 family; a missing prefix length defaults to the
    /// family's full address length.
    pub fn build<S: AsRef<str>>(entries: &[S]) -> Result<PrefixTable, Error> {
        let mut blocks = Vec::with_capacity(entries.len());
        for entry in entries {
            blocks.push(parse_entry(entry.as_ref())?);
        }
        Ok(PrefixTable { blocks })
    }

    pub fn blocks(&self) -> &[PrefixBlock] {
        &self.blocks
    }

    /// Linear scan over v4 blocks; `dst` is the destination address as a
    /// host-order `u32`. Returns the matched block's base, also host-order.
    pub fn match_v4(&self, dst: u32) -> Option<u32> {
        for block in &self.blocks {
            if block.family != Family::V4 {
                continue;
            }
            let base = u32::from_be_bytes(block.base_v4());
            let mask = v4_mask(block.prefix_len);
            if (dst & mask) == (base & mask) {
                return Some(base);
            }
        }
        None
    }

    /// Linear scan over v6 blocks, segment by segment; a prefix boundary
    /// that straddles a 32-bit segment only masks that segment, segments
    /// fully below it require exact equality, segments fully above it are
    /// irrelevant. Returns the matched block's base, verbatim (network
    /// order), to be reused by the caller as the first synthetic hop.
    pub fn match_v6(&self, dst: [u8; 16]) -> Option<[u8; 16]> {
        'blocks: for block in &self.blocks {
            if block.family != Family::V6 {
                continue;
            }
            for seg in 0..4usize {
                let bits_needed = i32::from(block.prefix_len) - (seg as i32) * 32;
                if bits_needed <= 0 {
                    break;
                }
                let dst_seg = u32::from_be_bytes(dst[seg * 4..seg * 4 + 4].try_into().unwrap());
                let base_seg =
                    u32::from_be_bytes(block.base[seg * 4..seg * 4 + 4].try_into().unwrap());
                if bits_needed >= 32 {
                    if dst_seg != base_seg {
                        continue 'blocks;
                    }
                } else {
                    let mask = 0xffff_ffffu32 << (32 - bits_needed);
                    if (dst_seg & mask) != (base_seg & mask) {
                        continue 'blocks;
                    }
                }
            }
            return Some(block.base);
        }
        None
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        0xffff_ffffu32 << (32 - prefix_len)
    }
}

fn parse_entry(entry: &str) -> Result<PrefixBlock, Error> {
    let (addr_str, prefix_str) = match entry.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (entry, None),
    };

    if addr_str.contains(':') {
        let addr = Ipv6Addr::from_str(addr_str)
            .map_err(|_| Error::MalformedAddress(entry.to_string()))?;
        let prefix_len = match prefix_str {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| Error::MalformedAddress(entry.to_string()))?,
            None => 128,
        };
        if prefix_len > 128 {
            return Err(Error::PrefixOutOfRange(prefix_len));
        }
        let mut base = [0u8; 16];
        base.copy_from_slice(&addr.octets());
        Ok(PrefixBlock {
            family: Family::V6,
            base,
            prefix_len,
        })
    } else {
        let addr = Ipv4Addr::from_str(addr_str)
            .map_err(|_| Error::MalformedAddress(entry.to_string()))?;
        let prefix_len = match prefix_str {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| Error::MalformedAddress(entry.to_string()))?,
            None => 32,
        };
        if prefix_len > 32 {
            return Err(Error::PrefixOutOfRange(prefix_len));
        }
        let mut base = [0u8; 16];
        base[0..4].copy_from_slice(&addr.octets());
        Ok(PrefixBlock {
            family: Family::V4,
            base,
            prefix_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v4_with_and_without_prefix() {
        let table = PrefixTable::build(&["10.0.0.0/8", "192.0.2.1"]).unwrap();
        assert_eq!(table.blocks()[0].prefix_len, 8);
        assert_eq!(table.blocks()[1].prefix_len, 32);
        assert_eq!(table.blocks()[1].family, Family::V4);
    }

    #[test]
    fn parses_v6_by_colon_presence() {
        let table = PrefixTable::build(&["2001:db8::/32"]).unwrap();
        assert_eq!(table.blocks()[0].family, Family::V6);
        assert_eq!(table.blocks()[0].prefix_len, 32);
    }

    #[test]
    fn rejects_malformed_literal() {
        let err = PrefixTable::build(&["not-an-address"]).unwrap_err();
        assert!(matches!(err, Error::MalformedAddress(_)));
    }

    #[test]
    fn match_v4_monotonicity() {
        // P4: match_v4(a) returns the block iff (a ^ base) >> (32-p) == 0.
        let table = PrefixTable::build(&["10.0.0.0/8"]).unwrap();
        let base = 0x0a00_0000u32;
        for a in [0x0a01_0203u32, 0x0a00_0000, 0x0bff_ffff, 0x09ff_ffff] {
            let expect = ((a ^ base) >> (32 - 8)) == 0;
            assert_eq!(table.match_v4(a).is_some(), expect, "a={a:#x}");
        }
    }

    #[test]
    fn match_v4_first_match_wins_no_lpm() {
        let table = PrefixTable::build(&["10.0.0.0/8", "10.0.0.0/24"]).unwrap();
        let dst = u32::from_be_bytes([10, 0, 0, 5]);
        assert_eq!(table.match_v4(dst), Some(u32::from_be_bytes([10, 0, 0, 0])));
    }

    #[test]
    fn match_v6_straddles_segment_boundary() {
        let table = PrefixTable::build(&["2001:db8::/33"]).unwrap();
        let mut hit = Ipv6Addr::from_str("2001:db8:8000::1").unwrap().octets();
        assert!(table.match_v6(hit).is_some());
        hit = Ipv6Addr::from_str("2001:db9::1").unwrap().octets();
        assert!(table.match_v6(hit).is_none());
    }

    #[test]
    fn match_v6_exact_below_and_irrelevant_above() {
        let table = PrefixTable::build(&["2001:db8::/96"]).unwrap();
        let base = Ipv6Addr::from_str("2001:db8::").unwrap();
        assert_eq!(table.match_v6(base.octets()), Some(base.octets()));
        let mut other = base.octets();
        other[15] = 0xff; // varies only the segment fully above the boundary
        assert_eq!(table.match_v6(other), Some(base.octets()));
    }

    #[test]
    fn unmatched_drop_with_no_blocks() {
        // P6 precondition: an empty table matches nothing.
        let table = PrefixTable::build::<&str>(&[]).unwrap();
        assert_eq!(table.match_v4(0x0a00_0005), None);
        assert_eq!(table.match_v6([0u8; 16]), None);
    }
}
