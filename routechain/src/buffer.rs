//! Per-worker scratch packet buffer.
//!
//! One fixed-size region per worker, reused forever. Rather than the two
//! C unions the reference implementation overlays on top of each other,
//! this uses named constant offsets into one flat array: the incoming
//! packet always lands at `INNER_START`, leaving enough room in front of
//! it for either outer header the synthesiser might build. Because the
//! v4 and v6 outer headers are never in flight at the same time, the two
//! "outer" regions are allowed to overlap each other (but never the inner
//! region), exactly mirroring the reference implementation's union.

/// Total buffer size; large enough to hold the largest possible outer
/// header plus a full MTU-sized packet.
pub const BUFFER_LEN: usize = 2048;

/// Where a synthesised IPv6 outer header (+ ICMPv6) starts. 96 bytes wide.
pub const OUTER_V6_START: usize = 0;

/// Where a synthesised IPv4 outer header (+ ICMP) starts. 56 bytes wide.
/// `INNER_START - OUTER_V4_START == 28`, so the trailing 28 bytes of the
/// v4 reply are the inner packet's own leading bytes, already in place.
pub const OUTER_V4_START: usize = 20;

/// Where the packet read from the TUN queue is placed. Also
/// `INNER_START - OUTER_V6_START == 48`, giving the v6 reply its 48 bytes
/// of embedded payload for free.
pub const INNER_START: usize = 48;

/// Largest packet a single read may fill in, leaving room for the widest
/// outer header.
pub const READ_MAX: usize = BUFFER_LEN - INNER_START;

pub struct PacketBuffer {
    data: [u8; BUFFER_LEN],
}

impl PacketBuffer {
    pub fn new() -> Self {
        PacketBuffer {
            data: [0u8; BUFFER_LEN],
        }
    }

    /// The region a worker should `read(2)` the incoming packet into.
    pub fn read_region(&mut self) -> &mut [u8] {
        &mut self.data[INNER_START..INNER_START + READ_MAX]
    }

    pub fn inner(&self, len: usize) -> &[u8] {
        &self.data[INNER_START..INNER_START + len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
