//! Reply synthesiser: classify the packet sitting in a worker's buffer and
//! either rewrite it in place or build an outer reply header in front of
//! it, never copying the original bytes.

mod ipv4;
mod ipv6;

use crate::buffer::{PacketBuffer, INNER_START};
use crate::prefix::PrefixTable;

pub const REPLY_TTL: u8 = 233;

pub(crate) const PROTO_ICMP: u8 = 1;
pub(crate) const PROTO_ICMPV6: u8 = 58;
pub(crate) const PROTO_TCP: u8 = 6;

pub(crate) const ICMP_ECHO_REQUEST: u8 = 8;
pub(crate) const ICMP_ECHO_REPLY: u8 = 0;
pub(crate) const ICMP_TIME_EXCEEDED: u8 = 11;
pub(crate) const ICMP_DEST_UNREACHABLE: u8 = 3;
pub(crate) const ICMP_PORT_UNREACHABLE: u8 = 3;

pub(crate) const ICMP6_ECHO_REQUEST: u8 = 128;
pub(crate) const ICMP6_ECHO_REPLY: u8 = 129;
pub(crate) const ICMP6_TIME_EXCEEDED: u8 = 3;
pub(crate) const ICMP6_DEST_UNREACHABLE: u8 = 1;
pub(crate) const ICMP6_NO_ROUTE: u8 = 0;
pub(crate) const ICMP6_NOPORT: u8 = 4;

/// What the worker should do after handing a packet to [`synthesize`].
pub enum Action {
    /// Write `len` bytes starting at `offset` back onto the queue.
    Reply { offset: usize, len: usize },
    /// Emit nothing.
    Drop,
}

/// Dispatch on the first header byte and build (or decline to build) a
/// reply in `buf`. `len` is the number of bytes the worker read into
/// `buf`'s inner region.
pub fn synthesize(buf: &mut PacketBuffer, len: usize, prefixes: &PrefixTable) -> Action {
    if len == 0 {
        return Action::Drop;
    }
    let first = buf.as_slice()[INNER_START];
    match first >> 4 {
        4 => {
            let ihl = first & 0x0f;
            if ihl != 5 {
                // IPv4 options present — simplifying constraint, drop.
                return Action::Drop;
            }
            ipv4::dispatch(buf, len, prefixes)
        }
        6 => ipv6::dispatch(buf, len, prefixes),
        _ => Action::Drop,
    }
}
