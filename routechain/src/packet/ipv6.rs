use super::{
    Action, ICMP6_DEST_UNREACHABLE, ICMP6_ECHO_REPLY, ICMP6_ECHO_REQUEST, ICMP6_NOPORT,
    ICMP6_NO_ROUTE, ICMP6_TIME_EXCEEDED, PROTO_ICMPV6, PROTO_TCP, REPLY_TTL,
};
use crate::buffer::{PacketBuffer, INNER_START, OUTER_V6_START};
use crate::checksum;
use crate::prefix::PrefixTable;

const IP6_HEADER_LEN: usize = 40;
const ICMP6_HEADER_LEN: usize = 8;

pub(crate) fn dispatch(buf: &mut PacketBuffer, len: usize, prefixes: &PrefixTable) -> Action {
    if len < IP6_HEADER_LEN {
        return Action::Drop;
    }
    let data = buf.as_slice();
    let i = INNER_START;
    let next_header = data[i + 6];

    if next_header == PROTO_ICMPV6 && len >= IP6_HEADER_LEN + ICMP6_HEADER_LEN {
        let icmp_type = data[i + IP6_HEADER_LEN];
        if icmp_type == ICMP6_ECHO_REQUEST {
            return echo_reply(buf, len);
        }
    } else if next_header == PROTO_TCP {
        // TCP support is a reserved extension point; no reply is
        // synthesised for it yet.
        return Action::Drop;
    }

    ttl_exceeded(buf, len, prefixes)
}

fn echo_reply(buf: &mut PacketBuffer, len: usize) -> Action {
    let data = buf.as_mut_slice();
    let i = INNER_START;

    // No header checksum exists for IPv6, and the ICMPv6 pseudo-header
    // checksum sums the same src/dst bytes regardless of which field holds
    // which address, so swapping them in place needs no checksum fixup.
    for k in 0..16 {
        data.swap(i + 8 + k, i + 24 + k);
    }

    data[i + 7] = REPLY_TTL;

    let icmp = i + IP6_HEADER_LEN;
    let old_type = data[icmp];
    data[icmp] = ICMP6_ECHO_REPLY;
    let type_delta = checksum::high_byte_delta(old_type, ICMP6_ECHO_REPLY);
    let icmp_cksum = u16::from_be_bytes([data[icmp + 2], data[icmp + 3]]);
    let icmp_cksum = checksum::incremental_update(icmp_cksum, type_delta);
    data[icmp + 2..icmp + 4].copy_from_slice(&icmp_cksum.to_be_bytes());

    Action::Reply {
        offset: INNER_START,
        len,
    }
}

fn ttl_exceeded(buf: &mut PacketBuffer, _len: usize, prefixes: &PrefixTable) -> Action {
    let data = buf.as_slice();
    let i = INNER_START;
    let dst: [u8; 16] = data[i + 24..i + 40].try_into().unwrap();
    let src: [u8; 16] = data[i + 8..i + 24].try_into().unwrap();
    let orig_hop_limit = data[i + 7];

    let base = match prefixes.match_v6(dst) {
        Some(base) => base,
        None => return Action::Drop,
    };

    // The synthetic chain only varies the lowest 32 bits of the matched
    // block; comparing that segment is enough to find the terminal hop.
    let base_seg = u32::from_be_bytes(base[12..16].try_into().unwrap());
    let dst_seg = u32::from_be_bytes(dst[12..16].try_into().unwrap());
    let terminal = base_seg <= dst_seg && dst_seg <= base_seg.wrapping_add(u32::from(orig_hop_limit));

    let data = buf.as_mut_slice();
    let o = OUTER_V6_START;
    for b in &mut data[o..o + IP6_HEADER_LEN + ICMP6_HEADER_LEN] {
        *b = 0;
    }

    // Embedded payload is the 48 bytes already sitting at INNER_START,
    // i.e. o + 88..o + 136 — already in place, no copy needed.
    let payload_len = (ICMP6_HEADER_LEN + 48) as u16;
    data[o] = 6 << 4;
    data[o + 4..o + 6].copy_from_slice(&payload_len.to_be_bytes());
    data[o + 6] = PROTO_ICMPV6;
    data[o + 7] = REPLY_TTL;
    data[o + 24..o + 40].copy_from_slice(&src);

    let (out_src, icmp_type, icmp_code) = if terminal {
        (dst, ICMP6_DEST_UNREACHABLE, ICMP6_NOPORT)
    } else {
        let mut hop = base;
        hop[12..16].copy_from_slice(&base_seg.wrapping_add(u32::from(orig_hop_limit)).to_be_bytes());
        (hop, ICMP6_TIME_EXCEEDED, ICMP6_NO_ROUTE)
    };
    data[o + 8..o + 24].copy_from_slice(&out_src);

    let icmp = o + IP6_HEADER_LEN;
    data[icmp] = icmp_type;
    data[icmp + 1] = icmp_code;

    let icmp_src: [u8; 16] = data[o + 8..o + 24].try_into().unwrap();
    let icmp_dst: [u8; 16] = data[o + 24..o + 40].try_into().unwrap();
    let icmp_cksum = checksum::pseudo_v6(
        &icmp_src,
        &icmp_dst,
        payload_len,
        PROTO_ICMPV6,
        &data[icmp..o + IP6_HEADER_LEN + ICMP6_HEADER_LEN + 48],
    );
    data[icmp + 2..icmp + 4].copy_from_slice(&icmp_cksum.to_be_bytes());

    Action::Reply {
        offset: OUTER_V6_START,
        len: IP6_HEADER_LEN + ICMP6_HEADER_LEN + 48,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::PrefixTable;
    use pretty_assertions::assert_eq;

    fn echo_request_packet(src: [u8; 16], dst: [u8; 16], hop_limit: u8) -> (PacketBuffer, usize) {
        let mut buf = PacketBuffer::new();
        let data = buf.as_mut_slice();
        let i = INNER_START;
        let payload = b"abcd";
        let len = IP6_HEADER_LEN + ICMP6_HEADER_LEN + payload.len();

        data[i] = 6 << 4;
        let payload_len = (ICMP6_HEADER_LEN + payload.len()) as u16;
        data[i + 4..i + 6].copy_from_slice(&payload_len.to_be_bytes());
        data[i + 6] = PROTO_ICMPV6;
        data[i + 7] = hop_limit;
        data[i + 8..i + 24].copy_from_slice(&src);
        data[i + 24..i + 40].copy_from_slice(&dst);

        let icmp = i + IP6_HEADER_LEN;
        data[icmp] = ICMP6_ECHO_REQUEST;
        data[icmp + 4] = 0;
        data[icmp + 5] = 1; // ident = 1
        data[icmp + 6] = 0;
        data[icmp + 7] = 1; // seq = 1
        data[icmp + 8..icmp + 8 + payload.len()].copy_from_slice(payload);
        let icmp_cksum = checksum::pseudo_v6(
            &src,
            &dst,
            payload_len,
            PROTO_ICMPV6,
            &data[icmp..icmp + ICMP6_HEADER_LEN + payload.len()],
        );
        data[icmp + 2..icmp + 4].copy_from_slice(&icmp_cksum.to_be_bytes());

        (buf, len)
    }

    fn v6(s: &str) -> [u8; 16] {
        use std::str::FromStr;
        std::net::Ipv6Addr::from_str(s).unwrap().octets()
    }

    #[test]
    fn echo_reply_swaps_and_retypes() {
        // Scenario 4: v6 echo.
        let src = v6("2001:db8::1");
        let dst = v6("fd00::1");
        let (mut buf, len) = echo_request_packet(src, dst, 64);
        let table = PrefixTable::build(&["fd00::/16"]).unwrap();

        match super::super::synthesize(&mut buf, len, &table) {
            Action::Reply { offset, len: rlen } => {
                assert_eq!(offset, INNER_START);
                assert_eq!(rlen, len);
                let data = buf.as_slice();
                let i = offset;
                assert_eq!(&data[i + 8..i + 24], &dst);
                assert_eq!(&data[i + 24..i + 40], &src);
                assert_eq!(data[i + 7], REPLY_TTL);
                assert_eq!(data[i + IP6_HEADER_LEN], ICMP6_ECHO_REPLY);
                let icmp = i + IP6_HEADER_LEN;
                let payload_len = (ICMP6_HEADER_LEN + 4) as u16;
                assert_eq!(
                    checksum::pseudo_v6(
                        &dst,
                        &src,
                        payload_len,
                        PROTO_ICMPV6,
                        &data[icmp..icmp + ICMP6_HEADER_LEN + 4]
                    ),
                    0xffff
                );
                assert_eq!(&data[icmp + 4..icmp + 8], &[0, 1, 0, 1]);
                assert_eq!(&data[icmp + 8..icmp + 12], b"abcd");
            }
            Action::Drop => panic!("expected a reply"),
        }
    }

    #[test]
    fn hop_chain_intermediate_and_terminal() {
        // Scenario 5: v6 intermediate hop and terminal hop.
        let table = PrefixTable::build(&["fd00::/16"]).unwrap();
        let src = v6("2001:db8::1");

        let mut dst = v6("fd00::20");
        let mut buf = PacketBuffer::new();
        let data = buf.as_mut_slice();
        let i = INNER_START;
        data[i] = 6 << 4;
        data[i + 6] = 17; // UDP, not ICMPv6/TCP
        data[i + 7] = 3; // hop limit
        data[i + 8..i + 24].copy_from_slice(&src);
        data[i + 24..i + 40].copy_from_slice(&dst);
        let len = IP6_HEADER_LEN + 8;

        match super::super::synthesize(&mut buf, len, &table) {
            Action::Reply { offset, len: rlen } => {
                assert_eq!(offset, OUTER_V6_START);
                assert_eq!(rlen, IP6_HEADER_LEN + ICMP6_HEADER_LEN + 48);
                let data = buf.as_slice();
                let o = offset;
                let mut expect_hop = v6("fd00::");
                expect_hop[15] = 3;
                assert_eq!(&data[o + 8..o + 24], &expect_hop);
                assert_eq!(&data[o + 24..o + 40], &src);
                assert_eq!(data[o + 7], REPLY_TTL);
                assert_eq!(data[o + IP6_HEADER_LEN], ICMP6_TIME_EXCEEDED);
                assert_eq!(data[o + IP6_HEADER_LEN + 1], ICMP6_NO_ROUTE);
            }
            Action::Drop => panic!("expected a reply"),
        }

        dst = v6("fd00::3");
        let mut buf = PacketBuffer::new();
        let data = buf.as_mut_slice();
        let i = INNER_START;
        data[i] = 6 << 4;
        data[i + 6] = 17;
        data[i + 7] = 5; // base(0) + hop_limit(5) = 5 >= dst_seg(3)
        data[i + 8..i + 24].copy_from_slice(&src);
        data[i + 24..i + 40].copy_from_slice(&dst);
        let len = IP6_HEADER_LEN + 8;

        match super::super::synthesize(&mut buf, len, &table) {
            Action::Reply { offset, .. } => {
                let data = buf.as_slice();
                let o = offset;
                assert_eq!(&data[o + 8..o + 24], &dst);
                assert_eq!(data[o + IP6_HEADER_LEN], ICMP6_DEST_UNREACHABLE);
                assert_eq!(data[o + IP6_HEADER_LEN + 1], ICMP6_NOPORT);
            }
            Action::Drop => panic!("expected a reply"),
        }
    }

    #[test]
    fn no_reply_without_a_matching_block() {
        let table = PrefixTable::build::<&str>(&[]).unwrap();
        let mut buf = PacketBuffer::new();
        let data = buf.as_mut_slice();
        let i = INNER_START;
        data[i] = 6 << 4;
        data[i + 6] = 17;
        data[i + 7] = 64;
        data[i + 8..i + 24].copy_from_slice(&v6("2001:db8::1"));
        data[i + 24..i + 40].copy_from_slice(&v6("fd00::5"));

        assert!(matches!(
            super::super::synthesize(&mut buf, IP6_HEADER_LEN + 8, &table),
            Action::Drop
        ));
    }

    #[test]
    fn tcp_is_reserved_and_dropped() {
        // TCP is a reserved extension point, not a fallthrough into
        // ttl-exceeded — a destination that would otherwise match must
        // still yield no reply.
        let table = PrefixTable::build(&["fd00::/16"]).unwrap();
        let mut buf = PacketBuffer::new();
        let data = buf.as_mut_slice();
        let i = INNER_START;
        data[i] = 6 << 4;
        data[i + 6] = PROTO_TCP;
        data[i + 7] = 64;
        data[i + 8..i + 24].copy_from_slice(&v6("2001:db8::1"));
        data[i + 24..i + 40].copy_from_slice(&v6("fd00::20"));

        assert!(matches!(
            super::super::synthesize(&mut buf, IP6_HEADER_LEN + 8, &table),
            Action::Drop
        ));
    }
}
