use super::{
    Action, ICMP_DEST_UNREACHABLE, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST, ICMP_PORT_UNREACHABLE,
    ICMP_TIME_EXCEEDED, PROTO_ICMP, PROTO_TCP, REPLY_TTL,
};
use crate::buffer::{PacketBuffer, INNER_START, OUTER_V4_START};
use crate::checksum;
use crate::prefix::PrefixTable;

const IP_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;

pub(crate) fn dispatch(buf: &mut PacketBuffer, len: usize, prefixes: &PrefixTable) -> Action {
    if len < IP_HEADER_LEN {
        return Action::Drop;
    }
    let data = buf.as_slice();
    let i = INNER_START;
    let protocol = data[i + 9];

    if protocol == PROTO_ICMP && len >= IP_HEADER_LEN + ICMP_HEADER_LEN {
        let icmp_type = data[i + IP_HEADER_LEN];
        if icmp_type == ICMP_ECHO_REQUEST {
            return echo_reply(buf, len);
        }
    } else if protocol == PROTO_TCP {
        // TCP support is a reserved extension point; no reply is
        // synthesised for it yet.
        return Action::Drop;
    }

    ttl_exceeded(buf, len, prefixes)
}

fn echo_reply(buf: &mut PacketBuffer, len: usize) -> Action {
    let data = buf.as_mut_slice();
    let i = INNER_START;

    for k in 0..4 {
        data.swap(i + 12 + k, i + 16 + k);
    }

    let old_ttl = data[i + 8];
    data[i + 8] = REPLY_TTL;
    let ttl_delta = checksum::high_byte_delta(old_ttl, REPLY_TTL);
    let hdr_cksum = u16::from_be_bytes([data[i + 10], data[i + 11]]);
    let hdr_cksum = checksum::incremental_update(hdr_cksum, ttl_delta);
    data[i + 10..i + 12].copy_from_slice(&hdr_cksum.to_be_bytes());

    let icmp = i + IP_HEADER_LEN;
    let old_type = data[icmp];
    data[icmp] = ICMP_ECHO_REPLY;
    let type_delta = checksum::high_byte_delta(old_type, ICMP_ECHO_REPLY);
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
    let dst = u32::from_be_bytes(data[i + 16..i + 20].try_into().unwrap());
    let orig_ttl = data[i + 8];
    let src4: [u8; 4] = data[i + 12..i + 16].try_into().unwrap();
    let dst4: [u8; 4] = data[i + 16..i + 20].try_into().unwrap();

    let base = match prefixes.match_v4(dst) {
        Some(base) => base,
        None => return Action::Drop,
    };

    // Terminal-hop test: the probe's TTL has climbed high enough that this
    // block's own synthetic hop chain has reached the queried destination.
    let terminal = base <= dst && dst <= base.wrapping_add(u32::from(orig_ttl));

    let data = buf.as_mut_slice();
    let o = OUTER_V4_START;
    for b in &mut data[o..o + IP_HEADER_LEN + ICMP_HEADER_LEN] {
        *b = 0;
    }

    data[o] = (4 << 4) | 5;
    data[o + 2..o + 4].copy_from_slice(&56u16.to_be_bytes());
    data[o + 8] = REPLY_TTL;
    data[o + 9] = PROTO_ICMP;
    data[o + 16..o + 20].copy_from_slice(&src4);

    let (out_src, icmp_type, icmp_code) = if terminal {
        (dst4, ICMP_DEST_UNREACHABLE, ICMP_PORT_UNREACHABLE)
    } else {
        let hop = base.wrapping_add(u32::from(orig_ttl));
        (hop.to_be_bytes(), ICMP_TIME_EXCEEDED, 0)
    };
    data[o + 12..o + 16].copy_from_slice(&out_src);

    let icmp = o + IP_HEADER_LEN;
    data[icmp] = icmp_type;
    data[icmp + 1] = icmp_code;

    let ip_cksum = checksum::buffer(&data[o..o + IP_HEADER_LEN]);
    data[o + 10..o + 12].copy_from_slice(&ip_cksum.to_be_bytes());

    let icmp_cksum = checksum::buffer(&data[icmp..o + 56]);
    data[icmp + 2..icmp + 4].copy_from_slice(&icmp_cksum.to_be_bytes());

    Action::Reply {
        offset: OUTER_V4_START,
        len: 56,
    }
}
