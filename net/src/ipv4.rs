//! IPv4 egress/ingress shim. Grounded on `drivers/src/net/ipv4.rs`'s
//! `handle_rx` validation sequence and the header-build half of `send`; the
//! route-aware neighbor resolution (`send_via`, ARP, broadcast/multicast
//! shortcuts) is dropped entirely — this crate hands a finished datagram
//! straight to the interface, it doesn't resolve link addresses or
//! fragment.

use wispos_lib::{klog_debug, klog_trace};

use crate::bytes::{checksum_accumulate, checksum_finalize};
use crate::netdev::NetInterface;
use crate::packetbuf::Buffer;
use crate::tcp;
use crate::types::{IpProtocol, Ipv4Addr, NetError};

pub const IPV4_HEADER_LEN: usize = 20;
const IPV4_VERSION_IHL: u8 = 0x45;
const DEFAULT_TTL: u8 = 64;

/// Source and destination carried by a received datagram, handed down to
/// the transport layer once the IPv4 header itself has been stripped.
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: IpProtocol,
}

/// Prepend an IPv4 header for `protocol` addressed to `dst` and hand the
/// result to `intf`. `next_hop` is accepted for a future link-layer
/// resolution step this crate doesn't implement; today every interface is
/// directly connected, so it only affects logging.
pub fn ipv4_tx(
    intf: &'static NetInterface,
    next_hop: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: IpProtocol,
    mut buf: Buffer,
) -> Result<(), NetError> {
    klog_trace!("ipv4 tx on {} to next-hop {:?}", intf.name, next_hop);

    let total_len = buf.len() + IPV4_HEADER_LEN;
    if total_len > u16::MAX as usize {
        return Err(NetError::InvalidArgument);
    }

    let header = buf.push_header(IPV4_HEADER_LEN);
    header[0] = IPV4_VERSION_IHL;
    header[1] = 0; // tos
    header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    header[4..6].copy_from_slice(&0u16.to_be_bytes()); // id
    header[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags + fragment offset
    header[8] = DEFAULT_TTL;
    header[9] = protocol as u8;
    header[10..12].copy_from_slice(&0u16.to_be_bytes()); // checksum, filled below
    header[12..16].copy_from_slice(&intf.ip_addr.octets());
    header[16..20].copy_from_slice(&dst.octets());

    let checksum = checksum_finalize(checksum_accumulate(&buf.payload()[..IPV4_HEADER_LEN], 0));
    buf.payload_mut()[10..12].copy_from_slice(&checksum.to_be_bytes());

    intf.transmit(&buf);
    Ok(())
}

/// Validate an inbound IPv4 datagram and dispatch its payload to the
/// matching transport layer. Mirrors `handle_rx`'s check order: length,
/// version, IHL, total length, checksum, TTL.
pub fn ipv4_rx(intf: &'static NetInterface, mut buf: Buffer) {
    if buf.len() < IPV4_HEADER_LEN {
        klog_debug!("ipv4 rx: short datagram ({} bytes)", buf.len());
        return;
    }

    let header_snapshot = {
        let mut tmp = [0u8; IPV4_HEADER_LEN];
        tmp.copy_from_slice(&buf.payload()[..IPV4_HEADER_LEN]);
        tmp
    };

    let version = header_snapshot[0] >> 4;
    if version != 4 {
        klog_debug!("ipv4 rx: unsupported version {}", version);
        return;
    }

    let ihl = (header_snapshot[0] & 0x0F) as usize * 4;
    if !(IPV4_HEADER_LEN..=buf.len()).contains(&ihl) {
        klog_debug!("ipv4 rx: invalid IHL {}", ihl);
        return;
    }

    let total_len = u16::from_be_bytes([header_snapshot[2], header_snapshot[3]]) as usize;
    if total_len > buf.len() {
        klog_debug!("ipv4 rx: total length {} exceeds buffer", total_len);
        return;
    }

    let checksum = checksum_finalize(checksum_accumulate(&buf.payload()[..ihl], 0));
    if checksum != 0 {
        klog_debug!("ipv4 rx: bad header checksum");
        return;
    }

    let ttl = header_snapshot[8];
    if ttl == 0 {
        klog_debug!("ipv4 rx: ttl expired");
        return;
    }

    let Some(protocol) = IpProtocol::from_u8(header_snapshot[9]) else {
        klog_debug!("ipv4 rx: unknown protocol {}", header_snapshot[9]);
        return;
    };

    let src = Ipv4Addr([
        header_snapshot[12],
        header_snapshot[13],
        header_snapshot[14],
        header_snapshot[15],
    ]);
    let dst = Ipv4Addr([
        header_snapshot[16],
        header_snapshot[17],
        header_snapshot[18],
        header_snapshot[19],
    ]);

    if buf.pull_header(ihl).is_err() {
        klog_debug!("ipv4 rx: failed to strip header");
        return;
    }

    let header = Ipv4Header { src, dst, protocol };

    match protocol {
        IpProtocol::Tcp => tcp::tcp_rx(intf, &header, buf),
        _ => klog_debug!("ipv4 rx: dropping unhandled protocol {:?}", protocol),
    }
}
