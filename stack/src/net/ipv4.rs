//! IPv4 datagram layer — header construction, ingress validation, and the
//! resolver-driven egress path.
//!
//! Egress is where the ARP contract plays out: [`send`] hands the finished
//! datagram to [`arp::resolve`] and either transmits it immediately (binding
//! known), relinquishes it (query in flight, the reply path transmits it), or
//! reports the failure to the caller.

use log::debug;

use super::netdev::{DeviceFlags, DeviceHandle, Netif};
use super::netstack::{NetStack, ProtocolHandler, ProtocolRegistry};
use super::types::{EtherType, Ipv4Addr, MacAddr, NetError};
use super::{arp, ipv4_header_checksum, ETHERTYPE_IPV4, IPV4_DEFAULT_TTL, IPV4_HEADER_LEN};

// =============================================================================
// Initialization
// =============================================================================

struct Ipv4Handler;

impl ProtocolHandler for Ipv4Handler {
    fn handle_rx(&self, stack: &NetStack, dev: &DeviceHandle, payload: &[u8]) {
        handle_rx(stack, dev, payload);
    }
}

/// Register the IPv4 inbound handler under EtherType `0x0800`.
pub fn init(protocols: &mut ProtocolRegistry) {
    protocols
        .register(ETHERTYPE_IPV4, Box::new(Ipv4Handler))
        .expect("IPv4 handler registered twice");
}

// =============================================================================
// Header
// =============================================================================

/// Build a 20-octet IPv4 header (no options) with a valid checksum.
pub fn build_header(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload_len: usize) -> [u8; IPV4_HEADER_LEN] {
    let total_len = (IPV4_HEADER_LEN + payload_len) as u16;
    let mut header = [0u8; IPV4_HEADER_LEN];
    header[0] = 0x45; // version 4, IHL 5
    header[2..4].copy_from_slice(&total_len.to_be_bytes());
    header[8] = IPV4_DEFAULT_TTL;
    header[9] = proto;
    header[12..16].copy_from_slice(&src.0);
    header[16..20].copy_from_slice(&dst.0);
    let checksum = ipv4_header_checksum(&header);
    header[10..12].copy_from_slice(&checksum.to_be_bytes());
    header
}

// =============================================================================
// Ingress
// =============================================================================

/// Handle an incoming IPv4 packet.
///
/// # Validation
///
/// 1. IP version must be 4
/// 2. IHL ≥ 5 (header length ≥ 20 bytes)
/// 3. Total length ≤ packet size
/// 4. Header checksum must verify
/// 5. TTL > 0 (no forwarding, so TTL=0 is always dropped)
///
/// Packets failing any check, or not addressed to a local interface, are
/// silently dropped with a debug log.
pub fn handle_rx(stack: &NetStack, dev: &DeviceHandle, payload: &[u8]) {
    if payload.len() < IPV4_HEADER_LEN {
        debug!(
            "ipv4: packet too short ({} < {})",
            payload.len(),
            IPV4_HEADER_LEN
        );
        return;
    }

    let version = (payload[0] >> 4) & 0x0f;
    if version != 4 {
        debug!("ipv4: bad version {}", version);
        return;
    }

    let ihl = ((payload[0] & 0x0f) as usize) * 4;
    if ihl < IPV4_HEADER_LEN || payload.len() < ihl {
        debug!("ipv4: bad IHL {} (packet len {})", ihl, payload.len());
        return;
    }

    let total_len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
    if total_len < ihl || total_len > payload.len() {
        debug!(
            "ipv4: bad total_len {} (ihl {}, packet len {})",
            total_len,
            ihl,
            payload.len()
        );
        return;
    }

    if ipv4_header_checksum(&payload[..ihl]) != 0 {
        debug!("ipv4: bad header checksum");
        return;
    }

    let ttl = payload[8];
    if ttl == 0 {
        debug!("ipv4: TTL=0, dropping");
        return;
    }

    let proto = payload[9];
    let src = Ipv4Addr([payload[12], payload[13], payload[14], payload[15]]);
    let dst = Ipv4Addr([payload[16], payload[17], payload[18], payload[19]]);

    let local = stack.is_our_addr(dst)
        || dst.is_broadcast()
        || stack
            .netif(dev.index())
            .is_some_and(|n| n.broadcast() == dst);
    if !local {
        debug!("ipv4: {} is not for us, dropping", dst);
        return;
    }

    debug!(
        "ipv4: delivered proto={} src={} dst={} len={}",
        proto,
        src,
        dst,
        total_len - ihl
    );
}

// =============================================================================
// Egress
// =============================================================================

/// Send `payload` as an IPv4 datagram to `dst` through `netif`.
///
/// The next hop is `dst` itself when on the connected subnet, otherwise the
/// interface gateway.  Unicast next hops go through the resolver; `Ok` with a
/// query in flight means the datagram was buffered and will be transmitted by
/// the reply path.
pub fn send(
    stack: &NetStack,
    netif: &Netif,
    dst: Ipv4Addr,
    proto: u8,
    payload: &[u8],
) -> Result<(), NetError> {
    let dev = stack
        .devices()
        .get(netif.dev)
        .ok_or(NetError::NetworkUnreachable)?;

    let header = build_header(netif.unicast, dst, proto, payload.len());
    let mut datagram = Vec::with_capacity(IPV4_HEADER_LEN + payload.len());
    datagram.extend_from_slice(&header);
    datagram.extend_from_slice(payload);

    // Loopback and broadcast destinations skip resolution entirely.
    if dev.flags().contains(DeviceFlags::LOOPBACK) {
        dev.transmit(EtherType::Ipv4, &datagram, dev.mac())?;
        return Ok(());
    }
    if dst.is_broadcast() || dst == netif.broadcast() {
        dev.transmit(EtherType::Ipv4, &datagram, MacAddr::BROADCAST)?;
        return Ok(());
    }

    let next_hop = if netif.is_local(dst) {
        dst
    } else if !netif.gateway.is_unspecified() {
        netif.gateway
    } else {
        debug!("ipv4: no route to {}", dst);
        return Err(NetError::NetworkUnreachable);
    };

    // Links without resolution (e.g. point-to-point) take the broadcast path.
    if !dev.flags().contains(DeviceFlags::NEED_ARP) {
        dev.transmit(EtherType::Ipv4, &datagram, MacAddr::BROADCAST)?;
        return Ok(());
    }

    match arp::resolve(stack, netif, next_hop, Some(datagram))? {
        arp::Resolution::Found { ha, payload } => {
            if let Some(datagram) = payload {
                dev.transmit(EtherType::Ipv4, &datagram, ha)?;
            }
            Ok(())
        }
        // Buffered; the reply path owns the datagram now.
        arp::Resolution::Query => Ok(()),
    }
}
