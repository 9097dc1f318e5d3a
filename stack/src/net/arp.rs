//! ARP protocol — wire codec, request/reply processing, and the resolver.
//!
//! Implements RFC 826 ARP for Ethernet/IPv4.  Incoming ARP frames are parsed,
//! validated, and merged into the [`ArpCache`]:
//!
//! - **Reply** (`op=2`): refreshes the binding and flushes a deferred payload.
//! - **Request** (`op=1`) for our unicast: answers with a unicast reply.
//! - **Any ARP**: opportunistically updates the cache if the sender is known.
//!
//! Outbound, [`resolve`] is the lookup-or-query entry point for the datagram
//! layer.  `Found` means use the returned hardware address now.  `Query`
//! means the payload has been buffered and the reply will transmit it, so the
//! caller must drop it from its own pipeline.  An error means no resolution,
//! and the payload is released.  The integer rendering of that contract
//! (1 / 0 / −1) is [`resolve_code`].

use std::time::Instant;

use log::{debug, warn};

use super::arp_cache::{ARP_RESOLVE_TIMEOUT, ArpCache, PendingFrame, Query, Update};
use super::netdev::{DeviceHandle, Netif};
use super::netstack::{NetStack, ProtocolHandler, ProtocolRegistry};
use super::types::{EtherType, Ipv4Addr, MacAddr, NetError};
use super::{
    ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_MESSAGE_LEN, ARP_OPER_REPLY, ARP_OPER_REQUEST,
    ARP_PLEN_IPV4, ARP_PTYPE_IPV4, ETHERTYPE_ARP,
};

// =============================================================================
// Wire codec
// =============================================================================

/// A parsed ARP-over-Ethernet message.
///
/// The fixed fields (`hrd`, `pro`, `hln`, `pln`) are validated on parse and
/// regenerated on encode; only the variable fields are carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpMessage {
    pub op: u16,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

impl ArpMessage {
    /// A broadcast-bound request: who has `tpa`?  Tell `spa`.
    pub const fn request(sha: MacAddr, spa: Ipv4Addr, tpa: Ipv4Addr) -> Self {
        Self {
            op: ARP_OPER_REQUEST,
            sha,
            spa,
            tha: MacAddr::ZERO,
            tpa,
        }
    }

    /// A unicast reply: `spa` is at `sha`.
    pub const fn reply(sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> Self {
        Self {
            op: ARP_OPER_REPLY,
            sha,
            spa,
            tha,
            tpa,
        }
    }

    /// Parse the first [`ARP_MESSAGE_LEN`] octets of `data`.
    ///
    /// Trailing octets (Ethernet padding) are ignored.  Fails on short input
    /// or any fixed-field mismatch.
    pub fn parse(data: &[u8]) -> Result<Self, NetError> {
        if data.len() < ARP_MESSAGE_LEN {
            return Err(NetError::MalformedFrame);
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];

        if htype != ARP_HTYPE_ETHERNET
            || ptype != ARP_PTYPE_IPV4
            || hlen != ARP_HLEN_ETHERNET
            || plen != ARP_PLEN_IPV4
        {
            return Err(NetError::MalformedFrame);
        }

        Ok(Self {
            op: u16::from_be_bytes([data[6], data[7]]),
            sha: MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]),
            spa: Ipv4Addr([data[14], data[15], data[16], data[17]]),
            tha: MacAddr([data[18], data[19], data[20], data[21], data[22], data[23]]),
            tpa: Ipv4Addr([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Serialize to the 28-octet wire layout.
    pub fn encode(&self) -> [u8; ARP_MESSAGE_LEN] {
        let mut data = [0u8; ARP_MESSAGE_LEN];
        data[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        data[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        data[4] = ARP_HLEN_ETHERNET;
        data[5] = ARP_PLEN_IPV4;
        data[6..8].copy_from_slice(&self.op.to_be_bytes());
        data[8..14].copy_from_slice(&self.sha.0);
        data[14..18].copy_from_slice(&self.spa.0);
        data[18..24].copy_from_slice(&self.tha.0);
        data[24..28].copy_from_slice(&self.tpa.0);
        data
    }
}

// =============================================================================
// Initialization
// =============================================================================

struct ArpHandler;

impl ProtocolHandler for ArpHandler {
    fn handle_rx(&self, stack: &NetStack, dev: &DeviceHandle, payload: &[u8]) {
        handle_rx(stack, dev, payload);
    }
}

/// Register the ARP inbound handler under EtherType `0x0806` and create the
/// neighbor cache it feeds.
pub fn init(protocols: &mut ProtocolRegistry) -> ArpCache {
    protocols
        .register(ETHERTYPE_ARP, Box::new(ArpHandler))
        .expect("ARP handler registered twice");
    ArpCache::new()
}

// =============================================================================
// Receive path
// =============================================================================

/// Handle an incoming ARP frame.
///
/// `payload` points at the first byte of the ARP message (Ethernet header has
/// been consumed by the ingress pipeline).  Malformed messages are dropped
/// silently; the expiry sweep piggybacks on frame arrival, throttled inside
/// the cache.
pub fn handle_rx(stack: &NetStack, dev: &DeviceHandle, payload: &[u8]) {
    let msg = match ArpMessage::parse(payload) {
        Ok(msg) => msg,
        Err(_) => {
            debug!("arp: malformed message ({} bytes), dropping", payload.len());
            return;
        }
    };

    let now = stack.now_secs();
    let cache = stack.arp_cache();
    cache.sweep_if_due(now);

    // RFC 826: opportunistically refresh the cache if the sender is known.
    let (merged, pending) = match cache.update(msg.spa, msg.sha, now) {
        Update::Merged { pending } => (true, pending),
        Update::NotMerged => (false, None),
    };

    if let Some(frame) = pending {
        drain_pending(stack, dev, frame, msg.sha);
    }

    let Some(netif) = stack.netif(dev.index()) else {
        return;
    };
    if netif.unicast.is_unspecified() || netif.unicast != msg.tpa {
        return;
    }

    // Targeted at our unicast: learn the sender even if it was unknown.
    if !merged {
        if let Err(e) = cache.insert(msg.spa, msg.sha, now) {
            debug!("arp: dropping binding {} -> {}: {}", msg.spa, msg.sha, e);
        }
    }

    match msg.op {
        ARP_OPER_REQUEST => {
            debug!(
                "arp: request for {} from {} ({}), sending reply",
                msg.tpa, msg.spa, msg.sha
            );
            let reply = ArpMessage::reply(dev.mac(), netif.unicast, msg.sha, msg.spa);
            if let Err(e) = dev.transmit(EtherType::Arp, &reply.encode(), msg.sha) {
                debug!("arp: reply tx failed: {}", e);
            }
        }
        ARP_OPER_REPLY => {
            debug!("arp: reply from {} ({})", msg.spa, msg.sha);
        }
        op => {
            debug!("arp: unknown opcode {}", op);
        }
    }
}

/// Transmit a payload that was deferred awaiting resolution.
///
/// The payload was built for the egress path of the device it was queued on;
/// if the reply arrived elsewhere (multi-homed host), transmission still uses
/// the originating device, and the mismatch is surfaced as a warning.
fn drain_pending(stack: &NetStack, rx_dev: &DeviceHandle, frame: PendingFrame, ha: MacAddr) {
    if frame.dev != rx_dev.index() {
        warn!(
            "arp: reply arrived on dev {} but payload was queued on dev {}, using the latter",
            rx_dev.index(),
            frame.dev
        );
    }
    let Some(origin) = stack.devices().get(frame.dev) else {
        debug!("arp: originating dev {} is gone, dropping payload", frame.dev);
        return;
    };
    if let Err(e) = origin.transmit(EtherType::Ipv4, &frame.payload, ha) {
        debug!("arp: deferred payload tx failed: {}", e);
    }
}

// =============================================================================
// Transmit helpers
// =============================================================================

/// Broadcast a request for `tpa` out of `dev`.
pub fn send_request(dev: &DeviceHandle, netif: &Netif, tpa: Ipv4Addr) -> Result<(), NetError> {
    let msg = ArpMessage::request(dev.mac(), netif.unicast, tpa);
    debug!("arp: sending request for {} on {}", tpa, dev.name());
    dev.transmit(EtherType::Arp, &msg.encode(), MacAddr::BROADCAST)?;
    Ok(())
}

// =============================================================================
// Resolver
// =============================================================================

/// Successful resolver outcomes.
pub enum Resolution {
    /// The binding is known: transmit to `ha` now.  A payload passed in is
    /// handed back untouched.
    Found {
        ha: MacAddr,
        payload: Option<Vec<u8>>,
    },
    /// The payload (if any) was buffered and a query broadcast; the reply
    /// path will transmit it.  Drop it from your pipeline.
    Query,
}

impl Resolution {
    /// Integer rendering of the outcome: `Found` = 1, `Query` = 0.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Found { .. } => 1,
            Self::Query => 0,
        }
    }
}

/// Integer rendering of a full resolver result: 1 / 0 / −1.
pub fn resolve_code(result: &Result<Resolution, NetError>) -> i32 {
    match result {
        Ok(resolution) => resolution.code(),
        Err(_) => -1,
    }
}

/// Map `pa` to a hardware address via `netif`, querying the network if the
/// binding is unknown.
///
/// - Cache hit: returns [`Resolution::Found`] immediately.
/// - Miss: creates a query-in-flight entry (buffering `payload`, which must
///   fit the device MTU), broadcasts a request, and returns
///   [`Resolution::Query`].
/// - Query already in flight: retransmits a request to cover loss of the
///   first, then parks on the entry until the reply arrives or the
///   1-second deadline passes, whichever is first.
///
/// A transmit failure leaves the cache untouched so a later call can retry.
pub fn resolve(
    stack: &NetStack,
    netif: &Netif,
    pa: Ipv4Addr,
    payload: Option<Vec<u8>>,
) -> Result<Resolution, NetError> {
    let dev = stack
        .devices()
        .get(netif.dev)
        .ok_or(NetError::NetworkUnreachable)?;
    if let Some(p) = &payload {
        if p.len() > dev.mtu() as usize {
            return Err(NetError::NoBufferSpace);
        }
    }

    let deadline = Instant::now() + ARP_RESOLVE_TIMEOUT;
    let now = stack.now_secs();

    match stack.arp_cache().query(netif.dev, pa, payload, now) {
        Query::Found { ha, payload } => Ok(Resolution::Found { ha, payload }),
        Query::InFlight { payload } => {
            send_request(&dev, netif, pa)?;
            let ha = stack.arp_cache().wait_resolved(pa, deadline)?;
            Ok(Resolution::Found { ha, payload })
        }
        Query::Created => {
            send_request(&dev, netif, pa)?;
            Ok(Resolution::Query)
        }
        Query::Full => Err(NetError::TableFull),
    }
}
