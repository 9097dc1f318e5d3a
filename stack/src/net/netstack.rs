//! Stack-wide context: device registry, protocol registry, neighbor cache,
//! and clock.
//!
//! # Architecture
//!
//! A [`NetStack`] value owns everything that would otherwise be process-global
//! state.  Protocol modules register their inbound handlers while the stack is
//! being built; once [`NetStack::new`] returns the registries are read-only,
//! so the RX path dispatches without any lock beyond the `Arc` it already
//! holds.  Tests build throwaway stacks with a manual clock.
//!
//! # Concurrency
//!
//! The handler table is populated before the `Arc` is shared and never
//! mutated afterwards.  Interface configuration goes through the device
//! registry's own locking.  The neighbor cache carries its own single lock
//! (see [`super::arp_cache`]).

use std::sync::Arc;

use log::{debug, info};

use super::netdev::{AddrFamily, DeviceHandle, DeviceRegistry, Netif};
use super::types::{DevIndex, Ipv4Addr, NetError};
use super::{arp, arp_cache::ArpCache, ipv4};
use crate::clock::Clock;

// =============================================================================
// Protocol registry
// =============================================================================

/// Inbound handler for one EtherType.
///
/// `payload` is the frame body; the Ethernet header has already been consumed
/// by the ingress pipeline.
pub trait ProtocolHandler: Send + Sync {
    fn handle_rx(&self, stack: &NetStack, dev: &DeviceHandle, payload: &[u8]);
}

/// EtherType → handler table.
///
/// Populated while the stack is built, read-only thereafter, so the RX path
/// does plain slice scans with no lock.
pub struct ProtocolRegistry {
    handlers: Vec<(u16, Box<dyn ProtocolHandler>)>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register `handler` for `ethertype`.  At most one handler per type.
    pub fn register(
        &mut self,
        ethertype: u16,
        handler: Box<dyn ProtocolHandler>,
    ) -> Result<(), NetError> {
        if self.handlers.iter().any(|(t, _)| *t == ethertype) {
            return Err(NetError::InvalidArgument);
        }
        debug!("netstack: protocol 0x{ethertype:04x} registered");
        self.handlers.push((ethertype, handler));
        Ok(())
    }

    /// The handler registered for `ethertype`, if any.
    pub fn lookup(&self, ethertype: u16) -> Option<&dyn ProtocolHandler> {
        self.handlers
            .iter()
            .find(|(t, _)| *t == ethertype)
            .map(|(_, h)| h.as_ref())
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// NetStack
// =============================================================================

/// The stack context shared by every thread: drivers below, protocols above.
pub struct NetStack {
    clock: Clock,
    devices: DeviceRegistry,
    protocols: ProtocolRegistry,
    arp: ArpCache,
}

impl NetStack {
    /// Build a stack with the standard protocol set (ARP, IPv4) wired in.
    pub fn new(clock: Clock) -> Arc<Self> {
        let mut protocols = ProtocolRegistry::new();
        let arp = arp::init(&mut protocols);
        ipv4::init(&mut protocols);
        Arc::new(Self {
            clock,
            devices: DeviceRegistry::new(),
            protocols,
            arp,
        })
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Current stack time in whole seconds.
    #[inline]
    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    #[inline]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    #[inline]
    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.protocols
    }

    /// The neighbor cache.
    #[inline]
    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    /// Configure (or reconfigure) the IPv4 interface on a registered device.
    pub fn configure(
        &self,
        dev: DevIndex,
        unicast: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<Netif, NetError> {
        let netif = Netif {
            dev,
            family: AddrFamily::Ipv4,
            unicast,
            netmask,
            gateway,
        };
        self.devices.attach_netif(netif)?;
        info!(
            "netstack: configured dev {} -> {}/{} gw={}",
            dev,
            unicast,
            netif.prefix_len(),
            gateway
        );
        Ok(netif)
    }

    /// The IPv4 interface attached to `dev`, if configured.
    pub fn netif(&self, dev: DevIndex) -> Option<Netif> {
        self.devices.netif(dev, AddrFamily::Ipv4)
    }

    /// Check whether `ip` is assigned to any configured interface.
    pub fn is_our_addr(&self, ip: Ipv4Addr) -> bool {
        self.devices
            .enumerate()
            .iter()
            .any(|d| d.netif(AddrFamily::Ipv4).is_some_and(|n| n.unicast == ip))
    }

    /// Close every registered device, waking their RX threads.
    pub fn shutdown(&self) {
        for device in self.devices.enumerate() {
            device.close();
        }
    }
}
