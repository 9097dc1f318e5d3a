//! Network device abstraction: `NetDriver` trait, device records, and the
//! device registry.
//!
//! This module is the boundary between frame backends (which move bytes) and
//! the protocol stack (which understands protocols).  A driver publishes an
//! immutable [`DriverSpec`]; registration clones those parameters into a
//! mutable [`Device`] record that carries the device's name, link address,
//! attached interfaces, and counters.  Protocol code only ever sees
//! [`DeviceHandle`]s.
//!
//! # Concurrency model
//!
//! The registry lock serializes registration and enumeration, never the data
//! path.  A [`DeviceHandle`] is an `Arc<Device>`: TX goes straight to the
//! driver (drivers take `&self` and use interior mutability), and the
//! interface list behind each device is a read-mostly `RwLock` written only
//! by configuration.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use bitflags::bitflags;
use log::{debug, info};

use super::ethernet;
use super::types::{DevIndex, EtherType, Ipv4Addr, MacAddr, NetError};

/// Maximum number of simultaneously registered network devices.
const MAX_DEVICES: usize = 8;

// =============================================================================
// Driver definition
// =============================================================================

bitflags! {
    /// Link-level properties of a device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        /// Administratively up.
        const UP        = 1 << 0;
        /// Local-delivery-only device; no resolution on this link.
        const LOOPBACK  = 1 << 1;
        /// The link supports broadcast frames.
        const BROADCAST = 1 << 2;
        /// Unicast transmission requires address resolution first.
        const NEED_ARP  = 1 << 3;
    }
}

/// Immutable parameters a driver publishes about itself.
///
/// Cloned into the [`Device`] record at registration; the record, not the
/// driver, is what the rest of the stack reads.
#[derive(Clone, Copy, Debug)]
pub struct DriverSpec {
    /// Maximum payload size per frame, excluding the Ethernet header.
    pub mtu: u16,
    pub flags: DeviceFlags,
    /// Link header length in octets.
    pub header_len: u16,
    /// Link address length in octets.
    pub addr_len: u16,
}

/// A raw Ethernet frame backend.
///
/// Implementations take `&self` everywhere and use interior mutability, so a
/// single driver instance may be driven by its RX thread and any number of TX
/// callers concurrently.
pub trait NetDriver: Send + Sync {
    /// Short type code identifying the backend ("loopback", "tap", ...).
    fn kind(&self) -> &'static str;

    /// Link parameters for the device record.
    fn spec(&self) -> DriverSpec;

    /// Hardware address of this instance.
    fn mac(&self) -> MacAddr;

    /// Write one complete frame.  Returns the number of bytes written.
    fn output(&self, frame: &[u8]) -> Result<usize, NetError>;

    /// Pull the next received frame.
    ///
    /// Blocks until a frame is available; `Ok(None)` means the backend has
    /// been closed and no more frames will arrive.
    fn poll(&self) -> Result<Option<Vec<u8>>, NetError>;

    /// Shut the backend down.  `poll` callers observe `Ok(None)` afterwards.
    fn close(&self);
}

// =============================================================================
// Interfaces
// =============================================================================

/// Address family of an attached interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4,
}

/// A protocol-layer identity attached to a device.
#[derive(Clone, Copy)]
pub struct Netif {
    pub dev: DevIndex,
    pub family: AddrFamily,
    pub unicast: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Default gateway (`UNSPECIFIED` if none).
    pub gateway: Ipv4Addr,
}

impl Netif {
    /// Directed broadcast address: `unicast | !netmask`.
    #[inline]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_u32_be(self.unicast.to_u32_be() | !self.netmask.to_u32_be())
    }

    /// `true` if `ip` is on this interface's directly connected subnet.
    #[inline]
    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        Ipv4Addr::in_subnet(ip, self.unicast, self.netmask)
    }

    /// Prefix length of the netmask (`255.255.255.0` → 24).
    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.netmask.to_u32_be().leading_ones() as u8
    }
}

impl fmt::Debug for Netif {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Netif {{ dev={}, {}/{} gw={} }}",
            self.dev,
            self.unicast,
            self.prefix_len(),
            self.gateway
        )
    }
}

// =============================================================================
// Device record
// =============================================================================

/// Cumulative per-device counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// A registered network device: the driver plus the mutable record the stack
/// reads (name, link address, link parameters, attached interfaces).
pub struct Device {
    index: DevIndex,
    name: String,
    mac: MacAddr,
    spec: DriverSpec,
    driver: Box<dyn NetDriver>,
    netifs: RwLock<Vec<Netif>>,
    stats: Mutex<DeviceStats>,
}

/// Stable shared reference to a registered device.
pub type DeviceHandle = Arc<Device>;

impl Device {
    #[inline]
    pub fn index(&self) -> DevIndex {
        self.index
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    #[inline]
    pub fn mtu(&self) -> u16 {
        self.spec.mtu
    }

    #[inline]
    pub fn flags(&self) -> DeviceFlags {
        self.spec.flags
    }

    /// Snapshot of the device counters.
    pub fn stats(&self) -> DeviceStats {
        *self.stats.lock().expect("device stats lock poisoned")
    }

    /// Encapsulate `payload` in an Ethernet frame and hand it to the driver.
    ///
    /// This is the single egress point for every protocol module.  Fails with
    /// `NoBufferSpace` when the payload exceeds the device MTU and `TxFailed`
    /// when the driver rejects the frame.
    pub fn transmit(
        &self,
        ethertype: EtherType,
        payload: &[u8],
        dst: MacAddr,
    ) -> Result<usize, NetError> {
        if payload.len() > self.spec.mtu as usize {
            return Err(NetError::NoBufferSpace);
        }
        let frame = ethernet::build_frame(dst, self.mac, ethertype, payload)?;
        let sent = self.driver.output(&frame)?;
        let mut stats = self.stats.lock().expect("device stats lock poisoned");
        stats.tx_packets += 1;
        stats.tx_bytes += sent as u64;
        debug!(
            "netdev: {} tx {} bytes type={} dst={}",
            self.name,
            sent,
            ethertype,
            dst
        );
        Ok(sent)
    }

    /// Pull the next received frame from the driver.
    ///
    /// Blocks inside the driver; `Ok(None)` means the device was closed.
    pub fn poll(&self) -> Result<Option<Vec<u8>>, NetError> {
        let frame = self.driver.poll()?;
        if let Some(frame) = &frame {
            let mut stats = self.stats.lock().expect("device stats lock poisoned");
            stats.rx_packets += 1;
            stats.rx_bytes += frame.len() as u64;
        }
        Ok(frame)
    }

    /// Shut the backend down and wake its RX thread.
    pub fn close(&self) {
        self.driver.close();
    }

    /// The attached interface of the given family, if configured.
    pub fn netif(&self, family: AddrFamily) -> Option<Netif> {
        self.netifs
            .read()
            .expect("netif lock poisoned")
            .iter()
            .find(|n| n.family == family)
            .copied()
    }

    /// Attach (or replace) the interface of `netif.family`.
    fn attach_netif(&self, netif: Netif) {
        let mut netifs = self.netifs.write().expect("netif lock poisoned");
        if let Some(existing) = netifs.iter_mut().find(|n| n.family == netif.family) {
            *existing = netif;
        } else {
            netifs.push(netif);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device {{ {} ({}), mac={}, mtu={} }}",
            self.name,
            self.driver.kind(),
            self.mac,
            self.spec.mtu
        )
    }
}

// =============================================================================
// Device registry
// =============================================================================

/// Control-plane storage for registered devices.
///
/// Registration clones the driver's [`DriverSpec`] into a fresh [`Device`]
/// record and assigns the next free [`DevIndex`].  The lock is never taken on
/// the data path; handles are `Arc`s.
pub struct DeviceRegistry {
    slots: RwLock<Vec<DeviceHandle>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Register a driver and obtain the device handle.
    ///
    /// The device is named `net<index>`.  Fails with `TableFull` once
    /// [`MAX_DEVICES`] records exist.
    pub fn register(&self, driver: Box<dyn NetDriver>) -> Result<DeviceHandle, NetError> {
        let mut slots = self.slots.write().expect("device registry lock poisoned");
        if slots.len() >= MAX_DEVICES {
            return Err(NetError::TableFull);
        }
        let index = DevIndex(slots.len());
        let device = Arc::new(Device {
            index,
            name: format!("net{}", index.0),
            mac: driver.mac(),
            spec: driver.spec(),
            driver,
            netifs: RwLock::new(Vec::new()),
            stats: Mutex::new(DeviceStats::default()),
        });
        info!(
            "netdev: registered {} ({}) mac={} mtu={}",
            device.name,
            device.driver.kind(),
            device.mac,
            device.spec.mtu
        );
        slots.push(Arc::clone(&device));
        Ok(device)
    }

    /// Look up a device by index.
    pub fn get(&self, index: DevIndex) -> Option<DeviceHandle> {
        self.slots
            .read()
            .expect("device registry lock poisoned")
            .get(index.0)
            .cloned()
    }

    /// The interface of the given family attached to `index`, if any.
    pub fn netif(&self, index: DevIndex, family: AddrFamily) -> Option<Netif> {
        self.get(index)?.netif(family)
    }

    /// Attach (or replace) an interface on a registered device.
    pub fn attach_netif(&self, netif: Netif) -> Result<(), NetError> {
        let device = self.get(netif.dev).ok_or(NetError::InvalidArgument)?;
        device.attach_netif(netif);
        Ok(())
    }

    /// Snapshot of all registered devices.
    pub fn enumerate(&self) -> Vec<DeviceHandle> {
        self.slots
            .read()
            .expect("device registry lock poisoned")
            .clone()
    }

    /// Number of registered devices.
    pub fn count(&self) -> usize {
        self.slots
            .read()
            .expect("device registry lock poisoned")
            .len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
