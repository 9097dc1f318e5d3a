//! Ingress pipeline — single entry point for all received frames.
//!
//! Every frame pulled from any device passes through [`net_rx`], which parses
//! the Ethernet header, filters by destination MAC, and dispatches to the
//! protocol handler registered for the frame's EtherType.  [`rx_loop`] is the
//! per-device RX thread body that feeds it.

use std::sync::Arc;

use log::{debug, info};

use super::ethernet::EthernetHeader;
use super::netdev::DeviceHandle;
use super::netstack::NetStack;
use super::ETH_HEADER_LEN;

/// Process one received frame through the ingress pipeline.
///
/// # Processing steps
///
/// 1. Validate minimum Ethernet frame length
/// 2. Parse destination MAC and EtherType
/// 3. Filter: accept only frames addressed to our MAC, broadcast, or multicast
/// 4. Dispatch the frame body by EtherType through the protocol registry
///
/// Frames with no registered handler are silently dropped.
pub fn net_rx(stack: &NetStack, dev: &DeviceHandle, frame: &[u8]) {
    let Ok(header) = EthernetHeader::parse(frame) else {
        debug!(
            "ingress: frame too short ({} < {})",
            frame.len(),
            ETH_HEADER_LEN
        );
        return;
    };

    // Destination MAC filter: accept our MAC, broadcast, or multicast.
    let our_mac = dev.mac();
    if header.dst != our_mac && !header.dst.is_broadcast() && !header.dst.is_multicast() {
        return;
    }

    let payload = &frame[ETH_HEADER_LEN..];
    match stack.protocols().lookup(header.ethertype) {
        Some(handler) => handler.handle_rx(stack, dev, payload),
        None => {
            debug!(
                "ingress: unknown EtherType 0x{:04x}, dropping",
                header.ethertype
            );
        }
    }
}

/// Driver-RX thread body: pull frames from `dev` until it is closed.
///
/// One thread per device.  The driver's `poll` blocks; a `None` frame means
/// the device was shut down and the loop exits.
pub fn rx_loop(stack: Arc<NetStack>, dev: DeviceHandle) {
    loop {
        match dev.poll() {
            Ok(Some(frame)) => net_rx(&stack, &dev, &frame),
            Ok(None) => {
                info!("ingress: {} closed, rx loop exiting", dev.name());
                return;
            }
            Err(e) => {
                debug!("ingress: {} poll failed: {}, rx loop exiting", dev.name(), e);
                return;
            }
        }
    }
}
