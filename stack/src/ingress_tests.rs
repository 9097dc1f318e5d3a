//! Tests for the ingress pipeline: framing checks, MAC filtering, and
//! EtherType demux.

use crate::net::arp::ArpMessage;
use crate::net::ethernet::build_frame;
use crate::net::ingress::net_rx;
use crate::net::types::{EtherType, MacAddr};
use crate::testutil::{add_configured_device, ip, mac, test_stack, tx_frames};

fn request_frame(dst: MacAddr) -> Vec<u8> {
    let msg = ArpMessage::request(mac(7), ip("10.0.0.7"), ip("10.0.0.1"));
    build_frame(dst, mac(7), EtherType::Arp, &msg.encode()).expect("frame build failed")
}

#[test]
fn broadcast_arp_request_reaches_the_handler() {
    let stack = test_stack();
    let (dev, _netif, log) = add_configured_device(&stack, mac(1), ip("10.0.0.1"));

    net_rx(&stack, &dev, &request_frame(MacAddr::BROADCAST));

    // The handler learned the sender and answered.
    assert!(stack.arp_cache().peek(ip("10.0.0.7")).is_some());
    assert_eq!(tx_frames(&log).len(), 1);
}

#[test]
fn unicast_frame_to_us_is_accepted() {
    let stack = test_stack();
    let (dev, _netif, _log) = add_configured_device(&stack, mac(1), ip("10.0.0.1"));

    net_rx(&stack, &dev, &request_frame(mac(1)));

    assert!(stack.arp_cache().peek(ip("10.0.0.7")).is_some());
}

#[test]
fn foreign_unicast_frame_is_filtered() {
    let stack = test_stack();
    let (dev, _netif, log) = add_configured_device(&stack, mac(1), ip("10.0.0.1"));

    net_rx(&stack, &dev, &request_frame(mac(9)));

    assert_eq!(stack.arp_cache().entry_count(), 0);
    assert!(tx_frames(&log).is_empty());
}

#[test]
fn short_frame_is_dropped() {
    let stack = test_stack();
    let (dev, _netif, log) = add_configured_device(&stack, mac(1), ip("10.0.0.1"));

    net_rx(&stack, &dev, &[0u8; 13]);

    assert_eq!(stack.arp_cache().entry_count(), 0);
    assert!(tx_frames(&log).is_empty());
}

#[test]
fn unknown_ethertype_is_dropped() {
    let stack = test_stack();
    let (dev, _netif, log) = add_configured_device(&stack, mac(1), ip("10.0.0.1"));

    // IPv6 EtherType with an ARP-shaped body: no handler, no effect.
    let mut frame = request_frame(MacAddr::BROADCAST);
    frame[12] = 0x86;
    frame[13] = 0xdd;
    net_rx(&stack, &dev, &frame);

    assert_eq!(stack.arp_cache().entry_count(), 0);
    assert!(tx_frames(&log).is_empty());
}
