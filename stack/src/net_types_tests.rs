//! Tests for the network primitive types.

use crate::net::types::{EtherType, Ipv4Addr, MacAddr};

#[test]
fn ipv4_parse_and_display_roundtrip() {
    let addr = Ipv4Addr::parse("10.0.0.1").expect("parse failed");
    assert_eq!(addr, Ipv4Addr([10, 0, 0, 1]));
    assert_eq!(addr.to_string(), "10.0.0.1");
}

#[test]
fn ipv4_parse_rejects_garbage() {
    assert!(Ipv4Addr::parse("").is_none());
    assert!(Ipv4Addr::parse("10.0.0").is_none());
    assert!(Ipv4Addr::parse("10.0.0.1.2").is_none());
    assert!(Ipv4Addr::parse("10.0.0.256").is_none());
    assert!(Ipv4Addr::parse("a.b.c.d").is_none());
}

#[test]
fn ipv4_classification() {
    assert!(Ipv4Addr::UNSPECIFIED.is_unspecified());
    assert!(Ipv4Addr::BROADCAST.is_broadcast());
    assert!(Ipv4Addr::LOCALHOST.is_loopback());
    assert!(Ipv4Addr([224, 0, 0, 1]).is_multicast());
    assert!(!Ipv4Addr([10, 0, 0, 1]).is_multicast());
}

#[test]
fn ipv4_subnet_membership() {
    let network = Ipv4Addr([192, 168, 1, 0]);
    let mask = Ipv4Addr([255, 255, 255, 0]);
    assert!(Ipv4Addr::in_subnet(Ipv4Addr([192, 168, 1, 42]), network, mask));
    assert!(!Ipv4Addr::in_subnet(Ipv4Addr([192, 168, 2, 42]), network, mask));
}

#[test]
fn mac_sentinels() {
    assert!(MacAddr::BROADCAST.is_broadcast());
    assert!(MacAddr::BROADCAST.is_multicast());
    assert!(MacAddr::ZERO.is_zero());
    assert!(!MacAddr([0x02, 0, 0, 0, 0, 1]).is_zero());
    assert!(!MacAddr([0x02, 0, 0, 0, 0, 1]).is_multicast());
}

#[test]
fn mac_display_is_colon_hex() {
    let mac = MacAddr([0x02, 0x00, 0xab, 0xcd, 0xef, 0x01]);
    assert_eq!(mac.to_string(), "02:00:ab:cd:ef:01");
}

#[test]
fn ethertype_from_u16() {
    assert_eq!(EtherType::from_u16(0x0800), Some(EtherType::Ipv4));
    assert_eq!(EtherType::from_u16(0x0806), Some(EtherType::Arp));
    assert_eq!(EtherType::from_u16(0x86dd), None);
    assert_eq!(EtherType::Arp.as_u16(), 0x0806);
}
