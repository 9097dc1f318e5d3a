//! Ethernet frame encapsulation and decapsulation.
//!
//! One header layout, two directions: [`EthernetHeader::parse`] on the
//! ingress path, [`build_frame`] on every egress path (ARP requests and
//! replies, deferred IPv4 payloads, the datagram layer).

use super::types::{EtherType, MacAddr, NetError};
use super::{ETH_HEADER_LEN, ETH_MTU};

/// Parsed Ethernet header.
#[derive(Clone, Copy, Debug)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// Raw EtherType value; demux decides whether it is known.
    pub ethertype: u16,
}

impl EthernetHeader {
    /// Parse the first [`ETH_HEADER_LEN`] octets of `frame`.
    pub fn parse(frame: &[u8]) -> Result<Self, NetError> {
        if frame.len() < ETH_HEADER_LEN {
            return Err(NetError::MalformedFrame);
        }
        Ok(Self {
            dst: MacAddr([frame[0], frame[1], frame[2], frame[3], frame[4], frame[5]]),
            src: MacAddr([frame[6], frame[7], frame[8], frame[9], frame[10], frame[11]]),
            ethertype: u16::from_be_bytes([frame[12], frame[13]]),
        })
    }
}

/// Build a complete Ethernet frame around `payload`.
///
/// Fails with `NoBufferSpace` if the payload exceeds the Ethernet MTU.
pub fn build_frame(
    dst: MacAddr,
    src: MacAddr,
    ethertype: EtherType,
    payload: &[u8],
) -> Result<Vec<u8>, NetError> {
    if payload.len() > ETH_MTU {
        return Err(NetError::NoBufferSpace);
    }
    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + payload.len());
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&ethertype.as_u16().to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}
