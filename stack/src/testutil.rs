//! Shared helpers for the test modules: a recording frame backend and
//! stack-construction shorthands.

use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::net::ethernet::EthernetHeader;
use crate::net::netdev::{DeviceFlags, DeviceHandle, DriverSpec, NetDriver, Netif};
use crate::net::netstack::NetStack;
use crate::net::types::{Ipv4Addr, MacAddr, NetError};
use crate::net::{ETH_HEADER_LEN, ETH_MTU};

/// Shared view of everything a [`MockDriver`] has transmitted.
pub type TxLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// Frame backend that records transmitted frames instead of moving bytes.
pub struct MockDriver {
    mac: MacAddr,
    log: TxLog,
    fail_tx: bool,
}

impl MockDriver {
    pub fn new(mac: MacAddr) -> (Self, TxLog) {
        let log: TxLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                mac,
                log: Arc::clone(&log),
                fail_tx: false,
            },
            log,
        )
    }

    /// A driver whose `output` always fails.
    pub fn failing(mac: MacAddr) -> Self {
        Self {
            mac,
            log: Arc::new(Mutex::new(Vec::new())),
            fail_tx: true,
        }
    }
}

impl NetDriver for MockDriver {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn spec(&self) -> DriverSpec {
        DriverSpec {
            mtu: ETH_MTU as u16,
            flags: DeviceFlags::UP | DeviceFlags::BROADCAST | DeviceFlags::NEED_ARP,
            header_len: ETH_HEADER_LEN as u16,
            addr_len: 6,
        }
    }

    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn output(&self, frame: &[u8]) -> Result<usize, NetError> {
        if self.fail_tx {
            return Err(NetError::TxFailed);
        }
        self.log.lock().expect("tx log poisoned").push(frame.to_vec());
        Ok(frame.len())
    }

    fn poll(&self) -> Result<Option<Vec<u8>>, NetError> {
        Ok(None)
    }

    fn close(&self) {}
}

/// A decoded mock transmission.
pub struct TxFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
    pub payload: Vec<u8>,
}

/// Decode every frame a mock driver has transmitted so far.
pub fn tx_frames(log: &TxLog) -> Vec<TxFrame> {
    log.lock()
        .expect("tx log poisoned")
        .iter()
        .map(|frame| {
            let header = EthernetHeader::parse(frame).expect("mock frame too short");
            TxFrame {
                dst: header.dst,
                src: header.src,
                ethertype: header.ethertype,
                payload: frame[ETH_HEADER_LEN..].to_vec(),
            }
        })
        .collect()
}

/// Stack with a manual clock parked at second 1000, far enough from zero
/// that tests can seed entries hundreds of seconds in the past.
pub fn test_stack() -> Arc<NetStack> {
    NetStack::new(Clock::manual(1000))
}

/// Register a recording device on `stack`.
pub fn add_device(stack: &NetStack, mac: MacAddr) -> (DeviceHandle, TxLog) {
    let (driver, log) = MockDriver::new(mac);
    let dev = stack
        .devices()
        .register(Box::new(driver))
        .expect("device registration failed");
    (dev, log)
}

/// Register a recording device and attach `addr`/24 to it.
pub fn add_configured_device(
    stack: &NetStack,
    mac: MacAddr,
    addr: Ipv4Addr,
) -> (DeviceHandle, Netif, TxLog) {
    let (dev, log) = add_device(stack, mac);
    let netif = stack
        .configure(
            dev.index(),
            addr,
            Ipv4Addr([255, 255, 255, 0]),
            Ipv4Addr::UNSPECIFIED,
        )
        .expect("configure failed");
    (dev, netif, log)
}

pub fn ip(s: &str) -> Ipv4Addr {
    Ipv4Addr::parse(s).expect("bad test address")
}

/// A locally-administered MAC ending in `last`.
pub fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, last])
}
