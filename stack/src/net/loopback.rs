//! Loopback device (`lo`).
//!
//! A trivial internal queue: `output` pushes frames, and `poll` blocks until
//! one is available and hands it back to the RX thread.  No wire, no
//! resolution.
//! Closing the device wakes any blocked `poll` caller, which then observes
//! end-of-stream.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use super::netdev::{DeviceFlags, DriverSpec, NetDriver};
use super::types::{MacAddr, NetError};
use super::{ETH_HEADER_LEN, ETH_MTU};

/// Maximum number of frames queued before `output` fails.
const LOOPBACK_QUEUE_CAPACITY: usize = 256;

struct LoopbackInner {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

/// The loopback frame backend.
pub struct LoopbackDriver {
    inner: Mutex<LoopbackInner>,
    available: Condvar,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LoopbackInner {
                queue: VecDeque::with_capacity(64),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackInner> {
        self.inner.lock().expect("loopback lock poisoned")
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetDriver for LoopbackDriver {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    fn spec(&self) -> DriverSpec {
        DriverSpec {
            mtu: ETH_MTU as u16,
            flags: DeviceFlags::UP | DeviceFlags::LOOPBACK,
            header_len: ETH_HEADER_LEN as u16,
            addr_len: 6,
        }
    }

    fn mac(&self) -> MacAddr {
        MacAddr::ZERO
    }

    fn output(&self, frame: &[u8]) -> Result<usize, NetError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(NetError::DeviceClosed);
        }
        if inner.queue.len() >= LOOPBACK_QUEUE_CAPACITY {
            return Err(NetError::NoBufferSpace);
        }
        inner.queue.push_back(frame.to_vec());
        self.available.notify_one();
        Ok(frame.len())
    }

    fn poll(&self) -> Result<Option<Vec<u8>>, NetError> {
        let mut inner = self.lock();
        loop {
            if let Some(frame) = inner.queue.pop_front() {
                return Ok(Some(frame));
            }
            if inner.closed {
                return Ok(None);
            }
            inner = self
                .available
                .wait(inner)
                .expect("loopback lock poisoned");
        }
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.available.notify_all();
    }
}
