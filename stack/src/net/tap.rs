//! Linux TAP frame backend (`/dev/net/tun`).
//!
//! Attaches to a TAP interface in `IFF_NO_PI` mode, so reads and writes move
//! whole Ethernet frames.  The RX side multiplexes a 500 ms `poll(2)` timeout
//! with a closed flag, so [`NetDriver::close`] unblocks the RX thread without
//! racing the file descriptor.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use super::netdev::{DeviceFlags, DriverSpec, NetDriver};
use super::types::{MacAddr, NetError};
use super::{ETH_FRAME_MAX, ETH_HEADER_LEN, ETH_MTU};

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

/// RX poll timeout; bounds how long `close` takes to be observed.
const RX_POLL_TIMEOUT_MS: libc::c_int = 500;

// Kernel-facing ifreq layouts; fields are written for the ioctl, not read.
#[repr(C)]
#[allow(dead_code)]
struct IfReqFlags {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
#[allow(dead_code)]
struct IfReqHwAddr {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_hwaddr: libc::sockaddr,
}

fn ifname_bytes(name: &str) -> Result<[libc::c_char; libc::IFNAMSIZ], NetError> {
    if name.is_empty() || name.len() >= libc::IFNAMSIZ {
        return Err(NetError::InvalidArgument);
    }
    let mut out = [0 as libc::c_char; libc::IFNAMSIZ];
    for (slot, byte) in out.iter_mut().zip(name.bytes()) {
        *slot = byte as libc::c_char;
    }
    Ok(out)
}

fn last_errno() -> NetError {
    NetError::Sys(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

/// TAP device backend.
pub struct TapDriver {
    fd: libc::c_int,
    mac: MacAddr,
    closed: AtomicBool,
}

impl TapDriver {
    /// Attach to the TAP interface `ifname` (it must already exist, e.g.
    /// created with `ip tuntap add mode tap`).
    pub fn open(ifname: &str) -> Result<Self, NetError> {
        let name = ifname_bytes(ifname)?;

        let path = CString::new("/dev/net/tun").map_err(|_| NetError::InvalidArgument)?;
        // SAFETY: path is a valid NUL-terminated string; the fd is owned by
        // the returned TapDriver and closed in Drop.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(last_errno());
        }

        let mut req = IfReqFlags {
            ifr_name: name,
            ifr_flags: IFF_TAP | IFF_NO_PI,
            _pad: [0; 22],
        };
        // SAFETY: req is a properly sized ifreq for TUNSETIFF.
        if unsafe { libc::ioctl(fd, TUNSETIFF as _, &mut req) } < 0 {
            let err = last_errno();
            // SAFETY: fd came from open above and is not shared yet.
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mac = match read_hwaddr(&name) {
            Ok(mac) => mac,
            Err(err) => {
                // SAFETY: fd came from open above and is not shared yet.
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };

        info!("tap: attached to {} mac={}", ifname, mac);
        Ok(Self {
            fd,
            mac,
            closed: AtomicBool::new(false),
        })
    }
}

/// Fetch the interface's hardware address via `SIOCGIFHWADDR`.
fn read_hwaddr(name: &[libc::c_char; libc::IFNAMSIZ]) -> Result<MacAddr, NetError> {
    // SAFETY: a throwaway datagram socket for the ioctl, closed below.
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(last_errno());
    }
    let mut req = IfReqHwAddr {
        ifr_name: *name,
        // SAFETY: sockaddr is plain old data; zeroed is a valid value.
        ifr_hwaddr: unsafe { std::mem::zeroed() },
    };
    // SAFETY: req is a properly sized ifreq for SIOCGIFHWADDR.
    let rc = unsafe { libc::ioctl(sock, libc::SIOCGIFHWADDR as _, &mut req) };
    let err = if rc < 0 { Some(last_errno()) } else { None };
    // SAFETY: sock came from socket above.
    unsafe { libc::close(sock) };
    if let Some(err) = err {
        return Err(err);
    }
    let mut mac = [0u8; 6];
    for (out, raw) in mac.iter_mut().zip(req.ifr_hwaddr.sa_data.iter()) {
        *out = *raw as u8;
    }
    Ok(MacAddr(mac))
}

impl NetDriver for TapDriver {
    fn kind(&self) -> &'static str {
        "tap"
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
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::DeviceClosed);
        }
        // SAFETY: fd is open for the driver's lifetime; frame is a valid slice.
        let written = unsafe { libc::write(self.fd, frame.as_ptr() as *const _, frame.len()) };
        if written < 0 {
            debug!("tap: write failed: {}", std::io::Error::last_os_error());
            return Err(NetError::TxFailed);
        }
        Ok(written as usize)
    }

    fn poll(&self) -> Result<Option<Vec<u8>>, NetError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            // SAFETY: pfd refers to our open fd.
            let ready = unsafe { libc::poll(&mut pfd, 1, RX_POLL_TIMEOUT_MS) };
            if ready < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(NetError::Sys(err.raw_os_error().unwrap_or(0)));
            }
            if ready == 0 {
                continue;
            }
            let mut buf = vec![0u8; ETH_FRAME_MAX];
            // SAFETY: buf is a valid writable slice of ETH_FRAME_MAX bytes.
            let read = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if read < 0 {
                return Err(last_errno());
            }
            if read == 0 {
                return Ok(None);
            }
            buf.truncate(read as usize);
            return Ok(Some(buf));
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for TapDriver {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this driver and not used after Drop.
        unsafe { libc::close(self.fd) };
    }
}
