//! arping — resolve an IPv4 address on the local link and print the result.
//!
//! Drives the stack over a TAP interface:
//!
//! ```text
//! # ip tuntap add dev tap0 mode tap
//! # ip link set tap0 up
//! arping tap0 10.0.0.1/24 10.0.0.2
//! ```

#[cfg(target_os = "linux")]
use log::{Log, Metadata, Record};

#[cfg(target_os = "linux")]
struct StderrLogger;

#[cfg(target_os = "linux")]
impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level().as_str().to_lowercase(), record.args());
        }
    }

    fn flush(&self) {}
}

#[cfg(target_os = "linux")]
static LOGGER: StderrLogger = StderrLogger;

#[cfg(target_os = "linux")]
fn usage() -> ! {
    eprintln!("usage: arping [-v] <tap-if> <local-addr>/<prefix> <target-addr>");
    std::process::exit(2);
}

#[cfg(target_os = "linux")]
fn main() {
    use std::sync::Arc;
    use std::thread;

    use usernet_stack::clock::Clock;
    use usernet_stack::net::netstack::NetStack;
    use usernet_stack::net::tap::TapDriver;
    use usernet_stack::net::types::Ipv4Addr;
    use usernet_stack::net::{arp, ingress};

    let mut verbose = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" => verbose = true,
            _ => positional.push(arg),
        }
    }
    let [ifname, local, target] = positional.as_slice() else {
        usage();
    };

    log::set_logger(&LOGGER).expect("logger already installed");
    log::set_max_level(if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });

    let (local_addr, prefix) = match local.split_once('/') {
        Some((addr, prefix)) => (
            Ipv4Addr::parse(addr).unwrap_or_else(|| usage()),
            prefix.parse::<u8>().ok().filter(|p| *p <= 32).unwrap_or_else(|| usage()),
        ),
        None => usage(),
    };
    let target_addr = Ipv4Addr::parse(target).unwrap_or_else(|| usage());
    let netmask = if prefix == 0 {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from_u32_be(!0u32 << (32 - prefix))
    };

    let stack = NetStack::new(Clock::monotonic());

    let driver = match TapDriver::open(ifname) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("arping: cannot open {ifname}: {e}");
            std::process::exit(1);
        }
    };
    let dev = match stack.devices().register(Box::new(driver)) {
        Ok(dev) => dev,
        Err(e) => {
            eprintln!("arping: cannot register {ifname}: {e}");
            std::process::exit(1);
        }
    };
    let netif = match stack.configure(dev.index(), local_addr, netmask, Ipv4Addr::UNSPECIFIED) {
        Ok(netif) => netif,
        Err(e) => {
            eprintln!("arping: cannot configure {ifname}: {e}");
            std::process::exit(1);
        }
    };

    let rx = {
        let stack = Arc::clone(&stack);
        let dev = Arc::clone(&dev);
        thread::spawn(move || ingress::rx_loop(stack, dev))
    };

    let mut found = None;
    for attempt in 1..=3 {
        match arp::resolve(&stack, &netif, target_addr, None) {
            Ok(arp::Resolution::Found { ha, .. }) => {
                found = Some(ha);
                break;
            }
            // Query broadcast; the next attempt joins the in-flight wait.
            Ok(arp::Resolution::Query) => continue,
            Err(e) => {
                log::info!("arping: attempt {attempt}: {e}");
            }
        }
    }

    stack.shutdown();
    let _ = rx.join();

    match found {
        Some(ha) => {
            println!("{target_addr} is-at {ha}");
        }
        None => {
            println!("{target_addr} did not answer");
            std::process::exit(1);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("arping: TAP support requires Linux");
    std::process::exit(1);
}
