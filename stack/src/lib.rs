//! usernet — a userspace TCP/IP-style network stack.
//!
//! The stack runs as ordinary threads over raw Ethernet frame backends (TAP,
//! loopback).  Its center of gravity is ARP resolution: a fixed-capacity
//! neighbor table with time-based expiry, and a resolver that lets any number
//! of sender threads rendezvous on a single in-flight query.
//!
//! Everything hangs off an explicit [`net::netstack::NetStack`] context.
//! There is no process-global state, so multiple independent stacks can
//! coexist (and tests get isolated instances for free).

pub mod clock;
pub mod net;

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod arp_cache_tests;
#[cfg(test)]
mod ingress_tests;
#[cfg(test)]
mod net_types_tests;
