//! Tests for the neighbor cache: slot lifecycle, uniqueness, expiry, and the
//! waiter rendezvous.

use std::thread;
use std::time::{Duration, Instant};

use crate::net::arp_cache::{
    ARP_CACHE_SIZE, ARP_ENTRY_TTL_SECS, ARP_SWEEP_INTERVAL_SECS, ArpCache, Query, Update,
};
use crate::net::types::{DevIndex, Ipv4Addr, NetError};
use crate::testutil::{ip, mac};

const DEV: DevIndex = DevIndex(0);
const NOW: u64 = 1000;

fn nth_addr(n: u32) -> Ipv4Addr {
    Ipv4Addr::from_u32_be(0x0a00_0000 | n)
}

// =============================================================================
// query
// =============================================================================

#[test]
fn query_miss_creates_unresolved_entry() {
    let cache = ArpCache::new();

    assert!(matches!(
        cache.query(DEV, ip("10.0.0.2"), None, NOW),
        Query::Created
    ));

    assert_eq!(cache.entry_count(), 1);
    let entry = cache.peek(ip("10.0.0.2")).expect("entry missing");
    assert!(entry.ha.is_zero());
    assert_eq!(entry.timestamp, NOW);
    assert!(!entry.has_pending);
}

#[test]
fn query_attaches_payload_on_create() {
    let cache = ArpCache::new();

    let outcome = cache.query(DEV, ip("10.0.0.2"), Some(vec![0xde, 0xad]), NOW);
    assert!(matches!(outcome, Query::Created));

    let entry = cache.peek(ip("10.0.0.2")).expect("entry missing");
    assert!(entry.has_pending);
}

#[test]
fn query_on_inflight_entry_hands_payload_back() {
    let cache = ArpCache::new();
    cache.query(DEV, ip("10.0.0.2"), Some(vec![1]), NOW);

    // Second caller does not attach a payload; the entry keeps the first.
    match cache.query(DEV, ip("10.0.0.2"), Some(vec![2]), NOW) {
        Query::InFlight { payload } => assert_eq!(payload, Some(vec![2])),
        _ => panic!("expected InFlight"),
    }
    assert_eq!(cache.entry_count(), 1);
}

#[test]
fn query_hits_resolved_entry() {
    let cache = ArpCache::new();
    cache.insert(ip("10.0.0.2"), mac(2), NOW).expect("insert failed");

    match cache.query(DEV, ip("10.0.0.2"), None, NOW + 1) {
        Query::Found { ha, payload } => {
            assert_eq!(ha, mac(2));
            assert!(payload.is_none());
        }
        _ => panic!("expected Found"),
    }
}

#[test]
fn query_full_table_fails() {
    let cache = ArpCache::new();
    for n in 0..ARP_CACHE_SIZE as u32 {
        cache.insert(nth_addr(n), mac(1), NOW).expect("fill failed");
    }

    assert!(matches!(
        cache.query(DEV, ip("192.168.0.1"), None, NOW),
        Query::Full
    ));
    assert_eq!(cache.entry_count(), ARP_CACHE_SIZE);
}

// =============================================================================
// update / insert
// =============================================================================

#[test]
fn update_without_entry_is_not_merged() {
    let cache = ArpCache::new();

    assert!(matches!(
        cache.update(ip("10.0.0.2"), mac(2), NOW),
        Update::NotMerged
    ));
    assert_eq!(cache.entry_count(), 0);
}

#[test]
fn update_merges_refreshes_and_drains() {
    let cache = ArpCache::new();
    cache.query(DEV, ip("10.0.0.2"), Some(vec![0xde, 0xad]), NOW);

    let pending = match cache.update(ip("10.0.0.2"), mac(2), NOW + 5) {
        Update::Merged { pending } => pending.expect("pending payload missing"),
        Update::NotMerged => panic!("expected merge"),
    };
    assert_eq!(pending.payload, vec![0xde, 0xad]);
    assert_eq!(pending.dev, DEV);

    let entry = cache.peek(ip("10.0.0.2")).expect("entry missing");
    assert_eq!(entry.ha, mac(2));
    assert_eq!(entry.timestamp, NOW + 5);
    assert!(!entry.has_pending);
}

#[test]
fn insert_is_unique_per_address() {
    let cache = ArpCache::new();
    cache.insert(ip("10.0.0.2"), mac(2), NOW).expect("insert failed");
    cache.insert(ip("10.0.0.2"), mac(3), NOW + 1).expect("insert failed");

    assert_eq!(cache.entry_count(), 1);
    let entry = cache.peek(ip("10.0.0.2")).expect("entry missing");
    assert_eq!(entry.ha, mac(3));
    assert_eq!(entry.timestamp, NOW + 1);
}

#[test]
fn insert_full_table_fails() {
    let cache = ArpCache::new();
    for n in 0..ARP_CACHE_SIZE as u32 {
        cache.insert(nth_addr(n), mac(1), NOW).expect("fill failed");
    }

    assert_eq!(
        cache.insert(ip("192.168.0.1"), mac(9), NOW),
        Err(NetError::TableFull)
    );
}

#[test]
fn clear_releases_pending_payload() {
    let cache = ArpCache::new();
    cache.query(DEV, ip("10.0.0.2"), Some(vec![1, 2, 3]), NOW);

    cache.clear(ip("10.0.0.2"));

    assert_eq!(cache.entry_count(), 0);
    assert!(cache.peek(ip("10.0.0.2")).is_none());
    // The payload went with the entry; a later merge attempt finds nothing.
    assert!(matches!(
        cache.update(ip("10.0.0.2"), mac(2), NOW),
        Update::NotMerged
    ));
}

// =============================================================================
// sweep
// =============================================================================

#[test]
fn sweep_evicts_only_expired_entries() {
    let cache = ArpCache::new();
    let stale_at = NOW - ARP_ENTRY_TTL_SECS - 1;
    cache.insert(ip("10.0.0.2"), mac(2), stale_at).expect("insert failed");
    cache.insert(ip("10.0.0.3"), mac(3), NOW - 1).expect("insert failed");

    cache.sweep_if_due(NOW);

    assert!(cache.peek(ip("10.0.0.2")).is_none());
    assert!(cache.peek(ip("10.0.0.3")).is_some());
}

#[test]
fn sweep_is_throttled_to_one_per_window() {
    let cache = ArpCache::new();
    cache.sweep_if_due(NOW);

    // Entry goes stale inside the throttle window; the second sweep call
    // must not run.
    cache
        .insert(ip("10.0.0.2"), mac(2), NOW - ARP_ENTRY_TTL_SECS - 50)
        .expect("insert failed");
    cache.sweep_if_due(NOW + ARP_SWEEP_INTERVAL_SECS);
    assert!(cache.peek(ip("10.0.0.2")).is_some());

    // Past the window the sweep runs and evicts.
    cache.sweep_if_due(NOW + ARP_SWEEP_INTERVAL_SECS + 1);
    assert!(cache.peek(ip("10.0.0.2")).is_none());
}

#[test]
fn entry_exactly_at_ttl_survives() {
    let cache = ArpCache::new();
    cache
        .insert(ip("10.0.0.2"), mac(2), NOW - ARP_ENTRY_TTL_SECS)
        .expect("insert failed");

    cache.sweep_if_due(NOW);

    assert!(cache.peek(ip("10.0.0.2")).is_some());
}

// =============================================================================
// waiter rendezvous
// =============================================================================

#[test]
fn wait_resolved_times_out_and_clears_entry() {
    let cache = ArpCache::new();
    cache.query(DEV, ip("10.0.0.99"), None, NOW);

    let deadline = Instant::now() + Duration::from_millis(50);
    assert_eq!(
        cache.wait_resolved(ip("10.0.0.99"), deadline),
        Err(NetError::TimedOut)
    );
    assert!(cache.peek(ip("10.0.0.99")).is_none());
}

#[test]
fn wait_resolved_wakes_on_update() {
    let cache = std::sync::Arc::new(ArpCache::new());
    cache.query(DEV, ip("10.0.0.2"), None, NOW);

    let waiter = {
        let cache = std::sync::Arc::clone(&cache);
        thread::spawn(move || {
            cache.wait_resolved(ip("10.0.0.2"), Instant::now() + Duration::from_secs(5))
        })
    };

    thread::sleep(Duration::from_millis(50));
    cache.update(ip("10.0.0.2"), mac(2), NOW + 1);

    assert_eq!(waiter.join().expect("waiter panicked"), Ok(mac(2)));
}

#[test]
fn wait_resolved_observes_clear() {
    let cache = std::sync::Arc::new(ArpCache::new());
    cache.query(DEV, ip("10.0.0.2"), None, NOW);

    let waiter = {
        let cache = std::sync::Arc::clone(&cache);
        thread::spawn(move || {
            cache.wait_resolved(ip("10.0.0.2"), Instant::now() + Duration::from_secs(5))
        })
    };

    thread::sleep(Duration::from_millis(50));
    cache.clear(ip("10.0.0.2"));

    assert_eq!(
        waiter.join().expect("waiter panicked"),
        Err(NetError::HostUnreachable)
    );
}

#[test]
fn all_waiters_serialize_through_one_reply() {
    let cache = std::sync::Arc::new(ArpCache::new());
    cache.query(DEV, ip("10.0.0.2"), None, NOW);

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let cache = std::sync::Arc::clone(&cache);
            thread::spawn(move || {
                cache.wait_resolved(ip("10.0.0.2"), Instant::now() + Duration::from_secs(5))
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    cache.update(ip("10.0.0.2"), mac(7), NOW + 1);

    for waiter in waiters {
        assert_eq!(waiter.join().expect("waiter panicked"), Ok(mac(7)));
    }
}
