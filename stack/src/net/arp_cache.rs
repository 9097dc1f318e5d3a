//! ARP neighbor cache: fixed-capacity table with time-based expiry and a
//! per-entry waiter rendezvous.
//!
//! The table is a flat array of [`ARP_CACHE_SIZE`] slots scanned linearly:
//! bounded worst case, no hash index.  An entry whose hardware address is
//! still all-zero is *query-in-flight*: a request has been broadcast and any
//! number of resolver threads may be parked on the slot's condvar waiting for
//! the reply.  Every state transition a waiter cares about (resolution,
//! clear, expiry) broadcasts on that condvar while the cache lock is held, so
//! waiters re-check entry state on every wakeup and can never miss a
//! transition.
//!
//! # Concurrency
//!
//! One mutex covers the whole table plus the sweep throttle timestamp.
//! Methods take the lock, mutate, signal, and return before any I/O; frames
//! drained out of a slot are handed back to the caller for transmission
//! outside the lock.  The only in-lock suspension point is
//! [`ArpCache::wait_resolved`], whose condvar wait releases the lock
//! atomically and re-acquires it on wake.
//!
//! # Timestamps
//!
//! Entries are stamped in whole seconds supplied by the caller, which keeps
//! TTL and sweep behavior deterministic under test clocks.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use super::types::{DevIndex, Ipv4Addr, MacAddr, NetError};

// =============================================================================
// Constants
// =============================================================================

/// Number of slots in the table.
pub const ARP_CACHE_SIZE: usize = 4096;

/// Seconds an entry may go without a write before the sweep evicts it.
pub const ARP_ENTRY_TTL_SECS: u64 = 300;

/// Minimum seconds between two expiry sweeps.
pub const ARP_SWEEP_INTERVAL_SECS: u64 = 10;

/// How long a resolver thread waits for an in-flight query to complete.
pub const ARP_RESOLVE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Entries
// =============================================================================

/// An outbound payload deferred until its destination resolves.
///
/// `dev` is the device whose egress path the payload was built for; a reply
/// arriving on a different device must still transmit through this one.
pub struct PendingFrame {
    pub payload: Vec<u8>,
    pub dev: DevIndex,
}

/// One table slot.
///
/// A non-`used` slot carries no meaningful state besides its condvar, which
/// persists across occupants so parked waiters always observe the clear.
struct Slot {
    used: bool,
    pa: Ipv4Addr,
    ha: MacAddr,
    /// Seconds-since-epoch of the last write (insert or update).
    timestamp: u64,
    pending: Option<PendingFrame>,
    waiters: Arc<Condvar>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            used: false,
            pa: Ipv4Addr::UNSPECIFIED,
            ha: MacAddr::ZERO,
            timestamp: 0,
            pending: None,
            waiters: Arc::new(Condvar::new()),
        }
    }

    /// Free the slot and wake every parked waiter.
    fn clear(&mut self) {
        self.used = false;
        self.pa = Ipv4Addr::UNSPECIFIED;
        self.ha = MacAddr::ZERO;
        self.timestamp = 0;
        self.pending = None;
        self.waiters.notify_all();
    }
}

struct CacheInner {
    slots: Vec<Slot>,
    /// Seconds-since-epoch of the most recent sweep.
    last_sweep: u64,
}

impl CacheInner {
    fn find_used(&self, pa: Ipv4Addr) -> Option<usize> {
        self.slots.iter().position(|s| s.used && s.pa == pa)
    }

    fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.used)
    }

    /// Evict every entry older than the TTL.
    fn sweep(&mut self, now: u64) {
        for slot in self.slots.iter_mut() {
            if slot.used && now.saturating_sub(slot.timestamp) > ARP_ENTRY_TTL_SECS {
                debug!("arp: sweeping stale entry {}", slot.pa);
                slot.clear();
            }
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of merging an observed sender binding, [`ArpCache::update`].
pub enum Update {
    /// An entry existed and was refreshed.  Any deferred payload is handed
    /// back for the caller to transmit outside the lock.
    Merged { pending: Option<PendingFrame> },
    /// No entry for that protocol address; nothing was changed.
    NotMerged,
}

/// Result of a resolver lookup, [`ArpCache::query`].
pub enum Query {
    /// The binding is resolved; any payload is handed back to the caller.
    Found {
        ha: MacAddr,
        payload: Option<Vec<u8>>,
    },
    /// A query for this address is already in flight.  The caller should
    /// retransmit a request and park on [`ArpCache::wait_resolved`]; its
    /// payload is handed back (only the entry creator attaches one).
    InFlight { payload: Option<Vec<u8>> },
    /// A fresh query-in-flight entry was created (payload attached, if any).
    /// The caller must broadcast a request.
    Created,
    /// No free slot; the lookup failed.
    Full,
}

/// Read-only view of one entry, for diagnostics and tests.
#[derive(Clone, Copy, Debug)]
pub struct EntrySnapshot {
    pub ha: MacAddr,
    pub timestamp: u64,
    pub has_pending: bool,
}

// =============================================================================
// ArpCache
// =============================================================================

/// The neighbor table.  See the module docs for locking and signaling rules.
pub struct ArpCache {
    inner: Mutex<CacheInner>,
}

impl ArpCache {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(ARP_CACHE_SIZE);
        slots.resize_with(ARP_CACHE_SIZE, Slot::empty);
        Self {
            inner: Mutex::new(CacheInner {
                slots,
                last_sweep: 0,
            }),
        }
    }

    /// Run the expiry sweep, at most once per [`ARP_SWEEP_INTERVAL_SECS`].
    pub fn sweep_if_due(&self, now: u64) {
        let mut inner = self.lock();
        if now.saturating_sub(inner.last_sweep) > ARP_SWEEP_INTERVAL_SECS {
            inner.last_sweep = now;
            inner.sweep(now);
        }
    }

    /// Merge an observed sender binding into an existing entry.
    ///
    /// On a hit: the hardware address is overwritten, the timestamp is
    /// refreshed, waiters are woken, and any deferred payload is drained out
    /// for the caller to transmit.  On a miss nothing changes.
    pub fn update(&self, pa: Ipv4Addr, ha: MacAddr, now: u64) -> Update {
        let mut inner = self.lock();
        let Some(idx) = inner.find_used(pa) else {
            return Update::NotMerged;
        };
        let slot = &mut inner.slots[idx];
        slot.ha = ha;
        slot.timestamp = now;
        let pending = slot.pending.take();
        slot.waiters.notify_all();
        debug!("arp: merged {} -> {}", pa, ha);
        Update::Merged { pending }
    }

    /// Insert a resolved binding.
    ///
    /// Callers race with other inserters for the same address (the receive
    /// handler re-acquires the lock between its merge attempt and this call),
    /// so an existing entry is refreshed in place rather than duplicated.
    /// Fails with `TableFull` when no slot is free.
    pub fn insert(&self, pa: Ipv4Addr, ha: MacAddr, now: u64) -> Result<(), NetError> {
        let mut inner = self.lock();
        if let Some(idx) = inner.find_used(pa) {
            let slot = &mut inner.slots[idx];
            slot.ha = ha;
            slot.timestamp = now;
            slot.waiters.notify_all();
            return Ok(());
        }
        let Some(idx) = inner.find_free() else {
            return Err(NetError::TableFull);
        };
        let slot = &mut inner.slots[idx];
        slot.used = true;
        slot.pa = pa;
        slot.ha = ha;
        slot.timestamp = now;
        slot.pending = None;
        slot.waiters.notify_all();
        debug!("arp: inserted {} -> {}", pa, ha);
        Ok(())
    }

    /// Resolver-side lookup-or-create.
    ///
    /// `dev` is recorded alongside an attached payload so a reply arriving on
    /// a different device still transmits through the originating one.
    pub fn query(
        &self,
        dev: DevIndex,
        pa: Ipv4Addr,
        payload: Option<Vec<u8>>,
        now: u64,
    ) -> Query {
        let mut inner = self.lock();
        if let Some(idx) = inner.find_used(pa) {
            let slot = &inner.slots[idx];
            if slot.ha.is_zero() {
                return Query::InFlight { payload };
            }
            return Query::Found {
                ha: slot.ha,
                payload,
            };
        }
        let Some(idx) = inner.find_free() else {
            debug!("arp: table full, cannot query {}", pa);
            return Query::Full;
        };
        let slot = &mut inner.slots[idx];
        slot.used = true;
        slot.pa = pa;
        slot.ha = MacAddr::ZERO;
        slot.timestamp = now;
        slot.pending = payload.map(|payload| PendingFrame { payload, dev });
        debug!("arp: created query-in-flight entry for {}", pa);
        Query::Created
    }

    /// Park until the in-flight query for `pa` resolves, or `deadline`.
    ///
    /// Spurious wakeups re-check entry state; the deadline is absolute so
    /// they cannot extend the wait.  On timeout the entry is cleared (waking
    /// any other waiters, who then observe the free slot and fail too).
    pub fn wait_resolved(&self, pa: Ipv4Addr, deadline: Instant) -> Result<MacAddr, NetError> {
        let mut inner = self.lock();
        loop {
            let Some(idx) = inner.find_used(pa) else {
                // Cleared by a sweep or another waiter's timeout.
                return Err(NetError::HostUnreachable);
            };
            if !inner.slots[idx].ha.is_zero() {
                return Ok(inner.slots[idx].ha);
            }
            let now = Instant::now();
            if now >= deadline {
                inner.slots[idx].clear();
                return Err(NetError::TimedOut);
            }
            let waiters = Arc::clone(&inner.slots[idx].waiters);
            let (guard, _) = waiters
                .wait_timeout(inner, deadline - now)
                .expect("arp cache lock poisoned");
            inner = guard;
        }
    }

    /// Drop the entry for `pa`, waking any waiters.
    pub fn clear(&self, pa: Ipv4Addr) {
        let mut inner = self.lock();
        if let Some(idx) = inner.find_used(pa) {
            inner.slots[idx].clear();
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Number of live entries.
    pub fn entry_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.used).count()
    }

    /// Read-only view of the entry for `pa`, if live.
    pub fn peek(&self, pa: Ipv4Addr) -> Option<EntrySnapshot> {
        let inner = self.lock();
        let idx = inner.find_used(pa)?;
        let slot = &inner.slots[idx];
        Some(EntrySnapshot {
            ha: slot.ha,
            timestamp: slot.timestamp,
            has_pending: slot.pending.is_some(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().expect("arp cache lock poisoned")
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}
