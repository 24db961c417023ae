use crate::config::defaults::DEFAULT_CACHE_TTL;
use crate::types::PacketSize;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An advisory store of converged PMTU values per peer address.
///
/// A cached value only seeds the initial `eff_pmtu` of a new path, which is
/// then validated by probing as normal.
pub trait PmtuCache: Debug + Send + Sync {
    /// The cached PMTU for `addr`, unless missing or expired at `now`.
    fn lookup(&self, addr: IpAddr, now: Instant) -> Option<PacketSize>;

    /// Record the PMTU `addr` converged to.
    fn store(&self, addr: IpAddr, pmtu: PacketSize, now: Instant);
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    pmtu: PacketSize,
    timestamp: Instant,
}

/// An in-memory `PmtuCache` with a fixed time-to-live.
///
/// Cheaply cloneable, clones share the same entries.
#[derive(Debug, Clone)]
pub struct MemoryPmtuCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<IpAddr, CacheEntry>>>,
}

impl MemoryPmtuCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every entry expired at `now`.
    pub fn purge(&self, now: Instant) {
        self.entries
            .write()
            .retain(|_, entry| now.saturating_duration_since(entry.timestamp) <= self.ttl);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryPmtuCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl PmtuCache for MemoryPmtuCache {
    fn lookup(&self, addr: IpAddr, now: Instant) -> Option<PacketSize> {
        let entry = self.entries.read().get(&addr).copied()?;
        if now.saturating_duration_since(entry.timestamp) > self.ttl {
            tracing::debug!(%addr, "cached pmtu expired");
            self.entries.write().remove(&addr);
            None
        } else {
            Some(entry.pmtu)
        }
    }

    fn store(&self, addr: IpAddr, pmtu: PacketSize, now: Instant) {
        self.entries.write().insert(
            addr,
            CacheEntry {
                pmtu,
                timestamp: now,
            },
        );
    }
}
