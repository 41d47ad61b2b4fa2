//! Common tier contract and the failure-tracking/degradation logic shared
//! by L1/L2/L3: three consecutive storage failures disable a tier and emit
//! a `degraded` statistic; one success re-enables it (spec.md §4.B).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use super::{CacheEntry, CacheError};

#[derive(Debug, Default, Clone, Serialize)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions_lru: u64,
    pub evictions_ttl: u64,
    pub evictions_health: u64,
    pub evictions_corruption: u64,
    pub current_size: u64,
    pub degraded: bool,
}

/// Atomic counters backing a `TierSnapshot`, plus the consecutive-failure
/// auto-disable/re-enable logic common to every tier.
#[derive(Debug, Default)]
pub struct TierStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions_lru: AtomicU64,
    pub evictions_ttl: AtomicU64,
    pub evictions_health: AtomicU64,
    pub evictions_corruption: AtomicU64,
    consecutive_failures: AtomicU32,
    enabled: AtomicBool,
}

const FAILURE_THRESHOLD: u32 = 3;

impl TierStats {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Call after a successful storage operation: resets the failure count
    /// and re-enables the tier if it was disabled.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Call after a failed storage operation. Returns `true` if this
    /// failure just disabled the tier.
    pub fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= FAILURE_THRESHOLD {
            let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
            return was_enabled;
        }
        false
    }

    pub fn snapshot(&self, current_size: u64) -> TierSnapshot {
        TierSnapshot {
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            evictions_lru: self.evictions_lru.load(Ordering::SeqCst),
            evictions_ttl: self.evictions_ttl.load(Ordering::SeqCst),
            evictions_health: self.evictions_health.load(Ordering::SeqCst),
            evictions_corruption: self.evictions_corruption.load(Ordering::SeqCst),
            current_size,
            degraded: !self.is_enabled(),
        }
    }
}

/// Contract implemented by L1/L2/L3. `put` returns the evicted victim (if
/// any) so the cache manager can demote it to the next lower tier.
pub trait Tier: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_enabled(&self) -> bool;
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    fn put(&self, key: &str, entry: CacheEntry) -> Result<Option<CacheEntry>, CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
    fn size(&self) -> usize;
    fn keys(&self) -> Vec<String>;
    fn snapshot(&self) -> TierSnapshot;
    /// Deletes entries whose `expires_at < now`; returns the count removed.
    fn sweep_expired(&self) -> Result<u64, CacheError>;
    /// Records a corruption eviction (schema mismatch, decryption failure,
    /// checksum mismatch) against this tier's statistics.
    fn note_corruption(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_disables_after_three_consecutive_failures() {
        let stats = TierStats::new();
        assert!(stats.is_enabled());
        assert!(!stats.record_failure());
        assert!(!stats.record_failure());
        assert!(stats.record_failure()); // third failure disables
        assert!(!stats.is_enabled());
    }

    #[test]
    fn tier_reenables_on_success() {
        let stats = TierStats::new();
        stats.record_failure();
        stats.record_failure();
        stats.record_failure();
        assert!(!stats.is_enabled());
        stats.record_success();
        assert!(stats.is_enabled());
    }
}
