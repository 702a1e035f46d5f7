//! Cache activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters, bumped with relaxed ordering on the hot paths.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub loads: AtomicU64,
    pub coalesced_loads: AtomicU64,
    pub load_failures: AtomicU64,
    pub reloads: AtomicU64,
    pub reload_failures: AtomicU64,
    pub expirations: AtomicU64,
    pub evictions: AtomicU64,
    pub removals: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of cache activity, obtained from
/// [`LoadingCache::stats`](crate::LoadingCache::stats).
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Reads served from a resident entry.
    pub hits: u64,
    /// Reads that had to go through a load.
    pub misses: u64,
    /// Loader invocations started on behalf of this cache, foreground and
    /// background combined.
    pub loads: u64,
    /// Reads that joined a load already in flight instead of starting one.
    pub coalesced_loads: u64,
    /// Foreground loads that failed.
    pub load_failures: u64,
    /// Background reloads started by the timer.
    pub reloads: u64,
    /// Background reloads that failed and were swallowed.
    pub reload_failures: u64,
    /// Entries dropped by the expiry sweep.
    pub expirations: u64,
    /// Entries dropped to get back under the size budget.
    pub evictions: u64,
    /// Entries removed through `erase` or `remove_if`.
    pub removals: u64,
    /// Number of loads in flight at snapshot time.
    pub inflight_loads: usize,
    /// Number of resident entries at snapshot time.
    pub entries: usize,
    /// Sum of resident entry sizes at snapshot time.
    pub current_size: usize,
    /// The configured size budget.
    pub max_size: usize,
}

impl CacheStats {
    /// Fraction of reads served from resident entries, between 0.0 and 1.0.
    ///
    /// Returns 0.0 if no reads have happened yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the size budget currently in use, between 0.0 and 1.0.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.current_size as f64 / self.max_size as f64
        }
    }
}

impl Counters {
    pub fn snapshot(
        &self,
        inflight_loads: usize,
        entries: usize,
        current_size: usize,
        max_size: usize,
    ) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            coalesced_loads: self.coalesced_loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            inflight_loads,
            entries,
            current_size,
            max_size,
        }
    }
}
