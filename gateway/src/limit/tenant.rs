//! Per-tenant rate limiting
//!
//! Each tenant gets its own token bucket, allocated lazily on first
//! sight. To keep memory bounded against ephemeral tenant IDs, buckets
//! are evicted LRU-style in batches (10% at a time) once the tracked
//! set exceeds `max_tenants`. Last-access times are nanoseconds since
//! one epoch shared by the whole map, so recency compares correctly
//! across tenants created at different times.

use super::token_bucket::TokenBucket;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Default cap on tracked tenants before LRU eviction kicks in.
pub const DEFAULT_MAX_TENANTS: usize = 10_000;

/// Token bucket with last-access tracking for LRU eviction.
struct TrackedBucket {
    bucket: TokenBucket,
    /// Nanos since the owning map's epoch at the last acquire.
    last_access_nanos: AtomicU64,
}

impl TrackedBucket {
    fn new(rps: f64, burst: u64) -> Self {
        Self {
            bucket: TokenBucket::new(rps, burst),
            last_access_nanos: AtomicU64::new(0),
        }
    }

    fn try_acquire(&self, now_nanos: u64) -> bool {
        self.last_access_nanos.store(now_nanos, Ordering::Relaxed);
        self.bucket.try_acquire()
    }

    fn last_access(&self) -> u64 {
        self.last_access_nanos.load(Ordering::Relaxed)
    }
}

/// Lazy map of tenant → token bucket.
///
/// Every bucket present was created with the currently configured
/// (rps, burst); a reload discards the whole map.
pub struct TenantBuckets {
    rps: f64,
    burst: u64,
    max_tenants: usize,
    /// Shared anchor for all last-access timestamps.
    epoch: Instant,
    buckets: RwLock<HashMap<String, TrackedBucket>>,
}

impl TenantBuckets {
    pub fn new(rps: f64, burst: u64) -> Self {
        Self {
            rps,
            burst,
            max_tenants: DEFAULT_MAX_TENANTS,
            epoch: Instant::now(),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Override the tracked-tenant cap.
    pub fn max_tenants(mut self, max: usize) -> Self {
        self.max_tenants = max;
        self
    }

    /// Try to take one token from the tenant's bucket, creating it on
    /// first sight.
    pub fn try_acquire(&self, tenant: &str) -> bool {
        let now_nanos = self.epoch.elapsed().as_nanos() as u64;

        // Fast path: bucket exists (read lock)
        {
            let buckets = self.buckets.read();
            if let Some(tracked) = buckets.get(tenant) {
                return tracked.try_acquire(now_nanos);
            }
        }

        let mut buckets = self.buckets.write();
        // Double-check after taking the write lock
        if let Some(tracked) = buckets.get(tenant) {
            return tracked.try_acquire(now_nanos);
        }

        if buckets.len() >= self.max_tenants {
            self.evict_lru_batch(&mut buckets);
        }

        let tracked = TrackedBucket::new(self.rps, self.burst);
        let admitted = tracked.try_acquire(now_nanos);
        buckets.insert(tenant.to_string(), tracked);
        admitted
    }

    /// Evict the oldest 10% of buckets (min 1) to amortise the scan.
    fn evict_lru_batch(&self, buckets: &mut HashMap<String, TrackedBucket>) {
        if buckets.is_empty() {
            return;
        }
        let evict_count = (self.max_tenants / 10).max(1);

        let mut by_access: Vec<_> = buckets
            .iter()
            .map(|(tenant, tracked)| (tenant.clone(), tracked.last_access()))
            .collect();
        by_access.sort_by_key(|(_, access)| *access);

        for (tenant, _) in by_access.into_iter().take(evict_count) {
            tracing::debug!(tenant = %tenant, "evicting idle tenant rate-limit bucket");
            buckets.remove(&tenant);
        }
    }

    /// Number of tenants currently tracked.
    pub fn tenant_count(&self) -> usize {
        self.buckets.read().len()
    }
}
