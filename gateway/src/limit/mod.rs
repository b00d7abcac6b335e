//! Two-tier admission control
//!
//! A global token bucket in front of a lazy per-tenant bucket map.
//! Both stages are non-blocking; a rejection is immediate, no queueing.
//! The whole set is rebuilt from scratch on every reload, which also
//! serves as the coarse eviction policy for the tenant map.

mod tenant;
mod token_bucket;

pub use tenant::{TenantBuckets, DEFAULT_MAX_TENANTS};
pub use token_bucket::TokenBucket;

use crate::config::Config;

/// The admission-control set for one configuration generation.
pub struct Limits {
    /// Global bucket, first stage.
    pub global: Option<TokenBucket>,
    /// Per-tenant buckets, second stage.
    pub tenants: Option<TenantBuckets>,
}

impl Limits {
    /// Build the limiter set for a configuration.
    ///
    /// A scope with rps 0 (or rate limiting disabled entirely) gets no
    /// bucket and admits everything.
    pub fn from_config(cfg: &Config) -> Limits {
        if !cfg.rate_limit_enabled {
            return Limits {
                global: None,
                tenants: None,
            };
        }

        let global = (cfg.rate_limit_global_rps > 0.0).then(|| {
            TokenBucket::new(
                cfg.rate_limit_global_rps,
                derive_burst(cfg.rate_limit_global_rps, cfg.rate_limit_global_burst),
            )
        });
        let tenants = (cfg.rate_limit_per_tenant_rps > 0.0).then(|| {
            TenantBuckets::new(
                cfg.rate_limit_per_tenant_rps,
                derive_burst(cfg.rate_limit_per_tenant_rps, cfg.rate_limit_per_tenant_burst),
            )
        });

        Limits { global, tenants }
    }
}

/// An unset burst falls back to max(1, ⌊rps × 2⌋).
fn derive_burst(rps: f64, burst: u64) -> u64 {
    if burst > 0 {
        burst
    } else {
        ((rps * 2.0) as u64).max(1)
    }
}
