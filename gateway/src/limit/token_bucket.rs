//! Lock-free token bucket
//!
//! Backs both the global and the per-tenant admission stages. Uses
//! atomics with compare-and-swap loops only, no locks on the hot path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Tokens are scaled by 1000 internally so fractional refill rates
/// work without floating point on the acquire path.
const TOKEN_SCALE: u64 = 1000;

/// Non-blocking token bucket.
///
/// Admits `rps` requests per second with a burst capacity of `burst`.
/// `try_acquire` never waits; an empty bucket is an immediate rejection.
pub struct TokenBucket {
    /// Max tokens (scaled)
    capacity: u64,
    /// Nanoseconds between single-token refills (u64::MAX = never)
    refill_nanos: u64,
    /// Current token count (scaled)
    tokens: AtomicU64,
    /// Last refill timestamp (nanos since `start`)
    last_refill: AtomicU64,
    /// Anchor instant for elapsed time
    start: Instant,
}

impl TokenBucket {
    /// Create a bucket admitting `rps` per second with capacity `burst`.
    ///
    /// `rps` of 0 means no refill; `burst` of 0 admits nothing.
    pub fn new(rps: f64, burst: u64) -> Self {
        let refill_nanos = if rps <= 0.0 {
            u64::MAX
        } else {
            (1_000_000_000f64 / rps) as u64
        };
        let scaled_burst = burst.saturating_mul(TOKEN_SCALE);

        Self {
            capacity: scaled_burst,
            refill_nanos,
            tokens: AtomicU64::new(scaled_burst),
            last_refill: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Try to take one token. Returns false when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current < TOKEN_SCALE {
                return false;
            }
            if self
                .tokens
                .compare_exchange_weak(
                    current,
                    current - TOKEN_SCALE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Add tokens for the time elapsed since the last refill.
    ///
    /// The CAS on `last_refill` ensures a given interval is credited by
    /// exactly one caller.
    fn refill(&self) {
        if self.refill_nanos == u64::MAX {
            return;
        }
        let now_nanos = self.start.elapsed().as_nanos() as u64;

        loop {
            let last = self.last_refill.load(Ordering::Acquire);
            let elapsed = now_nanos.saturating_sub(last);
            let intervals = elapsed / self.refill_nanos;
            if intervals == 0 {
                return;
            }

            let new_last = last + intervals * self.refill_nanos;
            match self.last_refill.compare_exchange_weak(
                last,
                new_last,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let credit = intervals.saturating_mul(TOKEN_SCALE);
                    loop {
                        let current = self.tokens.load(Ordering::Acquire);
                        let next = current.saturating_add(credit).min(self.capacity);
                        if current == next {
                            return;
                        }
                        if self
                            .tokens
                            .compare_exchange_weak(
                                current,
                                next,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            return;
                        }
                    }
                }
                Err(_) => continue,
            }
        }
    }
}
