//! Periodic health evaluation
//!
//! Every `health_eval_period` the evaluator diffs the counter triple
//! against its previous snapshot and derives a health signal from the
//! window's error rate and the consecutive Kafka error streak. The
//! result lands in the `health_up` gauge, which `/ready` reflects.
//! Health is advisory: the gateway keeps serving while degraded.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::server::SharedState;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Delta-based evaluator state: the previous counter snapshot.
pub struct HealthEvaluator {
    prev: (u64, u64, u64),
}

impl HealthEvaluator {
    pub fn new(metrics: &Metrics) -> HealthEvaluator {
        HealthEvaluator {
            prev: metrics.snapshot(),
        }
    }

    /// Evaluate one window.
    ///
    /// With no traffic in the window the gauge is left untouched and
    /// the SLA ratio is skipped. Returns the decision for
    /// introspection (`None` = no traffic).
    pub fn tick(&mut self, metrics: &Metrics, streak: u64, cfg: &Config) -> Option<bool> {
        let (total, success, errors) = metrics.snapshot();
        let d_total = total.saturating_sub(self.prev.0);
        let d_success = success.saturating_sub(self.prev.1);
        let d_errors = errors.saturating_sub(self.prev.2);
        self.prev = (total, success, errors);

        if d_total == 0 {
            return None;
        }

        if cfg.sla_gauge_enable {
            metrics
                .sla_success_ratio
                .set(d_success as f64 / d_total as f64);
        }

        let error_rate = d_errors as f64 / d_total as f64;
        let unhealthy = error_rate > cfg.health_error_rate_threshold
            || streak >= u64::from(cfg.health_consecutive_error_threshold);
        metrics.health_up.set(if unhealthy { 0.0 } else { 1.0 });
        Some(!unhealthy)
    }
}

/// Background loop driving the evaluator until the task is aborted.
///
/// The period is re-read from the config snapshot each round so a
/// reload takes effect on the next tick.
pub async fn run(state: Arc<SharedState>) {
    let mut evaluator = HealthEvaluator::new(&state.metrics);
    loop {
        let period = state.snapshot().cfg.health_eval_period;
        tokio::time::sleep(period).await;

        let cfg = state.snapshot().cfg;
        let streak = state.consecutive_errors.load(Ordering::Relaxed);
        evaluator.tick(&state.metrics, streak, &cfg);
    }
}
