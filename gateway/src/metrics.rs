//! Prometheus metrics for the ingest gateway
//!
//! All collectors live on an owned registry (not the process-global
//! default) so a gateway instance, or a test, carries its own metric
//! state. Names are stable with the `pulse_loki_produce_` prefix.
//!
//! Alongside the Prometheus collectors the registry keeps a small
//! atomic counter triple (total/success/errors) that the health
//! evaluator reads as deltas. The triple is not transactional; slight
//! skew between the three reads is fine because the evaluation window
//! smooths it.

use crate::buildinfo;
use crate::error::{GatewayError, Result};
use prometheus::core::Collector;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Latency bucket set shared by the request and Kafka-write histograms.
pub const LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0,
];

/// All gateway metrics plus the health counter triple.
pub struct Metrics {
    registry: Registry,
    enable_tenant: bool,

    /// Push requests by terminal result (endpoint, result,
    /// content_type_class and optionally tenant)
    pub requests_total: CounterVec,

    /// Request body bytes accepted (endpoint and optionally tenant)
    pub request_bytes_total: CounterVec,

    /// Kafka write failures by classified type
    pub kafka_write_errors_total: CounterVec,

    /// Kafka write latency by result (success/error)
    pub kafka_write_duration_seconds: HistogramVec,

    /// End-to-end push handling latency (endpoint, result)
    pub request_duration_seconds: HistogramVec,

    /// Admission rejections by scope (global/tenant)
    pub rate_limited_total: CounterVec,

    /// 1 = healthy, 0 = degraded
    pub health_up: Gauge,

    /// Mirror of the consecutive Kafka write error streak
    pub kafka_consecutive_errors: Gauge,

    /// Success ratio over the last evaluation window; always
    /// registered, updated only while `sla_gauge_enable` is on
    pub sla_success_ratio: Gauge,

    total: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
}

impl Metrics {
    /// Build and register all collectors.
    ///
    /// `enable_tenant_label` extends the request counters with a
    /// `tenant` label. The label set of a registered collector cannot
    /// change later, which is why flipping this flag requires a
    /// process restart.
    pub fn new(enable_tenant_label: bool) -> Result<Metrics> {
        let registry = Registry::new();

        let mut request_labels = vec!["endpoint", "result", "content_type_class"];
        let mut bytes_labels = vec!["endpoint"];
        if enable_tenant_label {
            request_labels.push("tenant");
            bytes_labels.push("tenant");
        }

        let requests_total = CounterVec::new(
            Opts::new(
                "pulse_loki_produce_requests_total",
                "Total HTTP push requests processed, partitioned by result",
            ),
            &request_labels,
        )
        .map_err(|e| GatewayError::Metrics(format!("requests_total: {e}")))?;

        let request_bytes_total = CounterVec::new(
            Opts::new(
                "pulse_loki_produce_request_bytes_total",
                "Total request body bytes received",
            ),
            &bytes_labels,
        )
        .map_err(|e| GatewayError::Metrics(format!("request_bytes_total: {e}")))?;

        let kafka_write_errors_total = CounterVec::new(
            Opts::new(
                "pulse_loki_produce_kafka_write_errors_total",
                "Kafka write errors by classified type",
            ),
            &["error_type"],
        )
        .map_err(|e| GatewayError::Metrics(format!("kafka_write_errors_total: {e}")))?;

        let kafka_write_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pulse_loki_produce_kafka_write_duration_seconds",
                "Kafka write latency",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["result"],
        )
        .map_err(|e| GatewayError::Metrics(format!("kafka_write_duration_seconds: {e}")))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pulse_loki_produce_request_duration_seconds",
                "End-to-end HTTP request handling duration",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["endpoint", "result"],
        )
        .map_err(|e| GatewayError::Metrics(format!("request_duration_seconds: {e}")))?;

        let rate_limited_total = CounterVec::new(
            Opts::new(
                "pulse_loki_produce_rate_limited_total",
                "Requests rejected due to rate limiting",
            ),
            &["scope"],
        )
        .map_err(|e| GatewayError::Metrics(format!("rate_limited_total: {e}")))?;

        let health_up = Gauge::new("pulse_loki_produce_health_up", "1 if healthy, 0 degraded")
            .map_err(|e| GatewayError::Metrics(format!("health_up: {e}")))?;

        let kafka_consecutive_errors = Gauge::new(
            "pulse_loki_produce_kafka_consecutive_error_count",
            "Number of consecutive Kafka write errors",
        )
        .map_err(|e| GatewayError::Metrics(format!("kafka_consecutive_errors: {e}")))?;

        let sla_success_ratio = Gauge::new(
            "pulse_loki_produce_sla_success_ratio",
            "Success ratio (success/total) in last evaluation window",
        )
        .map_err(|e| GatewayError::Metrics(format!("sla_success_ratio: {e}")))?;

        register(&registry, "requests_total", &requests_total)?;
        register(&registry, "request_bytes_total", &request_bytes_total)?;
        register(&registry, "kafka_write_errors_total", &kafka_write_errors_total)?;
        register(
            &registry,
            "kafka_write_duration_seconds",
            &kafka_write_duration_seconds,
        )?;
        register(&registry, "request_duration_seconds", &request_duration_seconds)?;
        register(&registry, "rate_limited_total", &rate_limited_total)?;
        register(&registry, "health_up", &health_up)?;
        register(&registry, "kafka_consecutive_errors", &kafka_consecutive_errors)?;
        register(&registry, "sla_success_ratio", &sla_success_ratio)?;
        buildinfo::register(&registry)?;

        health_up.set(1.0);
        kafka_consecutive_errors.set(0.0);

        Ok(Metrics {
            registry,
            enable_tenant: enable_tenant_label,
            requests_total,
            request_bytes_total,
            kafka_write_errors_total,
            kafka_write_duration_seconds,
            request_duration_seconds,
            rate_limited_total,
            health_up,
            kafka_consecutive_errors,
            sla_success_ratio,
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// Label values for `requests_total`, honouring the tenant toggle.
    pub fn request_labels<'a>(
        &self,
        endpoint: &'a str,
        result: &'a str,
        content_type_class: &'a str,
        tenant: &'a str,
    ) -> Vec<&'a str> {
        if self.enable_tenant {
            vec![endpoint, result, content_type_class, tenant]
        } else {
            vec![endpoint, result, content_type_class]
        }
    }

    /// Label values for `request_bytes_total`.
    pub fn request_bytes_labels<'a>(&self, endpoint: &'a str, tenant: &'a str) -> Vec<&'a str> {
        if self.enable_tenant {
            vec![endpoint, tenant]
        } else {
            vec![endpoint]
        }
    }

    /// Advance the health counter triple for one terminal outcome.
    pub fn track_result(&self, is_success: bool, is_error: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if is_success {
            self.success.fetch_add(1, Ordering::Relaxed);
        }
        if is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read the counter triple as (total, success, errors).
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.success.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }

    /// Encode all collectors as Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_ok() {
            String::from_utf8(buffer).unwrap_or_default()
        } else {
            String::new()
        }
    }
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    name: &str,
    collector: &C,
) -> Result<()> {
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| GatewayError::Metrics(format!("{name}: {e}")))
}
