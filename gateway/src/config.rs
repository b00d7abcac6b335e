//! Gateway configuration
//!
//! The configuration is a single YAML document, read at startup and on
//! reload. Fields split into two groups:
//!
//! - **Immutable**: Kafka connection settings (brokers, topic, acks,
//!   balancer, timeouts, SASL/TLS) and the metrics tenant-label flag.
//!   Changing any of these on reload forces a producer rebuild; the
//!   tenant-label flag and the listen port additionally require a
//!   process restart.
//! - **Mutable**: admission limits, health thresholds, rate limits and
//!   log verbosity. These are swapped in place on reload.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Partition balancing strategy for the Kafka producer.
///
/// `Sticky` batches onto the least-loaded partition, `RoundRobin`
/// cycles, `Hash` derives the partition from the message key (the
/// tenant), which is the only mode giving per-tenant ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balancer {
    Sticky,
    RoundRobin,
    Hash,
}

impl Balancer {
    /// Canonical balancer names accepted after alias normalisation.
    pub const SUPPORTED: [&'static str; 3] = ["sticky", "round_robin", "hash"];

    pub fn from_name(name: &str) -> Option<Balancer> {
        match name {
            "sticky" => Some(Balancer::Sticky),
            "round_robin" => Some(Balancer::RoundRobin),
            "hash" => Some(Balancer::Hash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Balancer::Sticky => "sticky",
            Balancer::RoundRobin => "round_robin",
            Balancer::Hash => "hash",
        }
    }
}

/// Maps legacy or alternative balancer names to canonical values.
///
/// `least_bytes` and friends are historical names for the
/// least-loaded strategy and map to `sticky`.
fn normalize_balancer(v: &str) -> String {
    match v.trim().to_ascii_lowercase().as_str() {
        "" | "sticky" => "sticky".to_string(),
        "round_robin" | "roundrobin" | "round-robin" => "round_robin".to_string(),
        "hash" => "hash".to_string(),
        "least" | "least_bytes" | "least-bytes" => "sticky".to_string(),
        other => other.to_string(),
    }
}

/// Full gateway configuration record.
///
/// Unknown fields are ignored; missing fields take the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Immutable (changing requires a Kafka producer rebuild)
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: String,
    /// 0 = fire-and-forget, 1 = leader ack, -1 = full ISR ack
    pub kafka_required_acks: i32,
    /// sticky | round_robin | hash (plus legacy aliases)
    pub kafka_balancer: String,
    #[serde(with = "humantime_serde")]
    pub kafka_write_timeout: Duration,

    // Security
    pub kafka_sasl_enabled: bool,
    /// scram-sha-512 | scram-sha-256
    pub kafka_sasl_mechanism: String,
    pub kafka_sasl_username: String,
    /// May be empty; `KAFKA_SASL_PASSWORD` is consulted as a fallback.
    pub kafka_sasl_password: String,
    pub kafka_tls_enabled: bool,
    pub kafka_tls_insecure_skip_verify: bool,
    pub kafka_tls_ca_file: String,

    // Startup probe
    pub kafka_probe_enabled: bool,
    pub kafka_probe_required: bool,
    #[serde(with = "humantime_serde")]
    pub kafka_probe_timeout: Duration,
    /// If true, publish a tiny marked test message at startup.
    pub kafka_probe_write: bool,

    // Mutable
    pub max_body_bytes: u64,
    pub allow_empty_tenant: bool,
    pub default_tenant: String,
    pub metrics_enable_tenant_label: bool,

    pub health_error_rate_threshold: f64,
    pub health_consecutive_error_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub health_eval_period: Duration,
    pub sla_gauge_enable: bool,

    pub rate_limit_enabled: bool,
    pub rate_limit_global_rps: f64,
    pub rate_limit_global_burst: u64,
    pub rate_limit_per_tenant_rps: f64,
    pub rate_limit_per_tenant_burst: u64,

    /// info | debug
    pub log_level: String,
    /// Suppresses the per-request "accepted" log line.
    pub quiet: bool,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            kafka_brokers: Vec::new(),
            kafka_topic: String::new(),
            kafka_required_acks: 1,
            kafka_balancer: "sticky".to_string(),
            kafka_write_timeout: Duration::from_secs(10),
            kafka_sasl_enabled: false,
            kafka_sasl_mechanism: "scram-sha-512".to_string(),
            kafka_sasl_username: String::new(),
            kafka_sasl_password: String::new(),
            kafka_tls_enabled: false,
            kafka_tls_insecure_skip_verify: false,
            kafka_tls_ca_file: String::new(),
            kafka_probe_enabled: true,
            kafka_probe_required: true,
            kafka_probe_timeout: Duration::from_secs(5),
            kafka_probe_write: false,
            max_body_bytes: 5 << 20,
            allow_empty_tenant: false,
            default_tenant: "anonymous".to_string(),
            metrics_enable_tenant_label: false,
            health_error_rate_threshold: 0.05,
            health_consecutive_error_threshold: 5,
            health_eval_period: Duration::from_secs(30),
            sla_gauge_enable: true,
            rate_limit_enabled: false,
            rate_limit_global_rps: 0.0,
            rate_limit_global_burst: 0,
            rate_limit_per_tenant_rps: 0.0,
            rate_limit_per_tenant_burst: 0,
            log_level: "info".to_string(),
            quiet: false,
            port: 3101,
        }
    }
}

impl Config {
    /// Parse a YAML document, normalise balancer aliases and validate.
    pub fn parse(data: &[u8]) -> Result<Config> {
        let mut cfg: Config = serde_yaml::from_slice(data)
            .map_err(|e| GatewayError::Config(format!("yaml decode: {e}")))?;
        cfg.kafka_balancer = normalize_balancer(&cfg.kafka_balancer);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse the config file.
    ///
    /// Returns the raw bytes alongside the parsed record so the caller
    /// can log a content hash.
    pub fn load_from_file(path: &Path) -> Result<(Config, Vec<u8>)> {
        let raw = std::fs::read(path)
            .map_err(|e| GatewayError::Config(format!("read {}: {e}", path.display())))?;
        let cfg = Config::parse(&raw)?;
        Ok((cfg, raw))
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka_brokers.is_empty() {
            return Err(GatewayError::Config("kafka_brokers required".into()));
        }
        if self.kafka_topic.is_empty() {
            return Err(GatewayError::Config("kafka_topic required".into()));
        }
        if Balancer::from_name(&self.kafka_balancer).is_none() {
            return Err(GatewayError::Config(format!(
                "unsupported kafka_balancer: {}",
                self.kafka_balancer
            )));
        }
        if self.kafka_write_timeout.is_zero() {
            return Err(GatewayError::Config("kafka_write_timeout must be > 0".into()));
        }
        if self.kafka_sasl_enabled {
            match self.kafka_sasl_mechanism.trim().to_ascii_lowercase().as_str() {
                "scram-sha-512" | "scram-sha-256" => {}
                other => {
                    return Err(GatewayError::Config(format!(
                        "unsupported kafka_sasl_mechanism: {other}"
                    )))
                }
            }
            if self.kafka_sasl_username.trim().is_empty() {
                return Err(GatewayError::Config(
                    "kafka_sasl_username required when SASL enabled".into(),
                ));
            }
        }
        if self.kafka_probe_timeout.is_zero() {
            return Err(GatewayError::Config("kafka_probe_timeout must be > 0".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(GatewayError::Config("max_body_bytes must be > 0".into()));
        }
        if self.health_eval_period.is_zero() {
            return Err(GatewayError::Config("health_eval_period must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.health_error_rate_threshold) {
            return Err(GatewayError::Config(
                "health_error_rate_threshold must be between 0 and 1".into(),
            ));
        }
        if self.rate_limit_global_rps < 0.0 || self.rate_limit_per_tenant_rps < 0.0 {
            return Err(GatewayError::Config("rate limit RPS must be >= 0".into()));
        }
        match self.log_level.as_str() {
            "info" | "debug" => {}
            other => return Err(GatewayError::Config(format!("invalid log_level: {other}"))),
        }
        Ok(())
    }

    /// The canonical balancer enum. Only valid after `validate()`.
    pub fn balancer(&self) -> Balancer {
        Balancer::from_name(&self.kafka_balancer).unwrap_or(Balancer::Sticky)
    }

    /// Extract the immutable field subset for rebuild comparison.
    pub fn immutable_subset(&self) -> ImmutableSubset {
        ImmutableSubset {
            kafka_brokers: self.kafka_brokers.clone(),
            kafka_topic: self.kafka_topic.clone(),
            kafka_required_acks: self.kafka_required_acks,
            kafka_balancer: self.kafka_balancer.clone(),
            kafka_write_timeout: self.kafka_write_timeout,
            kafka_sasl_enabled: self.kafka_sasl_enabled,
            kafka_sasl_mechanism: self.kafka_sasl_mechanism.clone(),
            kafka_sasl_username: self.kafka_sasl_username.clone(),
            kafka_tls_enabled: self.kafka_tls_enabled,
            kafka_tls_insecure_skip_verify: self.kafka_tls_insecure_skip_verify,
            kafka_tls_ca_file: self.kafka_tls_ca_file.clone(),
            metrics_enable_tenant_label: self.metrics_enable_tenant_label,
        }
    }

    /// Redaction-safe view for logging and the `/configz` endpoint.
    ///
    /// The SASL password is omitted entirely; durations render as
    /// humantime strings.
    pub fn runtime_view(&self) -> RuntimeView {
        RuntimeView {
            kafka_brokers: self.kafka_brokers.clone(),
            kafka_topic: self.kafka_topic.clone(),
            kafka_required_acks: self.kafka_required_acks,
            kafka_balancer: self.kafka_balancer.clone(),
            kafka_write_timeout: humantime::format_duration(self.kafka_write_timeout).to_string(),
            kafka_sasl_enabled: self.kafka_sasl_enabled,
            kafka_sasl_mechanism: self.kafka_sasl_mechanism.clone(),
            kafka_sasl_username: self.kafka_sasl_username.clone(),
            kafka_tls_enabled: self.kafka_tls_enabled,
            kafka_tls_insecure_skip_verify: self.kafka_tls_insecure_skip_verify,
            kafka_tls_ca_file: self.kafka_tls_ca_file.clone(),
            max_body_bytes: self.max_body_bytes,
            allow_empty_tenant: self.allow_empty_tenant,
            default_tenant: self.default_tenant.clone(),
            metrics_enable_tenant_label: self.metrics_enable_tenant_label,
            health_error_rate_threshold: self.health_error_rate_threshold,
            health_consecutive_error_threshold: self.health_consecutive_error_threshold,
            health_eval_period: humantime::format_duration(self.health_eval_period).to_string(),
            sla_gauge_enable: self.sla_gauge_enable,
            rate_limit_enabled: self.rate_limit_enabled,
            rate_limit_global_rps: self.rate_limit_global_rps,
            rate_limit_global_burst: self.rate_limit_global_burst,
            rate_limit_per_tenant_rps: self.rate_limit_per_tenant_rps,
            rate_limit_per_tenant_burst: self.rate_limit_per_tenant_burst,
            log_level: self.log_level.clone(),
            quiet: self.quiet,
            port: self.port,
        }
    }
}

/// The immutable configuration subset.
///
/// Structural equality over this record decides whether a reload must
/// rebuild the Kafka producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableSubset {
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: String,
    pub kafka_required_acks: i32,
    pub kafka_balancer: String,
    pub kafka_write_timeout: Duration,
    pub kafka_sasl_enabled: bool,
    pub kafka_sasl_mechanism: String,
    pub kafka_sasl_username: String,
    pub kafka_tls_enabled: bool,
    pub kafka_tls_insecure_skip_verify: bool,
    pub kafka_tls_ca_file: String,
    pub metrics_enable_tenant_label: bool,
}

/// Safe serialisable view of the running configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeView {
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: String,
    pub kafka_required_acks: i32,
    pub kafka_balancer: String,
    pub kafka_write_timeout: String,
    pub kafka_sasl_enabled: bool,
    pub kafka_sasl_mechanism: String,
    pub kafka_sasl_username: String,
    pub kafka_tls_enabled: bool,
    pub kafka_tls_insecure_skip_verify: bool,
    pub kafka_tls_ca_file: String,

    pub max_body_bytes: u64,
    pub allow_empty_tenant: bool,
    pub default_tenant: String,
    pub metrics_enable_tenant_label: bool,

    pub health_error_rate_threshold: f64,
    pub health_consecutive_error_threshold: u32,
    pub health_eval_period: String,
    pub sla_gauge_enable: bool,

    pub rate_limit_enabled: bool,
    pub rate_limit_global_rps: f64,
    pub rate_limit_global_burst: u64,
    pub rate_limit_per_tenant_rps: f64,
    pub rate_limit_per_tenant_burst: u64,

    pub log_level: String,
    pub quiet: bool,
    pub port: u16,
}
