//! Kafka producer
//!
//! A thin synchronous producer over a single topic. The [`Producer`]
//! trait is the seam between the push handler and the transport so the
//! handler logic stays testable without a broker; [`KafkaProducer`] is
//! the rdkafka-backed implementation used in production.
//!
//! One call writes exactly one message and returns only after the
//! broker acknowledgement dictated by `kafka_required_acks`, a
//! transport error, or the write deadline. There are no retries at
//! this layer; failures surface to the caller verbatim and
//! the handler classifies them.

pub mod classify;

use crate::config::{Balancer, Config};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

/// One outbound Kafka message: the opaque request body plus routing
/// metadata. The key is set by the caller (tenant, under the hash
/// balancer); the producer never invents one.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub headers: Vec<(String, Bytes)>,
}

/// A failed produce attempt.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// The write deadline elapsed before the broker acknowledged.
    #[error("kafka write timed out after {0:?}")]
    Timeout(Duration),

    /// Transport or broker error, returned verbatim.
    #[error(transparent)]
    Kafka(#[from] KafkaError),
}

/// The produce seam between the push handler and the Kafka transport.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Write one message and wait for the configured acknowledgement
    /// or the deadline.
    async fn send(&self, msg: OutboundMessage) -> std::result::Result<(), ProduceError>;

    /// Best-effort startup connectivity check. `write` additionally
    /// publishes a tiny marked test message.
    async fn probe(&self, write: bool) -> Result<()> {
        let _ = write;
        Ok(())
    }
}

/// Producer construction parameters, extracted from the immutable
/// configuration subset.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    /// 0 = none, 1 = leader, anything else = full ISR
    pub required_acks: i32,
    pub balancer: Balancer,
    pub write_timeout: Duration,
    pub probe_timeout: Duration,

    pub sasl_enabled: bool,
    pub sasl_mechanism: String,
    pub sasl_username: String,
    pub sasl_password: String,
    pub tls_enabled: bool,
    pub tls_insecure_skip_verify: bool,
    pub tls_ca_file: String,
}

impl ProducerSettings {
    pub fn from_config(cfg: &Config) -> ProducerSettings {
        ProducerSettings {
            brokers: cfg.kafka_brokers.clone(),
            topic: cfg.kafka_topic.clone(),
            required_acks: cfg.kafka_required_acks,
            balancer: cfg.balancer(),
            write_timeout: cfg.kafka_write_timeout,
            probe_timeout: cfg.kafka_probe_timeout,
            sasl_enabled: cfg.kafka_sasl_enabled,
            sasl_mechanism: cfg.kafka_sasl_mechanism.clone(),
            sasl_username: cfg.kafka_sasl_username.clone(),
            sasl_password: cfg.kafka_sasl_password.clone(),
            tls_enabled: cfg.kafka_tls_enabled,
            tls_insecure_skip_verify: cfg.kafka_tls_insecure_skip_verify,
            tls_ca_file: cfg.kafka_tls_ca_file.clone(),
        }
    }
}

/// rdkafka-backed single-topic producer.
///
/// Owns its connection pool; replaced wholesale when the immutable
/// configuration changes. In-flight sends hold their own reference, so
/// dropping the gateway's handle never cancels them.
pub struct KafkaProducer {
    inner: FutureProducer,
    settings: ProducerSettings,
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("settings", &self.settings)
            .finish()
    }
}

impl KafkaProducer {
    pub fn new(settings: ProducerSettings) -> Result<KafkaProducer> {
        if settings.brokers.is_empty() {
            return Err(GatewayError::Kafka("no kafka brokers".into()));
        }

        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", settings.brokers.join(","))
            .set("client.id", "pulse-loki-produce")
            .set(
                "acks",
                match settings.required_acks {
                    0 => "0",
                    1 => "1",
                    _ => "all",
                },
            )
            .set(
                "message.timeout.ms",
                settings.write_timeout.as_millis().to_string(),
            )
            .set(
                "socket.connection.setup.timeout.ms",
                settings.write_timeout.as_millis().to_string(),
            );

        match settings.balancer {
            // librdkafka's default assignment for keyless messages is
            // already sticky-per-batch
            Balancer::Sticky => {}
            Balancer::RoundRobin => {
                client.set("partitioner", "random");
            }
            // Java-compatible hash of the message key (the tenant)
            Balancer::Hash => {
                client.set("partitioner", "murmur2_random");
            }
        }

        let protocol = match (settings.sasl_enabled, settings.tls_enabled) {
            (true, true) => "sasl_ssl",
            (true, false) => "sasl_plaintext",
            (false, true) => "ssl",
            (false, false) => "plaintext",
        };
        client.set("security.protocol", protocol);

        if settings.tls_enabled {
            if !settings.tls_ca_file.trim().is_empty() {
                client.set("ssl.ca.location", settings.tls_ca_file.trim());
            }
            if settings.tls_insecure_skip_verify {
                client.set("enable.ssl.certificate.verification", "false");
            }
        }

        if settings.sasl_enabled {
            let mechanism = match settings.sasl_mechanism.trim().to_ascii_lowercase().as_str() {
                "scram-sha-512" => "SCRAM-SHA-512",
                "scram-sha-256" => "SCRAM-SHA-256",
                other => {
                    return Err(GatewayError::Kafka(format!(
                        "unsupported SASL mechanism: {other}"
                    )))
                }
            };
            let username = settings.sasl_username.trim();
            let password = if settings.sasl_password.is_empty() {
                std::env::var("KAFKA_SASL_PASSWORD").unwrap_or_default()
            } else {
                settings.sasl_password.clone()
            };
            if username.is_empty() || password.is_empty() {
                return Err(GatewayError::Kafka(
                    "SASL enabled but username/password not provided".into(),
                ));
            }
            client
                .set("sasl.mechanisms", mechanism)
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        if kafka_debug_enabled() {
            client.set("debug", "broker,topic,msg");
            info!(
                topic = %settings.topic,
                brokers = %settings.brokers.join(","),
                acks = settings.required_acks,
                balancer = settings.balancer.as_str(),
                tls = settings.tls_enabled,
                sasl = settings.sasl_enabled,
                "kafka debug enabled"
            );
        }

        let inner: FutureProducer = client
            .create()
            .map_err(|e| GatewayError::Kafka(e.to_string()))?;

        Ok(KafkaProducer { inner, settings })
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn send(&self, msg: OutboundMessage) -> std::result::Result<(), ProduceError> {
        let mut headers = OwnedHeaders::new_with_capacity(msg.headers.len());
        for (key, value) in &msg.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_ref()),
            });
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut record = FutureRecord::<[u8], [u8]>::to(&self.settings.topic)
            .payload(msg.payload.as_ref())
            .timestamp(timestamp)
            .headers(headers);
        if let Some(key) = &msg.key {
            record = record.key(key.as_ref());
        }

        let deadline = self.settings.write_timeout;
        match tokio::time::timeout(deadline, self.inner.send(record, Timeout::After(deadline)))
            .await
        {
            Err(_) => Err(ProduceError::Timeout(deadline)),
            Ok(Ok(_delivery)) => Ok(()),
            Ok(Err((err, _message))) => Err(ProduceError::Kafka(err)),
        }
    }

    async fn probe(&self, write: bool) -> Result<()> {
        // Network reachability first: plain TCP dial to the first broker.
        let addr = &self.settings.brokers[0];
        let dial = tokio::net::TcpStream::connect(addr.as_str());
        match tokio::time::timeout(self.settings.probe_timeout, dial).await {
            Err(_) => {
                return Err(GatewayError::Probe(format!(
                    "dial {addr}: timed out after {:?}",
                    self.settings.probe_timeout
                )))
            }
            Ok(Err(e)) => return Err(GatewayError::Probe(format!("dial {addr}: {e}"))),
            Ok(Ok(conn)) => drop(conn),
        }
        info!(broker = %addr, "kafka probe dial ok");

        if !write {
            return Ok(());
        }

        // Optional end-to-end produce check (auth/ACL/topic).
        let msg = OutboundMessage {
            key: (self.settings.balancer == Balancer::Hash)
                .then(|| Bytes::from_static(b"_probe")),
            payload: Bytes::from_static(b"probe"),
            headers: vec![
                ("X-Producer-Probe".to_string(), Bytes::from_static(b"true")),
                ("X-Scope-OrgID".to_string(), Bytes::from_static(b"_probe")),
            ],
        };
        self.send(msg)
            .await
            .map_err(|e| GatewayError::Probe(e.to_string()))?;
        info!(topic = %self.settings.topic, "kafka probe write ok");
        Ok(())
    }
}

fn kafka_debug_enabled() -> bool {
    match std::env::var("KAFKA_DEBUG") {
        Ok(v) => {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        }
        Err(_) => false,
    }
}
