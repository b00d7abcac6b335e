//! Shared test fixtures: a capturing in-memory producer and gateway
//! construction helpers.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use axum::body::Body;
use axum::http::Request;
use pulse_loki_produce::config::Config;
use pulse_loki_produce::kafka::{OutboundMessage, ProduceError, Producer};
use pulse_loki_produce::server::Gateway;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Producer that captures sent messages for later inspection, with a
/// switchable failure mode.
pub struct CaptureProducer {
    sent: Mutex<Vec<OutboundMessage>>,
    attempts: AtomicU64,
    fail_code: Mutex<Option<RDKafkaErrorCode>>,
}

impl CaptureProducer {
    pub fn new() -> Arc<CaptureProducer> {
        Arc::new(CaptureProducer {
            sent: Mutex::new(Vec::new()),
            attempts: AtomicU64::new(0),
            fail_code: Mutex::new(None),
        })
    }

    /// Make every subsequent send fail with the given broker code.
    pub fn fail_with(&self, code: RDKafkaErrorCode) {
        *self.fail_code.lock().unwrap() = Some(code);
    }

    /// Return to successful sends.
    pub fn succeed(&self) {
        *self.fail_code.lock().unwrap() = None;
    }

    /// Messages successfully "delivered".
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Total send attempts, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Producer for CaptureProducer {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), ProduceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *self.fail_code.lock().unwrap() {
            return Err(ProduceError::Kafka(KafkaError::MessageProduction(code)));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Minimal valid config: one broker, topic `t`, probe off, no limits.
pub fn test_config() -> Config {
    Config {
        kafka_brokers: vec!["b:9092".to_string()],
        kafka_topic: "t".to_string(),
        kafka_probe_enabled: false,
        max_body_bytes: 1024,
        quiet: true,
        ..Config::default()
    }
}

pub fn gateway_with(cfg: Config, producer: Arc<CaptureProducer>) -> Gateway {
    Gateway::with_producer(PathBuf::from("/nonexistent/config.yaml"), cfg, producer)
        .expect("gateway construction")
}

/// POST to the canonical push path with an optional tenant header.
pub fn push_request(tenant: Option<&str>, body: impl Into<Vec<u8>>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/loki/api/v1/push");
    if let Some(tenant) = tenant {
        builder = builder.header("X-Scope-OrgID", tenant);
    }
    builder.body(Body::from(body.into())).unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}
