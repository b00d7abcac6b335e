//! pulse-loki-produce: Loki push-API ingest gateway for Kafka
//!
//! Sits between log-producing agents (Alloy / Loki exporters) and a
//! Kafka cluster. Accepts HTTP push requests in the Loki push-API
//! shape, treats the payload as opaque bytes, and synchronously
//! forwards each request body as a single Kafka message. Downstream
//! consumers fan the data out to decentralized Loki clusters.
//!
//! ```text
//! agent ──► push handler ──► admission (global / tenant) ──► bounded read ──► kafka
//!                 │
//!                 └── metrics · health evaluator · hot reload
//! ```
//!
//! Deliberately not here: retries, disk buffering, payload parsing.
//! The gateway pushes load back onto producers with 429/503 instead of
//! buffering.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod buildinfo;
pub mod config;
pub mod error;
pub mod health;
pub mod kafka;
pub mod limit;
pub mod metrics;
pub mod server;

pub use config::{Balancer, Config};
pub use error::{GatewayError, Result};
pub use kafka::{KafkaProducer, OutboundMessage, ProduceError, Producer, ProducerSettings};
pub use limit::{Limits, TenantBuckets, TokenBucket};
pub use metrics::Metrics;
pub use server::{Gateway, SharedState};
