//! Kafka error taxonomy
//!
//! Maps raw produce failures into a small, stable label set driving
//! the `kafka_write_errors_total` metric and its alerts:
//! `timeout`, `not_leader`, `unknown_topic`, `too_large`,
//! `conn_refused`, `conn_reset`, `network`, `other`.
//!
//! Broker error codes are matched structurally where rdkafka surfaces
//! them; everything else falls back to case-insensitive substring
//! matching on the error text, in the precedence order below.

use super::ProduceError;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

/// Classify a produce failure into its metric label.
pub fn classify(err: &ProduceError) -> &'static str {
    match err {
        ProduceError::Timeout(_) => "timeout",
        ProduceError::Kafka(err) => classify_kafka(err),
    }
}

fn classify_kafka(err: &KafkaError) -> &'static str {
    if let Some(code) = err.rdkafka_error_code() {
        match code {
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::OperationTimedOut => return "timeout",
            RDKafkaErrorCode::NotLeaderForPartition => return "not_leader",
            RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
                return "unknown_topic"
            }
            RDKafkaErrorCode::MessageSizeTooLarge => return "too_large",
            // Transport-level failures: refine from the message text,
            // defaulting to the network category
            RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::AllBrokersDown => {
                return match classify_message(&err.to_string()) {
                    "other" => "network",
                    label => label,
                }
            }
            _ => {}
        }
    }
    classify_message(&err.to_string())
}

/// Substring classification of an error message. Matching is
/// case-insensitive; earlier rules win.
pub fn classify_message(msg: &str) -> &'static str {
    let msg = msg.to_ascii_lowercase();
    if msg.contains("timeout") || msg.contains("timed out") {
        "timeout"
    } else if msg.contains("not leader") {
        "not_leader"
    } else if msg.contains("unknown topic") {
        "unknown_topic"
    } else if msg.contains("message too large") || msg.contains("message size too large") {
        "too_large"
    } else if msg.contains("connection refused") {
        "conn_refused"
    } else if msg.contains("connection reset") || msg.contains("broken pipe") {
        "conn_reset"
    } else {
        "other"
    }
}
