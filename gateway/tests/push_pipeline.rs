//! Push-path integration tests
//!
//! Drives the real router with a capturing producer and checks the
//! terminal outcomes, metric accounting and the Kafka message shape.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_string, gateway_with, push_request, test_config, CaptureProducer};
use rdkafka::types::RDKafkaErrorCode;
use tower::ServiceExt;

const PUSH: &str = "/loki/api/v1/push";

#[tokio::test]
async fn accepted_body_lands_in_kafka_without_key() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());
    let router = gateway.router();

    let body = r#"{"streams":[]}"#;
    let response = router
        .clone()
        .oneshot(push_request(Some("acme"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let sent = producer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.len(), 14);
    assert_eq!(&sent[0].payload[..], body.as_bytes());
    // sticky balancer: no partitioning key
    assert!(sent[0].key.is_none());

    let tenant_header = sent[0]
        .headers
        .iter()
        .find(|(k, _)| k == "X-Scope-OrgID")
        .expect("tenant header");
    assert_eq!(&tenant_header.1[..], b"acme");

    let (total, success, errors) = gateway.metrics().snapshot();
    assert_eq!((total, success, errors), (1, 1, 0));
}

#[tokio::test]
async fn hash_balancer_keys_by_tenant() {
    let mut cfg = test_config();
    cfg.kafka_balancer = "hash".to_string();
    let producer = CaptureProducer::new();
    let gateway = gateway_with(cfg, producer.clone());

    let response = gateway
        .router()
        .oneshot(push_request(Some("acme"), "payload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let sent = producer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key.as_deref(), Some(&b"acme"[..]));
}

#[tokio::test]
async fn content_headers_forwarded_verbatim() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());

    let request = Request::builder()
        .method("POST")
        .uri(PUSH)
        .header("X-Scope-OrgID", "acme")
        .header("Content-Type", "application/x-protobuf")
        .header("Content-Encoding", "snappy")
        .body(Body::from("x"))
        .unwrap();
    let response = gateway.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let sent = producer.sent();
    let find = |name: &str| {
        sent[0]
            .headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(find("Content-Type").as_deref(), Some(&b"application/x-protobuf"[..]));
    assert_eq!(find("Content-Encoding").as_deref(), Some(&b"snappy"[..]));
}

#[tokio::test]
async fn oversized_body_rejected_before_produce() {
    let mut cfg = test_config();
    cfg.max_body_bytes = 4;
    let producer = CaptureProducer::new();
    let gateway = gateway_with(cfg, producer.clone());

    let response = gateway
        .router()
        .oneshot(push_request(Some("acme"), vec![b'x'; 100]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "too_large");

    // no produce attempt at all
    assert_eq!(producer.attempts(), 0);

    let metrics = gateway.metrics();
    let (total, success, errors) = metrics.snapshot();
    assert_eq!((total, success, errors), (1, 0, 1));
    assert_eq!(
        metrics
            .requests_total
            .with_label_values(&[PUSH, "too_large", "proto"])
            .get(),
        1.0
    );
}

#[tokio::test]
async fn missing_tenant_rejected() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());

    let response = gateway
        .router()
        .oneshot(push_request(None, "body"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "Missing X-Scope-OrgID");

    assert_eq!(producer.attempts(), 0);
    let (total, success, errors) = gateway.metrics().snapshot();
    assert_eq!((total, success, errors), (1, 0, 1));
}

#[tokio::test]
async fn empty_tenant_substituted_when_allowed() {
    let mut cfg = test_config();
    cfg.allow_empty_tenant = true;
    cfg.default_tenant = "fallback".to_string();
    let producer = CaptureProducer::new();
    let gateway = gateway_with(cfg, producer.clone());

    let response = gateway
        .router()
        .oneshot(push_request(None, "body"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let sent = producer.sent();
    let tenant = sent[0]
        .headers
        .iter()
        .find(|(k, _)| k == "X-Scope-OrgID")
        .unwrap();
    assert_eq!(&tenant.1[..], b"fallback");
}

#[tokio::test]
async fn global_rate_limit_rejects_burst_overflow() {
    let mut cfg = test_config();
    cfg.rate_limit_enabled = true;
    cfg.rate_limit_global_rps = 1.0;
    cfg.rate_limit_global_burst = 1;
    let producer = CaptureProducer::new();
    let gateway = gateway_with(cfg, producer.clone());
    let router = gateway.router();

    let first = router
        .clone()
        .oneshot(push_request(Some("acme"), "a"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = router
        .clone()
        .oneshot(push_request(Some("acme"), "b"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(body_string(second).await.starts_with("rate limited (global)"));

    assert_eq!(producer.attempts(), 1);
    let metrics = gateway.metrics();
    assert_eq!(
        metrics.rate_limited_total.with_label_values(&["global"]).get(),
        1.0
    );
}

#[tokio::test]
async fn tenant_rate_limit_is_per_tenant() {
    let mut cfg = test_config();
    cfg.rate_limit_enabled = true;
    cfg.rate_limit_per_tenant_rps = 1.0;
    cfg.rate_limit_per_tenant_burst = 1;
    let producer = CaptureProducer::new();
    let gateway = gateway_with(cfg, producer.clone());
    let router = gateway.router();

    let ok = router
        .clone()
        .oneshot(push_request(Some("acme"), "a"))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::NO_CONTENT);

    let limited = router
        .clone()
        .oneshot(push_request(Some("acme"), "b"))
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(body_string(limited).await.starts_with("rate limited (tenant)"));

    // an unrelated tenant is unaffected
    let other = router
        .clone()
        .oneshot(push_request(Some("globex"), "c"))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::NO_CONTENT);

    let metrics = gateway.metrics();
    assert_eq!(
        metrics.rate_limited_total.with_label_values(&["tenant"]).get(),
        1.0
    );
}

#[tokio::test]
async fn kafka_failure_classified_and_streak_tracked() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());
    let router = gateway.router();
    let metrics = gateway.metrics();

    producer.fail_with(RDKafkaErrorCode::UnknownTopicOrPartition);

    let response = router
        .clone()
        .oneshot(push_request(Some("acme"), "x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "kafka write failed");
    assert_eq!(
        metrics
            .kafka_write_errors_total
            .with_label_values(&["unknown_topic"])
            .get(),
        1.0
    );
    assert_eq!(metrics.kafka_consecutive_errors.get(), 1.0);

    // a second consecutive failure grows the streak
    let _ = router
        .clone()
        .oneshot(push_request(Some("acme"), "y"))
        .await
        .unwrap();
    assert_eq!(metrics.kafka_consecutive_errors.get(), 2.0);

    // one success resets it
    producer.succeed();
    let ok = router
        .clone()
        .oneshot(push_request(Some("acme"), "z"))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::NO_CONTENT);
    assert_eq!(metrics.kafka_consecutive_errors.get(), 0.0);

    let (total, success, errors) = metrics.snapshot();
    assert_eq!((total, success, errors), (3, 1, 2));
}

#[tokio::test]
async fn non_post_method_rejected() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());

    let request = Request::builder()
        .method("GET")
        .uri(PUSH)
        .body(Body::empty())
        .unwrap();
    let response = gateway.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(producer.attempts(), 0);
    // counted, but neither success nor error
    let (total, success, errors) = gateway.metrics().snapshot();
    assert_eq!((total, success, errors), (1, 0, 0));
}

#[tokio::test]
async fn exactly_one_count_and_observation_per_request() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());
    let metrics = gateway.metrics();

    let _ = gateway
        .router()
        .oneshot(push_request(Some("acme"), "x"))
        .await
        .unwrap();

    assert_eq!(
        metrics
            .requests_total
            .with_label_values(&[PUSH, "success", "proto"])
            .get(),
        1.0
    );
    assert_eq!(
        metrics
            .request_duration_seconds
            .with_label_values(&[PUSH, "success"])
            .get_sample_count(),
        1
    );
    assert_eq!(
        metrics
            .request_bytes_total
            .with_label_values(&[PUSH])
            .get(),
        1.0
    );
}

#[tokio::test]
async fn body_bytes_forwarded_unmodified() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());

    let payload: Vec<u8> = (0u16..256).map(|b| b as u8).collect();
    let response = gateway
        .router()
        .oneshot(push_request(Some("acme"), payload.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let sent = producer.sent();
    assert_eq!(&sent[0].payload[..], &payload[..]);
}

#[tokio::test]
async fn prom_push_path_served_by_same_pipeline() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/api/prom/push")
        .header("X-Scope-OrgID", "acme")
        .body(Body::from("x"))
        .unwrap();
    let response = gateway.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(producer.sent_count(), 1);

    assert_eq!(
        gateway
            .metrics()
            .requests_total
            .with_label_values(&["/api/prom/push", "success", "proto"])
            .get(),
        1.0
    );
}

#[tokio::test]
async fn metrics_endpoint_exposes_counters() {
    let producer = CaptureProducer::new();
    let gateway = gateway_with(test_config(), producer.clone());
    let router = gateway.router();

    let _ = router
        .clone()
        .oneshot(push_request(Some("acme"), "x"))
        .await
        .unwrap();

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_string(response).await;
    assert!(text.contains("pulse_loki_produce_requests_total"));
    assert!(text.contains("pulse_loki_produce_build_info"));
}

#[tokio::test]
async fn tenant_label_applied_when_enabled() {
    let mut cfg = test_config();
    cfg.metrics_enable_tenant_label = true;
    let producer = CaptureProducer::new();
    let gateway = gateway_with(cfg, producer.clone());

    let _ = gateway
        .router()
        .oneshot(push_request(Some("acme"), "x"))
        .await
        .unwrap();

    assert_eq!(
        gateway
            .metrics()
            .requests_total
            .with_label_values(&[PUSH, "success", "proto", "acme"])
            .get(),
        1.0
    );
}
