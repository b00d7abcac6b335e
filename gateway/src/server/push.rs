//! The push request state machine
//!
//! Steps, in order, first terminal wins: method check, tenant
//! extraction, global admission, per-tenant admission, bounded body
//! read, content-type classification, Kafka produce. Every terminal
//! path updates `requests_total`, the duration histogram and the
//! health counter triple exactly once.
//!
//! The body is opaque and is never parsed, transformed or labelled here.

use super::SharedState;
use crate::config::Balancer;
use crate::kafka::{classify, OutboundMessage};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Tenant isolation header, also forwarded to Kafka.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Per-request accounting. `finish` is the single funnel for terminal
/// outcomes, so each request increments `requests_total` and observes
/// the duration histogram exactly once.
struct RequestScope<'a> {
    state: &'a SharedState,
    endpoint: String,
    start: Instant,
}

impl RequestScope<'_> {
    fn finish(
        &self,
        result: &'static str,
        content_type_class: &'static str,
        tenant: &str,
        status: StatusCode,
        message: &'static str,
    ) -> Response {
        let metrics = &self.state.metrics;
        metrics
            .requests_total
            .with_label_values(&metrics.request_labels(
                &self.endpoint,
                result,
                content_type_class,
                tenant,
            ))
            .inc();

        let is_success = result == "success";
        let is_error = matches!(
            result,
            "missing_tenant" | "rate_limited" | "bad_request" | "too_large" | "kafka_error"
        );
        metrics.track_result(is_success, is_error);

        metrics
            .request_duration_seconds
            .with_label_values(&[&self.endpoint, result])
            .observe(self.start.elapsed().as_secs_f64());

        (status, message).into_response()
    }
}

/// Derive the coarse content-type class used as a metric label.
pub fn classify_content_type(content_type: &str) -> &'static str {
    let ct = content_type.trim();
    if ct.is_empty()
        || ct.starts_with("application/x-protobuf")
        || ct.starts_with("application/octet-stream")
    {
        "proto"
    } else if ct.starts_with("application/json") {
        "json"
    } else {
        "other"
    }
}

fn header_str(req: &Request, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

pub(crate) async fn handle_push(
    State(state): State<Arc<SharedState>>,
    req: Request,
) -> Response {
    let scope = RequestScope {
        state: &state,
        endpoint: req.uri().path().to_string(),
        start: Instant::now(),
    };
    let snap = state.snapshot();
    let cfg = Arc::clone(&snap.cfg);

    // S1: method
    if req.method() != Method::POST {
        return scope.finish(
            "client_error",
            "other",
            "",
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        );
    }

    // S2: tenant
    let tenant = header_str(&req, TENANT_HEADER);
    let tenant = if tenant.is_empty() {
        if cfg.allow_empty_tenant {
            cfg.default_tenant.clone()
        } else {
            warn!(endpoint = %scope.endpoint, "missing tenant");
            return scope.finish(
                "missing_tenant",
                "other",
                "",
                StatusCode::BAD_REQUEST,
                "Missing X-Scope-OrgID",
            );
        }
    } else {
        tenant
    };

    // S3/S4: admission, global then per-tenant
    if cfg.rate_limit_enabled {
        if let Some(global) = &snap.limits.global {
            if !global.try_acquire() {
                state
                    .metrics
                    .rate_limited_total
                    .with_label_values(&["global"])
                    .inc();
                warn!(tenant = %tenant, "rate limited (global)");
                return scope.finish(
                    "rate_limited",
                    "other",
                    &tenant,
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate limited (global)",
                );
            }
        }
        if let Some(tenants) = &snap.limits.tenants {
            if !tenants.try_acquire(&tenant) {
                state
                    .metrics
                    .rate_limited_total
                    .with_label_values(&["tenant"])
                    .inc();
                warn!(tenant = %tenant, "rate limited (tenant)");
                return scope.finish(
                    "rate_limited",
                    "other",
                    &tenant,
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate limited (tenant)",
                );
            }
        }
    }

    // S6 runs before the read so failure paths carry the class too
    let content_type = header_str(&req, header::CONTENT_TYPE.as_str());
    let content_encoding = header_str(&req, header::CONTENT_ENCODING.as_str());
    let content_type_class = classify_content_type(&content_type);

    // S5: bounded read
    let body = match axum::body::to_bytes(req.into_body(), cfg.max_body_bytes as usize).await {
        Ok(body) => body,
        Err(err) => {
            let text = err.to_string();
            let result = if text.to_ascii_lowercase().contains("length limit") {
                "too_large"
            } else {
                "bad_request"
            };
            warn!(tenant = %tenant, error = %text, result, "body read failed");
            return scope.finish(
                result,
                content_type_class,
                &tenant,
                StatusCode::BAD_REQUEST,
                result,
            );
        }
    };

    let size = body.len();
    state
        .metrics
        .request_bytes_total
        .with_label_values(&state.metrics.request_bytes_labels(&scope.endpoint, &tenant))
        .inc_by(size as f64);

    // S7: produce; key iff hash balancer (per-tenant partition affinity)
    let mut headers = Vec::with_capacity(3);
    headers.push((
        TENANT_HEADER.to_string(),
        Bytes::copy_from_slice(tenant.as_bytes()),
    ));
    if !content_type.is_empty() {
        headers.push(("Content-Type".to_string(), Bytes::from(content_type)));
    }
    if !content_encoding.is_empty() {
        headers.push(("Content-Encoding".to_string(), Bytes::from(content_encoding)));
    }
    let msg = OutboundMessage {
        key: (cfg.balancer() == Balancer::Hash)
            .then(|| Bytes::copy_from_slice(tenant.as_bytes())),
        payload: body,
        headers,
    };

    let kafka_start = Instant::now();
    let result = snap.producer.send(msg).await;
    let kafka_secs = kafka_start.elapsed().as_secs_f64();

    match result {
        Err(err) => {
            let error_type = classify::classify(&err);
            let metrics = &state.metrics;
            metrics
                .kafka_write_errors_total
                .with_label_values(&[error_type])
                .inc();
            metrics
                .kafka_write_duration_seconds
                .with_label_values(&["error"])
                .observe(kafka_secs);
            let streak = state.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
            metrics.kafka_consecutive_errors.set(streak as f64);
            warn!(
                tenant = %tenant,
                bytes = size,
                kafka_ms = kafka_secs * 1000.0,
                error = %err,
                error_type,
                "kafka write failed"
            );
            scope.finish(
                "kafka_error",
                content_type_class,
                &tenant,
                StatusCode::SERVICE_UNAVAILABLE,
                "kafka write failed",
            )
        }
        Ok(()) => {
            state.consecutive_errors.store(0, Ordering::Relaxed);
            state.metrics.kafka_consecutive_errors.set(0.0);
            state
                .metrics
                .kafka_write_duration_seconds
                .with_label_values(&["success"])
                .observe(kafka_secs);
            if !cfg.quiet {
                info!(
                    tenant = %tenant,
                    bytes = size,
                    kafka_ms = kafka_secs * 1000.0,
                    endpoint = %scope.endpoint,
                    "accepted"
                );
            }
            scope.finish(
                "success",
                content_type_class,
                &tenant,
                StatusCode::NO_CONTENT,
                "",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_classes() {
        assert_eq!(classify_content_type(""), "proto");
        assert_eq!(classify_content_type("application/x-protobuf"), "proto");
        assert_eq!(classify_content_type("application/octet-stream"), "proto");
        assert_eq!(classify_content_type("application/json"), "json");
        assert_eq!(
            classify_content_type("application/json; charset=utf-8"),
            "json"
        );
        assert_eq!(classify_content_type("text/plain"), "other");
        assert_eq!(classify_content_type("  application/json "), "json");
    }
}
