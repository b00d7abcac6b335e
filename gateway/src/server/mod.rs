//! HTTP server, shared state and the reload controller
//!
//! # Endpoints
//!
//! - `POST /loki/api/v1/push` - Loki push-API shaped ingest
//! - `POST /api/prom/push` - legacy ingest path, same handler
//! - `POST /reload` - re-read the config file and apply it
//! - `GET /ready` - readiness following the `health_up` gauge
//! - `GET /configz` - redaction-safe view of the running config
//! - `GET /metrics` - Prometheus exposition
//!
//! # Shared state
//!
//! The gateway owns a pointer triple (config, producer, limiter set)
//! behind one `RwLock`. A handler takes the read lock, clones the
//! three `Arc`s, releases, and works on that snapshot for the rest of
//! the request. The reload controller swaps all three under the write
//! lock in one step, so no request ever observes a mixed old/new
//! state.

pub mod push;

use crate::config::Config;
use crate::error::Result;
use crate::health;
use crate::kafka::{KafkaProducer, Producer, ProducerSettings};
use crate::limit::Limits;
use crate::metrics::Metrics;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound on connection draining after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(25);

/// The per-request view of the mutable world: one configuration
/// generation with its producer and limiter set.
#[derive(Clone)]
pub struct Snapshot {
    pub cfg: Arc<Config>,
    pub producer: Arc<dyn Producer>,
    pub limits: Arc<Limits>,
}

/// State shared between handlers, the reload controller and the
/// health evaluator.
pub struct SharedState {
    cfg_path: PathBuf,
    current: RwLock<Snapshot>,
    pub metrics: Arc<Metrics>,
    /// Consecutive Kafka write failures; reset by any success.
    /// Handler-updated and approximate; the health decision is a
    /// threshold comparison, not an exact count.
    pub consecutive_errors: AtomicU64,
    /// Linearises concurrent reload requests before any file IO.
    reload_lock: Mutex<()>,
}

impl SharedState {
    /// Clone the current pointer triple under the read lock.
    pub fn snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    /// Re-read the config file and apply it.
    ///
    /// Validation or producer-build failures leave the running state
    /// untouched. On an immutable-subset change the new producer is
    /// built *before* the old one is released, and the whole triple is
    /// republished under the write lock.
    pub fn reload(&self) -> Result<()> {
        let _serial = self.reload_lock.lock();
        let (new_cfg, _raw) = Config::load_from_file(&self.cfg_path)?;

        let mut current = self.current.write();
        let old_immutable = current.cfg.immutable_subset();
        let new_immutable = new_cfg.immutable_subset();

        let new_producer: Option<Arc<dyn Producer>> = if old_immutable != new_immutable {
            info!("immutable config changed, rebuilding kafka producer");
            let producer = KafkaProducer::new(ProducerSettings::from_config(&new_cfg))?;
            Some(Arc::new(producer))
        } else {
            None
        };

        // Collector label sets and the listening socket outlive a
        // reload; these two only take effect on process restart.
        if old_immutable.metrics_enable_tenant_label != new_immutable.metrics_enable_tenant_label {
            warn!("metrics_enable_tenant_label changed - restart required to take effect");
        }
        if current.cfg.port != new_cfg.port {
            warn!(
                old_port = current.cfg.port,
                new_port = new_cfg.port,
                "port changed - restart required to re-bind"
            );
        }

        if let Some(producer) = new_producer {
            // In-flight writes hold their own handle and finish under
            // their own deadlines; the old producer tears down when
            // the last of them drops.
            info!("closing old kafka producer");
            current.producer = producer;
        }
        current.cfg = Arc::new(new_cfg);
        current.limits = Arc::new(Limits::from_config(&current.cfg));

        info!(
            port = current.cfg.port,
            balancer = %current.cfg.kafka_balancer,
            acks = current.cfg.kafka_required_acks,
            "reload applied"
        );
        Ok(())
    }
}

/// The ingest gateway: push path, admin surface and background tasks.
pub struct Gateway {
    state: Arc<SharedState>,
}

impl Gateway {
    /// Build the gateway with an rdkafka producer from the config.
    pub fn new(cfg_path: PathBuf, cfg: Config) -> Result<Gateway> {
        let producer: Arc<dyn Producer> =
            Arc::new(KafkaProducer::new(ProducerSettings::from_config(&cfg))?);
        Gateway::with_producer(cfg_path, cfg, producer)
    }

    /// Build the gateway around an externally supplied producer.
    pub fn with_producer(
        cfg_path: PathBuf,
        cfg: Config,
        producer: Arc<dyn Producer>,
    ) -> Result<Gateway> {
        let metrics = Arc::new(Metrics::new(cfg.metrics_enable_tenant_label)?);
        let limits = Arc::new(Limits::from_config(&cfg));
        let state = Arc::new(SharedState {
            cfg_path,
            current: RwLock::new(Snapshot {
                cfg: Arc::new(cfg),
                producer,
                limits,
            }),
            metrics,
            consecutive_errors: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
        });
        Ok(Gateway { state })
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.state.metrics)
    }

    pub fn reload(&self) -> Result<()> {
        self.state.reload()
    }

    /// The full route table bound to this gateway's state.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Serve until the shutdown future resolves, then drain within a
    /// bounded grace period. Runs the startup probe and the health
    /// evaluator alongside.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let snap = state.snapshot();

        if snap.cfg.kafka_probe_enabled {
            match snap.producer.probe(snap.cfg.kafka_probe_write).await {
                Ok(()) => {}
                Err(e) if snap.cfg.kafka_probe_required => return Err(e),
                Err(e) => warn!(error = %e, "kafka probe failed (non-fatal)"),
            }
        }

        let health_task = tokio::spawn(health::run(Arc::clone(&state)));

        let addr = SocketAddr::from(([0, 0, 0, 0], snap.cfg.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            port = snap.cfg.port,
            topic = %snap.cfg.kafka_topic,
            brokers = %snap.cfg.kafka_brokers.join(","),
            "listening"
        );

        let app = router(Arc::clone(&state));
        let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
        let mut serve = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown.await;
                    info!("shutdown signal received, draining connections");
                    let _ = signalled_tx.send(());
                })
                .await
        });

        // Wake on the signal (or an early server exit), stop the
        // health ticker, then bound the drain.
        let _ = signalled_rx.await;
        health_task.abort();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e.into()),
            Ok(Err(join_err)) => warn!(error = %join_err, "server task failed"),
            Err(_) => {
                warn!("graceful shutdown deadline exceeded, aborting");
                serve.abort();
            }
        }

        // Remaining in-flight sends hold their own producer handle and
        // finish under their own deadlines.
        info!("closing kafka producer");
        Ok(())
    }
}

/// Build the route table over shared state.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/loki/api/v1/push", any(push::handle_push))
        .route("/api/prom/push", any(push::handle_push))
        .route("/ready", get(ready_handler))
        .route("/configz", get(configz_handler))
        .route("/reload", any(reload_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Readiness follows the advisory health gauge.
async fn ready_handler(State(state): State<Arc<SharedState>>) -> Response {
    if state.metrics.health_up.get() != 0.0 {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded").into_response()
    }
}

async fn configz_handler(State(state): State<Arc<SharedState>>) -> Response {
    let cfg = state.snapshot().cfg;
    (StatusCode::OK, Json(cfg.runtime_view())).into_response()
}

async fn reload_handler(State(state): State<Arc<SharedState>>, req: Request) -> Response {
    if req.method() != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "use POST").into_response();
    }
    match state.reload() {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            r#"{"status":"ok"}"#,
        )
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, format!("reload failed: {e}")).into_response(),
    }
}

async fn metrics_handler(State(state): State<Arc<SharedState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.gather(),
    )
        .into_response()
}
