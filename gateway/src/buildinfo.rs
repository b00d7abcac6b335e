//! Build metadata
//!
//! Exposes the version/commit/date baked in by the build script, the
//! `build_info` gauge, and the structured startup log line that pins a
//! deployment to the exact config document it booted with.

use crate::config::Config;
use crate::error::{GatewayError, Result};
use prometheus::{GaugeVec, Opts, Registry};
use sha2::{Digest, Sha256};
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const DATE: &str = env!("BUILD_DATE");
pub const RUSTC_VERSION: &str = env!("BUILD_RUSTC");

/// Register the `build_info` gauge (constant 1) on the given registry.
pub fn register(registry: &Registry) -> Result<()> {
    let gauge = GaugeVec::new(
        Opts::new("pulse_loki_produce_build_info", "Build information"),
        &["version", "commit", "date", "runtime_version"],
    )
    .map_err(|e| GatewayError::Metrics(format!("build_info: {e}")))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| GatewayError::Metrics(format!("build_info: {e}")))?;
    gauge
        .with_label_values(&[VERSION, COMMIT, DATE, RUSTC_VERSION])
        .set(1.0);
    Ok(())
}

/// Short hex digest identifying the raw config document.
pub fn config_hash(raw: &[u8]) -> String {
    let digest = Sha256::digest(raw);
    hex_prefix(digest.as_slice(), 8)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{b:02x}")).collect()
}

/// Log the startup banner: build identity, config hash and the full
/// redacted runtime view.
pub fn log_startup(cfg: &Config, raw: &[u8]) {
    let view = serde_json::to_string(&cfg.runtime_view()).unwrap_or_default();
    info!(
        version = VERSION,
        commit = COMMIT,
        date = DATE,
        config_hash = %config_hash(raw),
        config_effective = %view,
        "starting"
    );
}
