//! pulse-loki-produce service entry point

use clap::Parser;
use pulse_loki_produce::config::{Balancer, Config};
use pulse_loki_produce::server::Gateway;
use pulse_loki_produce::buildinfo;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "pulse-loki-produce", version = buildinfo::VERSION)]
struct Cli {
    /// Path to the YAML config file (mounted via ConfigMap)
    #[arg(long = "config", default_value = "/config/config.yaml")]
    config: PathBuf,

    /// Print supported Kafka balancers and exit
    #[arg(long)]
    list_balancers: bool,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if cli.list_balancers {
        for name in Balancer::SUPPORTED {
            println!("{name}");
        }
        return std::process::ExitCode::SUCCESS;
    }

    let (cfg, raw) = match Config::load_from_file(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", cli.config.display());
            return std::process::ExitCode::FAILURE;
        }
    };

    init_tracing(&cfg);
    buildinfo::log_startup(&cfg, &raw);

    match serve(cli.config, cfg) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn serve(cfg_path: PathBuf, cfg: Config) -> pulse_loki_produce::Result<()> {
    let gateway = Gateway::new(cfg_path, cfg)?;

    // SIGHUP reloads in place; failures are logged and never fatal.
    let reload_state = gateway.state();
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            hangup.recv().await;
            info!("received SIGHUP, reloading config");
            let state = Arc::clone(&reload_state);
            let result = tokio::task::spawn_blocking(move || state.reload()).await;
            match result {
                Ok(Ok(())) => info!("reload completed"),
                Ok(Err(e)) => error!(error = %e, "reload failed"),
                Err(e) => error!(error = %e, "reload task failed"),
            }
        }
    });

    gateway.run(shutdown_signal()).await
}

/// Initialise JSON tracing from the configured level; `RUST_LOG`
/// overrides when set.
fn init_tracing(cfg: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cfg.log_level.clone().into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to install Ctrl+C handler");
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
