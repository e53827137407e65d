mod auth;
mod config;
mod health;
mod http;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::crypter::Crypter;
use crate::config::{Config, Kind};
use crate::health::HealthCheck;
use crate::http::basic::BasicGate;
use crate::http::forward::{ForwardHandler, UpstreamClient};
use crate::http::handler::{AppState, Gate};
use crate::http::html::HtmlGate;
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "auth-http-proxy", about = "Authenticating HTTP reverse proxy")]
struct Cli {
    /// Path to the YAML (or JSON) configuration file.
    #[arg(short, long, default_value = "/etc/auth-http-proxy/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Gate setup
// ---------------------------------------------------------------------------

fn build_gate(
    config: &Config,
    verifier: Arc<dyn auth::Verifier>,
    forward: ForwardHandler,
    metrics: &MetricsRegistry,
) -> Result<Gate> {
    let gate = match config.kind {
        Kind::Basic => Gate::Basic(BasicGate::new(
            verifier,
            forward,
            &config.basic_auth_realm,
            metrics.clone(),
        )),
        Kind::Html => {
            let crypter = Crypter::new(config.secret.as_bytes())
                .context("failed to initialise session crypter")?;
            Gate::Html(HtmlGate::new(verifier, forward, crypter, metrics.clone()))
        }
    };
    Ok(gate)
}

// ---------------------------------------------------------------------------
// Servers (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(config: &Config, state: AppState) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state));

    let listen_addr: std::net::SocketAddr = config
        .listen
        .parse()
        .context("invalid listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, target = %config.target_address, "proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn run_metrics_server(listen: String, metrics: MetricsRegistry) -> Result<()> {
    let listen_addr: std::net::SocketAddr =
        listen.parse().context("invalid metrics_listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "metrics listening");

    axum::serve(listener, http::handler::create_metrics_router(metrics))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("metrics server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;

    tracing::info!(
        config_path = %cli.config,
        kind = ?config.kind,
        verifier = ?config.verifier,
        "starting auth-http-proxy"
    );

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Verifier backend ----
    let verifier = auth::build_verifier(&config, &metrics)?;

    // ---- Upstream ----
    let transport = UpstreamClient::new(
        &config.target_address,
        Duration::from_secs(config.upstream_timeout),
    )?;
    let forward = ForwardHandler::new(Arc::new(transport), &config.target_address, metrics.clone());

    // ---- App state ----
    let state = AppState {
        gate: build_gate(&config, Arc::clone(&verifier), forward, &metrics)?,
        health: HealthCheck::from_config(&config)?,
    };

    // ---- Spawn services ----
    let metrics_handle = config.metrics_listen.clone().map(|listen| {
        let m = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(listen, m).await {
                tracing::error!(error = %format!("{e:#}"), "metrics server failed");
            }
        })
    });

    let result = run_http_server(&config, state).await;

    // ---- Drain ----
    verifier.shutdown().await;
    if let Some(handle) = metrics_handle {
        if result.is_err() {
            handle.abort();
        }
        let _ = handle.await;
    }

    result?;
    tracing::info!("auth-http-proxy shut down cleanly");
    Ok(())
}
