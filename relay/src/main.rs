//! GitHub webhook relay server.
//!
//! Loads configuration from the environment, refuses to start without a
//! destination and a shared secret, then serves the relay until SIGINT or
//! SIGTERM.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::{router, AppState, Config, Forwarder, RateLimiter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("relay_starting");

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        destination = %config.destination_authority(),
        secret_configured = !config.webhook_secret.expose().is_empty(),
        rate_limit_max_requests = config.rate_limit_max_requests,
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        forward_timeout_secs = config.forward_timeout.as_secs(),
        max_body_bytes = config.max_body_bytes,
        trust_proxy = config.trust_proxy,
        "config_loaded"
    );

    let forwarder = Forwarder::new(config.destination_url.clone(), config.forward_timeout)
        .context("Failed to build HTTP client")?;

    let rate_limiter = RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window);
    if !rate_limiter.is_enabled() {
        warn!("rate_limit_disabled");
    }
    let sweeper = rate_limiter.spawn_sweeper(config.rate_limit_sweep_interval);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, forwarder, rate_limiter));

    // Bind to address
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "relay_listening");

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    sweeper.shutdown().await;

    info!("relay_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("relay_shutting_down");
}
