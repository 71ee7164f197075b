//! Web server module for relaying inbound GitHub webhooks.
//!
//! This module provides a thin public-facing server that:
//! - Rate limits each client address
//! - Verifies the HMAC signature over the raw body
//! - Forwards the untouched payload to the private destination
//! - Maps the destination outcome back to the caller
//!
//! The payload itself is never interpreted.

pub mod handlers;
pub mod rate_limit;
pub mod security;
pub mod signature;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    client_ip, github_webhook, health, root, AppState, HealthResponse, ServiceInfo,
    WebhookResponse,
};
pub use rate_limit::{RateLimitDecision, RateLimiter, SweeperHandle};
pub use signature::verify_signature;

/// Path of the relay entrypoint.
pub const WEBHOOK_PATH: &str = "/webhook/github";

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let webhook = Router::new()
        .route(WEBHOOK_PATH, post(github_webhook))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::rate_limit,
        ));

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(webhook);

    security::with_security_headers(app)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
