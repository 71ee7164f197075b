//! Relay endpoint handlers.
//!
//! The webhook handler runs each delivery through header validation, body
//! capture, signature verification and a single forward. Rate limiting runs
//! earlier, as middleware, so rejected clients never reach signature work.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::forward::{Forwarder, WebhookHeaders, DELIVERY_HEADER, EVENT_HEADER};
use crate::web::rate_limit::{RateLimitDecision, RateLimiter};
use crate::web::signature::verify_signature;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub forwarder: Forwarder,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, forwarder: Forwarder, rate_limiter: RateLimiter) -> Self {
        Self {
            config: Arc::new(config),
            forwarder,
            rate_limiter,
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Static service metadata.
#[derive(Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

/// Service metadata endpoint.
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
    })
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub destination_configured: bool,
    pub secret_configured: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        // Startup refuses to run without a destination URL
        destination_configured: state.config.destination_url.has_host(),
        secret_configured: !state.config.webhook_secret.expose().is_empty(),
    })
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Resolve the address a request is counted against.
///
/// With `trust_proxy` the last `x-forwarded-for` entry is used, since that is
/// the hop the trusted proxy appended; earlier entries are caller-supplied.
/// Otherwise, or if that entry is not an IP, the TCP peer address is used.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());

        if let Some(ip) = forwarded {
            return ip;
        }
    }

    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Fixed-window rate limit middleware for the webhook route.
pub async fn rate_limit(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let ip = client_ip(request.headers(), peer, state.config.trust_proxy);

    match state.rate_limiter.check(ip).await {
        RateLimitDecision::Allowed { .. } => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => {
            warn!(
                client_ip = %ip,
                retry_after_secs = retry_after.as_secs(),
                stage = "rate_limit",
                "webhook_rate_limited"
            );
            RelayError::RateLimited { retry_after }.into_response()
        }
    }
}

// =============================================================================
// GitHub Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

/// GitHub webhook endpoint.
///
/// This endpoint:
/// 1. Validates the event, delivery and content-type headers
/// 2. Checks the captured body is JSON, keeping the raw bytes
/// 3. Verifies the HMAC signature over those raw bytes
/// 4. Forwards the untouched bytes to the destination, once
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), RelayError> {
    let webhook = WebhookHeaders::from_headers(&headers).inspect_err(|e| {
        warn!(
            event = %header_str(&headers, EVENT_HEADER),
            delivery = %header_str(&headers, DELIVERY_HEADER),
            stage = e.stage(),
            error = %e,
            "webhook_rejected"
        );
    })?;

    info!(
        event = %webhook.event,
        delivery = %webhook.delivery,
        body_length = body.len(),
        has_signature = webhook.signature.is_some(),
        "webhook_received"
    );

    relay(&state, &webhook, body).await.inspect_err(|e| {
        // Forward failures are already logged by the forwarder
        if !matches!(e, RelayError::Upstream { .. } | RelayError::Transport(_)) {
            warn!(
                event = %webhook.event,
                delivery = %webhook.delivery,
                stage = e.stage(),
                error = %e,
                "webhook_rejected"
            );
        }
    })?;

    info!(event = %webhook.event, delivery = %webhook.delivery, "webhook_relayed");

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            status: "forwarded",
            message: None,
            delivery_id: Some(webhook.delivery),
        }),
    ))
}

/// Header value for logging, empty when absent or not visible ASCII.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Body check, signature verification and forward for validated headers.
async fn relay(state: &AppState, webhook: &WebhookHeaders, body: Bytes) -> Result<(), RelayError> {
    // Parsed only to reject malformed JSON; the raw bytes are what get signed
    if serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_err() {
        return Err(RelayError::Validation("body is not valid JSON".to_string()));
    }

    let signature = webhook
        .signature
        .as_deref()
        .ok_or(RelayError::MissingSignature)?;

    if !verify_signature(state.config.webhook_secret.expose(), &body, signature) {
        return Err(RelayError::InvalidSignature);
    }

    state.forwarder.forward(webhook, body).await?;

    Ok(())
}
