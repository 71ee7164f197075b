//! Outbound relay of verified webhooks to the private destination.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::error::RelayError;

/// GitHub event type header.
pub const EVENT_HEADER: &str = "x-github-event";
/// GitHub delivery identifier header.
pub const DELIVERY_HEADER: &str = "x-github-delivery";
/// GitHub HMAC-SHA256 signature header.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// The curated subset of inbound headers that travels with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub event: String,
    pub delivery: String,
    pub signature: Option<String>,
    pub user_agent: Option<String>,
}

impl WebhookHeaders {
    /// Extract and validate the relayed headers.
    ///
    /// Event type and delivery id must be present and non-empty, and the
    /// content type must be JSON.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, RelayError> {
        let event = required(headers, EVENT_HEADER)?;
        let delivery = required(headers, DELIVERY_HEADER)?;

        let content_type = optional(headers, header::CONTENT_TYPE.as_str());
        if !content_type.as_deref().is_some_and(is_json_content_type) {
            return Err(RelayError::Validation(
                "content-type must be application/json".to_string(),
            ));
        }

        Ok(Self {
            event,
            delivery,
            signature: optional(headers, SIGNATURE_HEADER),
            user_agent: optional(headers, header::USER_AGENT.as_str()),
        })
    }

    /// Headers for the outbound request.
    pub fn to_outbound(&self) -> HeaderMap {
        let mut out = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                out.insert(name, value);
            }
        };

        put(EVENT_HEADER, &self.event);
        put(DELIVERY_HEADER, &self.delivery);
        if let Some(signature) = &self.signature {
            put(SIGNATURE_HEADER, signature);
        }
        if let Some(user_agent) = &self.user_agent {
            put(header::USER_AGENT.as_str(), user_agent);
        }
        put(header::CONTENT_TYPE.as_str(), "application/json");

        out
    }
}

fn required(headers: &HeaderMap, name: &str) -> Result<String, RelayError> {
    optional(headers, name).ok_or_else(|| RelayError::Validation(format!("missing {} header", name)))
}

fn optional(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Sends verified deliveries to the configured destination.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    destination: Url,
}

impl Forwarder {
    /// Create a forwarder with a whole-request timeout.
    pub fn new(destination: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            destination,
        })
    }

    /// POST the exact captured body to the destination, once.
    ///
    /// Returns the downstream status on 2xx. Non-2xx maps to
    /// [`RelayError::Upstream`]; network failures to [`RelayError::Transport`].
    pub async fn forward(
        &self,
        headers: &WebhookHeaders,
        body: Bytes,
    ) -> Result<StatusCode, RelayError> {
        let body_length = body.len();

        let response = self
            .client
            .post(self.destination.clone())
            .headers(headers.to_outbound())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    event = %headers.event,
                    delivery = %headers.delivery,
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    error = %e,
                    "forward_transport_failed"
                );
                RelayError::Transport(e)
            })?;

        let status = response.status();

        if !status.is_success() {
            warn!(
                event = %headers.event,
                delivery = %headers.delivery,
                upstream_status = status.as_u16(),
                "forward_rejected_by_destination"
            );
            return Err(RelayError::Upstream { status });
        }

        info!(
            event = %headers.event,
            delivery = %headers.delivery,
            upstream_status = status.as_u16(),
            body_length = body_length,
            "forward_accepted"
        );

        Ok(status)
    }
}
