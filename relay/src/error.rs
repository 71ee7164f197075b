//! Request-level error taxonomy and its HTTP mapping.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::web::WebhookResponse;

/// Reasons a webhook delivery is not relayed.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed headers, wrong content type, or a non-JSON body.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("signature header missing")]
    MissingSignature,

    #[error("signature does not match payload")]
    InvalidSignature,

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    /// Destination answered with a non-2xx status.
    #[error("destination responded with status {status}")]
    Upstream { status: StatusCode },

    /// Destination could not be reached (refused, timeout, DNS).
    #[error("failed to reach destination")]
    Transport(#[source] reqwest::Error),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::MissingSignature | RelayError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stage of the relay chain that rejected the request, for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation",
            RelayError::MissingSignature | RelayError::InvalidSignature => "signature",
            RelayError::RateLimited { .. } => "rate_limit",
            RelayError::Upstream { .. } | RelayError::Transport(_) => "forward",
        }
    }

    /// Message shown to the caller. Never carries destination details.
    fn public_message(&self) -> String {
        match self {
            RelayError::Validation(reason) => reason.clone(),
            RelayError::MissingSignature => "missing x-hub-signature-256 header".to_string(),
            RelayError::InvalidSignature => "invalid signature".to_string(),
            RelayError::RateLimited { .. } => "too many requests".to_string(),
            RelayError::Upstream { .. } => "destination rejected the webhook".to_string(),
            RelayError::Transport(_) => "failed to forward webhook".to_string(),
        }
    }

    fn status_label(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "bad_request",
            RelayError::MissingSignature | RelayError::InvalidSignature => "unauthorized",
            RelayError::RateLimited { .. } => "rate_limited",
            RelayError::Upstream { .. } => "bad_gateway",
            RelayError::Transport(_) => "error",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(WebhookResponse {
            status: self.status_label(),
            message: Some(self.public_message()),
            delivery_id: None,
        });

        let mut response = (self.status_code(), body).into_response();

        if let RelayError::RateLimited { retry_after } = self {
            // Round up so clients never retry a moment too early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
