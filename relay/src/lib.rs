//! GitHub webhook relay.
//!
//! A public-facing receiver that verifies signed GitHub webhook deliveries
//! and forwards them, byte for byte, to a single private destination.
//!
//! ## Request flow
//!
//! ```text
//! GitHub → security headers → rate limit → headers → body → signature → Forwarder → destination
//! ```

pub mod config;
pub mod error;
pub mod forward;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, Secret};
pub use error::RelayError;
pub use forward::{Forwarder, WebhookHeaders};
pub use web::{router, AppState, RateLimiter};
