//! Transport adapters: one axum handler per delivery transport.

pub mod heartbeat;
pub mod polling;
pub mod socket;
pub mod stream;

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

/// Methods accepted on the transport endpoints.
pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

/// `OPTIONS` on a transport endpoint.
pub async fn preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(header::ALLOW, ALLOWED_METHODS)])
}
