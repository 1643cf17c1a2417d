//! # eventhub-server
//!
//! HTTP surface of the event hub: axum handlers that turn WebSocket
//! upgrades, SSE requests and long-poll requests into transport links bound
//! to driver channels, plus `/health` and `/metrics`.

#![deny(unsafe_code)]

pub mod error;
pub mod health;
pub mod metrics;
pub mod request;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use error::ServerError;
pub use server::{AppState, EventHubServer};
pub use shutdown::ShutdownCoordinator;
