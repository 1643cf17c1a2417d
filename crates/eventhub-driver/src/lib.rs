//! # eventhub-driver
//!
//! The server-side event driver. Applications register logical channels,
//! post events to them and receive client events back; HTTP adapters hand
//! in WebSocket, SSE and long-poll connections which the driver binds to
//! the right channel.
//!
//! - [`channel`]: one logical channel with its queues and bound transport
//! - [`driver`]: registry, binding strategies and the scheduler task
//! - [`error`]: bind errors

#![deny(unsafe_code)]

pub mod channel;
pub mod driver;
pub mod error;

pub use channel::{CHANNEL_CLOSED, ChannelIdentity, EventChannel};
pub use driver::{
    BindStrategy, ChannelRegistration, ChannelSelector, EventDriver, MONITOR_END_LOOPS,
    MONITOR_END_WAIT, MONITOR_INTERVAL_MAX, MONITOR_INTERVAL_MIN, POLLING_MARKER, SOCKETS_MARKER,
    STREAMS_MARKER, SchedulerState,
};
pub use error::BindError;
