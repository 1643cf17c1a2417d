//! # eventhub-core
//!
//! Core types shared by the event driver and the HTTP adapters.
//!
//! - [`ids`]: channel ids and sender fingerprints
//! - [`event`]: outbound/inbound events and the post builder
//! - [`policy`]: channel policies and the application handler trait
//! - [`request`]: transport-neutral view of an incoming HTTP request
//! - [`transport`]: socket / stream / poll links bound to a channel
//! - [`guard`]: brute-force reconnection guard
//! - [`auth`]: authenticator and cookie decoder seams

#![deny(unsafe_code)]

pub mod auth;
pub mod event;
pub mod guard;
pub mod ids;
pub mod policy;
pub mod request;
pub mod transport;

pub use auth::{AuthenticationError, ChannelAuthenticator, CookieDecoder, PlainCookies};
pub use event::{EventKind, EventPost, InboundEvent, OutboundEvent};
pub use guard::BruteForceGuard;
pub use ids::{ChannelId, SenderFingerprint};
pub use policy::{ChannelHandler, ChannelInfo, ChannelPolicy};
pub use request::{IncomingRequest, RequestCookie};
pub use transport::{
    PollBatch, PollRequest, PollWaiter, SocketFrame, SocketLink, StreamLink, StreamMessage,
    Transport, TransportError, TransportKind,
};
