//! Events flowing through a channel.
//!
//! Outbound events are queued by the application and delivered to the bound
//! transport in post order. Inbound events originate at the client (or are
//! synthesized on open/close) and are handed to the channel handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::SenderFingerprint;

/// Kind of an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// At most once, at the start of a stream.
    Open,
    /// General message (most traffic).
    #[default]
    Message,
    /// Binary payload. Base64-encoded on text-only transports.
    Binary,
    /// Error notification, may be intermixed with messages.
    Error,
    /// At most once, at the end of a stream.
    Close,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Binary => "binary",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "message" | "" => Ok(Self::Message),
            "binary" => Ok(Self::Binary),
            "error" => Ok(Self::Error),
            "close" => Ok(Self::Close),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// An event waiting in a channel's outbound queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEvent {
    /// Per-channel sequence number (starts at 1).
    pub number: u64,
    /// Event kind.
    pub kind: EventKind,
    /// Optional application-defined name, used as the SSE event name.
    pub kind_name: Option<String>,
    /// Payload text.
    pub payload: String,
    /// When set, only the client with this fingerprint may receive the event.
    pub target: Option<SenderFingerprint>,
}

impl OutboundEvent {
    /// Whether a client with the given fingerprint may receive this event.
    pub fn is_for(&self, fingerprint: SenderFingerprint) -> bool {
        self.target.is_none_or(|t| t == fingerprint)
    }

    /// Name to announce the event under (kind name, or the kind itself).
    pub fn event_name(&self) -> &str {
        self.kind_name.as_deref().unwrap_or(self.kind.as_str())
    }
}

/// An event travelling from the client to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Payload text (binary frames are lossily decoded).
    pub payload: String,
}

impl InboundEvent {
    /// Create an inbound event.
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Arguments of a post to a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventPost {
    /// Payload text.
    pub payload: String,
    /// Sender identity the event must be returned to exclusively.
    pub return_to_sender: Option<String>,
    /// Event kind (defaults to [`EventKind::Message`]).
    pub kind: EventKind,
    /// Optional application-defined kind name.
    pub kind_name: Option<String>,
}

impl EventPost {
    /// A plain message post.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Deliver only to the client with this sender identity.
    #[must_use]
    pub fn return_to_sender(mut self, sender: impl Into<String>) -> Self {
        let sender = sender.into();
        self.return_to_sender = (!sender.is_empty()).then_some(sender);
        self
    }

    /// Set the event kind.
    #[must_use]
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the application-defined kind name.
    #[must_use]
    pub fn kind_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.kind_name = (!name.is_empty()).then_some(name);
        self
    }

    /// Fingerprint of the return-to-sender target, if any.
    pub fn target(&self) -> Option<SenderFingerprint> {
        self.return_to_sender.as_deref().map(SenderFingerprint::of)
    }
}
