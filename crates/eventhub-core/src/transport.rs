//! Transport links bound to a channel.
//!
//! A link is the driver-side end of a physical connection owned by an HTTP
//! adapter. Sockets and streams are fed through bounded `mpsc` channels and
//! never block the sender; a poll waiter is a one-shot reply slot.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::event::{EventKind, InboundEvent, OutboundEvent};
use crate::ids::SenderFingerprint;

/// Kind of transport currently bound to a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Nothing bound.
    #[default]
    NotConnected,
    /// Full-duplex WebSocket.
    Socket,
    /// One-way Server-Sent Events stream.
    Stream,
    /// One-shot long-poll request.
    Polling,
}

impl TransportKind {
    /// Short name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "none",
            Self::Socket => "socket",
            Self::Stream => "stream",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a link when handing over a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The link buffer is full; try again on a later pass.
    #[error("transport buffer full")]
    Full,
    /// The peer side is gone.
    #[error("transport closed")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for TransportError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::Full,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sockets
// ─────────────────────────────────────────────────────────────────────────────

/// Frame handed to a WebSocket writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close the socket with a status code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

/// Driver-side end of a WebSocket.
pub struct SocketLink {
    fingerprint: SenderFingerprint,
    outbound: mpsc::Sender<SocketFrame>,
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    open: Arc<AtomicBool>,
}

impl SocketLink {
    /// Create a link. `open` is flipped by the adapter once the upgrade
    /// completes and again when the socket goes away.
    pub fn new(
        fingerprint: SenderFingerprint,
        outbound: mpsc::Sender<SocketFrame>,
        inbound: mpsc::UnboundedReceiver<InboundEvent>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            fingerprint,
            outbound,
            inbound,
            open,
        }
    }

    /// Fingerprint of the connected client.
    pub fn fingerprint(&self) -> SenderFingerprint {
        self.fingerprint
    }

    /// Whether the adapter reports the socket open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Whether the socket can never carry traffic again.
    pub fn is_dead(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queue one outbound event as a frame.
    pub fn try_send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let frame = match event.kind {
            EventKind::Binary => SocketFrame::Binary(event.payload.clone().into_bytes()),
            _ => SocketFrame::Text(event.payload.clone()),
        };
        self.outbound.try_send(frame).map_err(TransportError::from)
    }

    /// Whether client frames are waiting to be drained.
    pub fn has_inbound(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Drain every frame the client sent since the last call.
    pub fn drain_inbound(&mut self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inbound.try_recv() {
            events.push(event);
        }
        events
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self, reason: &str) {
        self.open.store(false, Ordering::Release);
        let _ = self.outbound.try_send(SocketFrame::Close {
            code: 1000,
            reason: reason.to_string(),
        });
    }
}

impl fmt::Debug for SocketLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketLink")
            .field("fingerprint", &self.fingerprint)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streams
// ─────────────────────────────────────────────────────────────────────────────

/// One Server-Sent Event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessage {
    /// SSE `id` field (the event sequence number).
    pub id: u64,
    /// SSE `event` field.
    pub event: String,
    /// SSE `data` field. Binary payloads are base64-encoded.
    pub data: String,
}

impl From<&OutboundEvent> for StreamMessage {
    fn from(event: &OutboundEvent) -> Self {
        let data = match event.kind {
            EventKind::Binary => BASE64.encode(event.payload.as_bytes()),
            _ => event.payload.clone(),
        };
        Self {
            id: event.number,
            event: event.event_name().to_string(),
            data,
        }
    }
}

/// Driver-side end of an SSE stream. Dropping it ends the stream.
pub struct StreamLink {
    fingerprint: SenderFingerprint,
    outbound: mpsc::Sender<StreamMessage>,
}

impl StreamLink {
    /// Create a link.
    pub fn new(fingerprint: SenderFingerprint, outbound: mpsc::Sender<StreamMessage>) -> Self {
        Self {
            fingerprint,
            outbound,
        }
    }

    /// Fingerprint of the connected client.
    pub fn fingerprint(&self) -> SenderFingerprint {
        self.fingerprint
    }

    /// Whether the client went away.
    pub fn is_dead(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queue one outbound event.
    pub fn try_send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        self.outbound
            .try_send(StreamMessage::from(event))
            .map_err(TransportError::from)
    }
}

impl fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLink")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Long polling
// ─────────────────────────────────────────────────────────────────────────────

/// Answer to one long-poll request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollBatch {
    /// Delivered events in post order.
    pub events: Vec<OutboundEvent>,
    /// The client asked to close and the channel acknowledged.
    pub channel_closed: bool,
}

impl PollBatch {
    /// An empty answer.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Acknowledgement of a close request.
    pub fn closed() -> Self {
        Self {
            events: Vec::new(),
            channel_closed: true,
        }
    }
}

/// Body of one long-poll request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollRequest {
    /// Optional client to server message.
    pub message: Option<InboundEvent>,
    /// The client asks to close its channel.
    pub close_channel: bool,
}

/// A parked long-poll request waiting for its answer.
pub struct PollWaiter {
    fingerprint: SenderFingerprint,
    reply: oneshot::Sender<PollBatch>,
}

impl PollWaiter {
    /// Create a waiter. The adapter keeps the receiving half.
    pub fn new(fingerprint: SenderFingerprint, reply: oneshot::Sender<PollBatch>) -> Self {
        Self { fingerprint, reply }
    }

    /// Fingerprint of the polling client.
    pub fn fingerprint(&self) -> SenderFingerprint {
        self.fingerprint
    }

    /// Whether the HTTP request was abandoned (timeout or disconnect).
    pub fn is_dead(&self) -> bool {
        self.reply.is_closed()
    }

    /// Answer the request, consuming the waiter. Hands the batch back when
    /// the request was abandoned in the meantime.
    pub fn answer(self, batch: PollBatch) -> Result<(), PollBatch> {
        self.reply.send(batch)
    }
}

impl fmt::Debug for PollWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollWaiter")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binding
// ─────────────────────────────────────────────────────────────────────────────

/// The single transport bound to a channel.
#[derive(Debug, Default)]
pub enum Transport {
    /// Nothing bound.
    #[default]
    None,
    /// A WebSocket.
    Socket(SocketLink),
    /// An SSE stream.
    Stream(StreamLink),
    /// A parked long-poll request.
    Poll(PollWaiter),
}

impl Transport {
    /// Kind of the bound transport.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::None => TransportKind::NotConnected,
            Self::Socket(_) => TransportKind::Socket,
            Self::Stream(_) => TransportKind::Stream,
            Self::Poll(_) => TransportKind::Polling,
        }
    }

    /// Release the transport: close sockets, end streams and answer a parked
    /// poll with an empty batch.
    pub fn release(self, reason: &str) {
        match self {
            Self::None => {}
            Self::Socket(link) => link.close(reason),
            Self::Stream(link) => drop(link),
            Self::Poll(waiter) => {
                let _ = waiter.answer(PollBatch::empty());
            }
        }
    }
}
