//! One logical event channel.
//!
//! A channel owns an outbound FIFO, an inbound FIFO and at most one bound
//! transport, all behind its own lock. The scheduler drives it through
//! [`EventChannel::send_channel`] and [`EventChannel::receiving`]; the
//! application handler is always called with the lock released.

use std::collections::VecDeque;
use std::sync::Arc;

use eventhub_core::{
    ChannelHandler, ChannelId, ChannelInfo, ChannelPolicy, CookieDecoder, EventKind, EventPost,
    InboundEvent, IncomingRequest, OutboundEvent, PollBatch, PollRequest, PollWaiter, SocketLink,
    StreamLink, Transport, TransportError, TransportKind,
};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Payload of the close event handed to the application by
/// [`EventChannel::close_channel`].
pub const CHANNEL_CLOSED: &str = "Channel closed";

/// Static identity of a channel, fixed at registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelIdentity {
    /// Channel id.
    pub id: ChannelId,
    /// Session name (routing key).
    pub session_name: String,
    /// Name of the authenticating cookie.
    pub cookie_name: String,
    /// Expected decoded cookie value.
    pub token: String,
    /// Decryption context for the cookie value.
    pub metadata: String,
}

struct ChannelState {
    policy: ChannelPolicy,
    handler: Option<Arc<dyn ChannelHandler>>,
    queue: VecDeque<OutboundEvent>,
    inbound: VecDeque<InboundEvent>,
    transport: Transport,
    last_number: u64,
    open_seen: bool,
    close_seen: bool,
}

impl ChannelState {
    /// Queue an inbound event, keeping at most one open per channel and one
    /// close per connection, with an open ahead of any other traffic.
    fn push_inbound(&mut self, event: InboundEvent) {
        match event.kind {
            EventKind::Open => {
                if !self.open_seen {
                    self.open_seen = true;
                    self.inbound.push_back(event);
                }
            }
            EventKind::Close => {
                if !self.close_seen {
                    self.close_seen = true;
                    self.inbound.push_back(event);
                }
            }
            _ => {
                self.ensure_open();
                self.inbound.push_back(event);
            }
        }
    }

    fn ensure_open(&mut self) {
        if !self.open_seen {
            self.open_seen = true;
            self.inbound
                .push_back(InboundEvent::new(EventKind::Open, String::new()));
        }
    }

    /// Replace the bound transport, releasing the previous one.
    fn bind(&mut self, transport: Transport) {
        let previous = std::mem::replace(&mut self.transport, transport);
        if let Transport::Socket(mut link) = previous {
            for event in link.drain_inbound() {
                self.push_inbound(event);
            }
            link.close("Replaced by a new connection");
        } else {
            previous.release("Replaced by a new connection");
        }
        self.close_seen = false;
    }

    /// Drop the bound transport after a failure and tell the application.
    fn unbind_failed(&mut self) {
        if let Transport::Socket(mut link) = std::mem::take(&mut self.transport) {
            for event in link.drain_inbound() {
                self.push_inbound(event);
            }
        }
        self.push_inbound(InboundEvent::new(EventKind::Close, String::new()));
    }
}

/// Whether a socket or stream link went away on the adapter side.
fn link_dead(transport: &Transport) -> bool {
    match transport {
        Transport::Socket(link) => link.is_dead(),
        Transport::Stream(link) => link.is_dead(),
        Transport::None | Transport::Poll(_) => false,
    }
}

fn link_send(transport: &Transport, event: &OutboundEvent) -> Result<(), TransportError> {
    match transport {
        Transport::Socket(link) => link.try_send(event),
        Transport::Stream(link) => link.try_send(event),
        Transport::None | Transport::Poll(_) => Err(TransportError::Closed),
    }
}

/// A logical session between the application and one client.
pub struct EventChannel {
    identity: ChannelIdentity,
    state: Mutex<ChannelState>,
}

impl EventChannel {
    /// Create an unbound channel.
    pub fn new(
        identity: ChannelIdentity,
        policy: ChannelPolicy,
        handler: Option<Arc<dyn ChannelHandler>>,
    ) -> Self {
        Self {
            identity,
            state: Mutex::new(ChannelState {
                policy,
                handler,
                queue: VecDeque::new(),
                inbound: VecDeque::new(),
                transport: Transport::None,
                last_number: 0,
                open_seen: false,
                close_seen: false,
            }),
        }
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.identity.id
    }

    /// Registration data.
    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    /// Session name.
    pub fn session_name(&self) -> &str {
        &self.identity.session_name
    }

    /// Current policy.
    pub fn policy(&self) -> ChannelPolicy {
        self.state.lock().policy
    }

    fn info(&self, policy: ChannelPolicy) -> ChannelInfo {
        ChannelInfo {
            id: self.identity.id,
            session_name: self.identity.session_name.clone(),
            policy,
        }
    }

    /// Append an event to the outbound queue. Returns its sequence number.
    pub fn post_event(&self, post: EventPost) -> u64 {
        let target = post.target();
        let mut state = self.state.lock();
        state.last_number += 1;
        let number = state.last_number;
        state.queue.push_back(OutboundEvent {
            number,
            kind: post.kind,
            kind_name: post.kind_name,
            payload: post.payload,
            target,
        });
        number
    }

    /// Whether a request cookie authenticates against this channel.
    pub fn authenticates(&self, request: &IncomingRequest, decoder: &dyn CookieDecoder) -> bool {
        request
            .cookies
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(&self.identity.cookie_name))
            .filter_map(|c| decoder.decode(&c.value, &self.identity.metadata))
            .any(|token| token.eq_ignore_ascii_case(&self.identity.token))
    }

    fn admits(
        &self,
        request: &IncomingRequest,
        require_secure_match: bool,
        decoder: &dyn CookieDecoder,
    ) -> bool {
        if require_secure_match && !self.authenticates(request, decoder) {
            warn!(
                channel_id = %self.identity.id,
                session = %self.identity.session_name,
                "connection without proper authentication refused"
            );
            return false;
        }
        true
    }

    /// Bind a WebSocket, replacing any earlier transport.
    pub fn register_new_socket(
        &self,
        request: &IncomingRequest,
        link: SocketLink,
        require_secure_match: bool,
        decoder: &dyn CookieDecoder,
    ) -> bool {
        if !self.admits(request, require_secure_match, decoder) {
            return false;
        }
        self.state.lock().bind(Transport::Socket(link));
        info!(channel_id = %self.identity.id, transport = "socket", "transport bound");
        true
    }

    /// Bind an SSE stream, replacing any earlier transport.
    ///
    /// Streams carry no client frames, so the open event is generated here.
    pub fn register_new_stream(
        &self,
        request: &IncomingRequest,
        link: StreamLink,
        require_secure_match: bool,
        decoder: &dyn CookieDecoder,
    ) -> bool {
        if !self.admits(request, require_secure_match, decoder) {
            return false;
        }
        let mut state = self.state.lock();
        state.bind(Transport::Stream(link));
        state.push_inbound(InboundEvent::new(
            EventKind::Open,
            format!("Started: {}", request.path),
        ));
        drop(state);
        info!(channel_id = %self.identity.id, transport = "stream", "transport bound");
        true
    }

    /// Park a long-poll request on this channel.
    ///
    /// A client message in the poll body is queued inbound. A close request
    /// is acknowledged at once and leaves the channel unbound. A waiter that
    /// finds events already queued is answered immediately.
    pub fn handle_long_polling(
        &self,
        request: &IncomingRequest,
        poll: PollRequest,
        waiter: PollWaiter,
        require_secure_match: bool,
        decoder: &dyn CookieDecoder,
    ) -> bool {
        if !self.admits(request, require_secure_match, decoder) {
            return false;
        }
        let mut state = self.state.lock();
        if let Some(message) = poll.message {
            state.push_inbound(message);
        }
        if poll.close_channel {
            if state.transport.kind() == TransportKind::Polling {
                std::mem::take(&mut state.transport).release("Channel closed by client");
            }
            drop(state);
            let _ = waiter.answer(PollBatch::closed());
            debug!(channel_id = %self.identity.id, "long poll closed the channel");
            return true;
        }
        state.ensure_open();
        state.bind(Transport::Poll(waiter));
        if !state.queue.is_empty() {
            let _ = self.send_locked(&mut state);
        }
        true
    }

    /// Send queued events over the bound transport. Returns how many events
    /// left the queue.
    pub fn send_channel(&self) -> usize {
        let mut state = self.state.lock();
        if state.queue.is_empty() && link_dead(&state.transport) {
            debug!(channel_id = %self.identity.id, "client went away, unbinding");
            state.unbind_failed();
            return 0;
        }
        self.send_locked(&mut state)
    }

    fn send_locked(&self, state: &mut ChannelState) -> usize {
        if state.queue.is_empty() {
            return 0;
        }
        match state.transport.kind() {
            TransportKind::NotConnected => {
                debug!(
                    channel_id = %self.identity.id,
                    queued = state.queue.len(),
                    "no transport bound"
                );
                0
            }
            TransportKind::Polling => self.send_to_poll(state),
            TransportKind::Socket | TransportKind::Stream => self.send_to_link(state),
        }
    }

    fn send_to_poll(&self, state: &mut ChannelState) -> usize {
        let Transport::Poll(waiter) = std::mem::take(&mut state.transport) else {
            return 0;
        };
        if waiter.is_dead() {
            debug!(channel_id = %self.identity.id, "long poll abandoned");
            return 0;
        }
        let fingerprint = waiter.fingerprint();
        let removed = state.queue.len();
        let events: Vec<OutboundEvent> = state
            .queue
            .drain(..)
            .filter(|e| e.is_for(fingerprint))
            .collect();
        state.ensure_open();
        let delivered = events.len();
        match waiter.answer(PollBatch {
            events,
            channel_closed: false,
        }) {
            Ok(()) => {
                counter!("eventhub_events_sent_total", "transport" => "polling")
                    .increment(delivered as u64);
                removed
            }
            Err(batch) => {
                warn!(channel_id = %self.identity.id, "long poll went away before the answer");
                for event in batch.events.into_iter().rev() {
                    state.queue.push_front(event);
                }
                0
            }
        }
    }

    fn send_to_link(&self, state: &mut ChannelState) -> usize {
        let kind = state.transport.kind();
        let (fingerprint, mut failed) = match &state.transport {
            Transport::Socket(link) => {
                if !link.is_dead() && !link.is_open() {
                    return 0;
                }
                (link.fingerprint(), link.is_dead())
            }
            Transport::Stream(link) => (link.fingerprint(), link.is_dead()),
            Transport::None | Transport::Poll(_) => return 0,
        };
        let mut removed = 0;
        let mut delivered = 0u64;
        while !failed {
            let Some(event) = state.queue.front() else {
                break;
            };
            if !event.is_for(fingerprint) {
                let _ = state.queue.pop_front();
                removed += 1;
                continue;
            }
            match link_send(&state.transport, event) {
                Ok(()) => {
                    let _ = state.queue.pop_front();
                    removed += 1;
                    delivered += 1;
                }
                Err(TransportError::Full) => break,
                Err(TransportError::Closed) => failed = true,
            }
        }
        if delivered > 0 {
            state.ensure_open();
            counter!("eventhub_events_sent_total", "transport" => kind.as_str())
                .increment(delivered);
        }
        if failed {
            warn!(channel_id = %self.identity.id, transport = %kind, "transport closed, unbinding");
            state.unbind_failed();
        }
        removed
    }

    /// Hand inbound events to the application handler. Returns how many were
    /// delivered. Without a handler the inbound queue is kept.
    pub fn receiving(&self) -> usize {
        let (handler, info, events) = {
            let mut state = self.state.lock();
            let frames = match &mut state.transport {
                Transport::Socket(link) => link.drain_inbound(),
                _ => Vec::new(),
            };
            for frame in frames {
                state.push_inbound(frame);
            }
            let Some(handler) = state.handler.clone() else {
                return 0;
            };
            if state.inbound.is_empty() {
                return 0;
            }
            let events: Vec<InboundEvent> = state.inbound.drain(..).collect();
            (handler, self.info(state.policy), events)
        };
        let count = events.len();
        for event in events {
            handler.on_event(&info, event);
        }
        count
    }

    /// Send what can be sent; true when nothing is left queued.
    pub fn flush_channel(&self) -> bool {
        let mut state = self.state.lock();
        let _ = self.send_locked(&mut state);
        state.queue.is_empty()
    }

    /// Replace the policy and handler. `NoPolicy` is refused.
    pub fn change_event_policy(
        &self,
        policy: ChannelPolicy,
        handler: Option<Arc<dyn ChannelHandler>>,
    ) -> bool {
        if !policy.is_known() {
            return false;
        }
        let mut state = self.state.lock();
        state.policy = policy;
        state.handler = handler;
        true
    }

    /// Stop handing events to the application.
    pub fn detach_handler(&self) {
        self.state.lock().handler = None;
    }

    /// Ask the handler whether the channel is still valid.
    pub fn check_channel_policy(&self) -> bool {
        let (handler, policy) = {
            let state = self.state.lock();
            (state.handler.clone(), state.policy)
        };
        handler.is_none_or(|h| h.check_policy(&self.info(policy)))
    }

    /// Close the channel: tell the application once, release the transport
    /// and drop everything queued.
    pub fn close_channel(&self) {
        let notify = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.transport).release(CHANNEL_CLOSED);
            state.queue.clear();
            state.inbound.clear();
            if state.close_seen {
                None
            } else {
                state.close_seen = true;
                state.handler.clone().map(|h| (h, self.info(state.policy)))
            }
        };
        if let Some((handler, info)) = notify {
            handler.on_event(&info, InboundEvent::new(EventKind::Close, CHANNEL_CLOSED));
        }
        info!(channel_id = %self.identity.id, session = %self.identity.session_name, "channel closed");
    }

    /// Whether the scheduler has work for this channel.
    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        let socket_frames = matches!(&state.transport, Transport::Socket(l) if l.has_inbound());
        !state.queue.is_empty()
            || socket_frames
            || link_dead(&state.transport)
            || (!state.inbound.is_empty() && state.handler.is_some())
    }

    /// Events waiting for delivery.
    pub fn queue_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Inbound events waiting for the handler.
    pub fn inbound_count(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Connected clients: 1 for an open socket or a live stream, else 0.
    pub fn client_count(&self) -> usize {
        match &self.state.lock().transport {
            Transport::Socket(link) if link.is_open() => 1,
            Transport::Stream(link) if !link.is_dead() => 1,
            _ => 0,
        }
    }

    /// Kind of the bound transport.
    pub fn transport_kind(&self) -> TransportKind {
        self.state.lock().transport.kind()
    }
}
