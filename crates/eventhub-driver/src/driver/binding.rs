//! Binding an incoming physical connection to a registered channel.
//!
//! Strategies are tried in order: the trusted authenticator, the channel
//! cookie, then the session name routed in the URL. No channel is ever
//! created on the fly.

use std::fmt;
use std::sync::Arc;

use eventhub_core::{
    ChannelId, IncomingRequest, PollRequest, PollWaiter, SenderFingerprint, SocketLink,
    StreamLink,
};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{EventDriver, SchedulerState, cookie_key};
use crate::channel::EventChannel;
use crate::error::BindError;

/// URL marker preceding the session name of a WebSocket request.
pub const SOCKETS_MARKER: &str = "Sockets";
/// URL marker preceding the session name of an SSE request.
pub const STREAMS_MARKER: &str = "Events";
/// URL marker preceding the session name of a long-poll request.
pub const POLLING_MARKER: &str = "Polling";

/// Strategy that found the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindStrategy {
    /// The application authenticator.
    Authenticator,
    /// A request cookie decoding to a registered token.
    Cookie,
    /// The session name in the URL.
    Routing,
}

impl BindStrategy {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticator => "authenticator",
            Self::Cookie => "cookie",
            Self::Routing => "routing",
        }
    }
}

impl fmt::Display for BindStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Resolved {
    channel: Arc<EventChannel>,
    require_secure_match: bool,
    strategy: BindStrategy,
}

impl EventDriver {
    /// Bind a WebSocket. On success the adapter may complete the upgrade.
    #[instrument(skip_all, fields(path = %request.path))]
    pub fn incoming_new_socket(
        &self,
        request: &IncomingRequest,
        link: SocketLink,
    ) -> Result<ChannelId, BindError> {
        let outcome = self.resolve(request, SOCKETS_MARKER).and_then(|resolved| {
            self.check_brute_force(request)?;
            let decoder = self.decoder.read().clone();
            let channel = &resolved.channel;
            if channel.register_new_socket(
                request,
                link,
                resolved.require_secure_match,
                decoder.as_ref(),
            ) {
                Ok((channel.id(), resolved.strategy))
            } else {
                Err(BindError::Unauthenticated(channel.id()))
            }
        });
        self.finish_bind("socket", outcome)
    }

    /// Bind an SSE stream.
    #[instrument(skip_all, fields(path = %request.path))]
    pub fn incoming_new_stream(
        &self,
        request: &IncomingRequest,
        link: StreamLink,
    ) -> Result<ChannelId, BindError> {
        let outcome = self.resolve(request, STREAMS_MARKER).and_then(|resolved| {
            self.check_brute_force(request)?;
            let decoder = self.decoder.read().clone();
            let channel = &resolved.channel;
            if channel.register_new_stream(
                request,
                link,
                resolved.require_secure_match,
                decoder.as_ref(),
            ) {
                Ok((channel.id(), resolved.strategy))
            } else {
                Err(BindError::Unauthenticated(channel.id()))
            }
        });
        self.finish_bind("stream", outcome)
    }

    /// Park a long-poll request on its channel.
    #[instrument(skip_all, fields(path = %request.path))]
    pub fn incoming_long_poll(
        &self,
        request: &IncomingRequest,
        poll: PollRequest,
        waiter: PollWaiter,
    ) -> Result<ChannelId, BindError> {
        let outcome = self.resolve(request, POLLING_MARKER).and_then(|resolved| {
            let decoder = self.decoder.read().clone();
            let channel = &resolved.channel;
            if channel.handle_long_polling(
                request,
                poll,
                waiter,
                resolved.require_secure_match,
                decoder.as_ref(),
            ) {
                Ok((channel.id(), resolved.strategy))
            } else {
                Err(BindError::Unauthenticated(channel.id()))
            }
        });
        self.finish_bind("polling", outcome)
    }

    fn finish_bind(
        &self,
        transport: &'static str,
        outcome: Result<(ChannelId, BindStrategy), BindError>,
    ) -> Result<ChannelId, BindError> {
        match outcome {
            Ok((id, strategy)) => {
                counter!("eventhub_bind_total", "transport" => transport, "strategy" => strategy.as_str())
                    .increment(1);
                debug!(channel_id = %id, transport, strategy = %strategy, "connection bound");
                self.wake.notify_one();
                Ok(id)
            }
            Err(err) => {
                counter!("eventhub_bind_rejected_total", "transport" => transport, "reason" => err.reason())
                    .increment(1);
                warn!(transport, error = %err, "connection refused");
                Err(err)
            }
        }
    }

    fn resolve(&self, request: &IncomingRequest, marker: &str) -> Result<Resolved, BindError> {
        if self.scheduler_state() == SchedulerState::Stopping {
            return Err(BindError::Stopping);
        }
        let routed = request.routed_session(marker);

        let authenticator = self.authenticator.read().clone();
        if let Some(authenticator) = authenticator {
            match authenticator.authenticate(request, routed.as_deref()) {
                Ok(Some(id)) => {
                    if let Some(channel) = self.find_channel(id) {
                        return Ok(Resolved {
                            channel,
                            require_secure_match: false,
                            strategy: BindStrategy::Authenticator,
                        });
                    }
                    debug!(channel_id = %id, "authenticator returned an unknown channel");
                }
                Ok(None) => {}
                Err(err) => return Err(BindError::Authentication(err)),
            }
        }

        if let Some(channel) = self.find_by_request_cookie(request) {
            return Ok(Resolved {
                channel,
                require_secure_match: false,
                strategy: BindStrategy::Cookie,
            });
        }

        if let Some(channel) = routed.as_deref().and_then(|name| self.find_by_session(name)) {
            return Ok(Resolved {
                channel,
                require_secure_match: self.force_authentication(),
                strategy: BindStrategy::Routing,
            });
        }
        Err(BindError::NotFound)
    }

    /// First channel whose cookie a request cookie decodes to, trying every
    /// decryption context registered for that cookie name.
    fn find_by_request_cookie(&self, request: &IncomingRequest) -> Option<Arc<EventChannel>> {
        let decoder = self.decoder.read().clone();
        let registry = self.registry.lock();
        for cookie in &request.cookies {
            let name = cookie.name.to_lowercase();
            let Some(contexts) = registry.cookie_contexts.get(&name) else {
                continue;
            };
            for metadata in contexts.keys() {
                let Some(token) = decoder.decode(&cookie.value, metadata) else {
                    continue;
                };
                let Some(channel) = registry
                    .by_cookie
                    .get(&cookie_key(&name, &token))
                    .and_then(|id| registry.channels.get(id))
                else {
                    continue;
                };
                if channel.identity().metadata == *metadata {
                    return Some(Arc::clone(channel));
                }
            }
        }
        None
    }

    fn check_brute_force(&self, request: &IncomingRequest) -> Result<(), BindError> {
        let sender = request.sender_identity();
        if self
            .registry
            .lock()
            .guard
            .check(SenderFingerprint::of(&sender))
        {
            warn!(sender = %sender, "brute force attack");
            return Err(BindError::BruteForce(sender));
        }
        Ok(())
    }
}
