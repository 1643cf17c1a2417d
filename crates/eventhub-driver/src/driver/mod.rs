//! The event driver: channel registry, posting API and scheduler.
//!
//! Channels are owned by one map keyed by id; the session-name and cookie
//! indices hold ids only and all three change together under the registry
//! lock. Lock order is registry, then channel.

mod binding;
mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use eventhub_core::{
    BruteForceGuard, ChannelAuthenticator, ChannelHandler, ChannelId, ChannelPolicy,
    CookieDecoder, EventPost, PlainCookies,
};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use binding::{BindStrategy, POLLING_MARKER, SOCKETS_MARKER, STREAMS_MARKER};
pub use scheduler::{
    MONITOR_END_LOOPS, MONITOR_END_WAIT, MONITOR_INTERVAL_MAX, MONITOR_INTERVAL_MIN,
    SchedulerState,
};

use crate::channel::{ChannelIdentity, EventChannel};

/// Everything the application supplies when registering a channel.
#[derive(Clone)]
pub struct ChannelRegistration {
    /// Session name, used for URL routing.
    pub session_name: String,
    /// Name of the authenticating cookie.
    pub cookie_name: String,
    /// Expected decoded cookie value.
    pub token: String,
    /// Decryption context for the cookie value.
    pub metadata: String,
    /// Initial policy.
    pub policy: ChannelPolicy,
    /// Receiver of inbound events.
    pub handler: Option<Arc<dyn ChannelHandler>>,
}

impl ChannelRegistration {
    /// Registration with default policy, no metadata and no handler.
    pub fn new(
        session_name: impl Into<String>,
        cookie_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            session_name: session_name.into(),
            cookie_name: cookie_name.into(),
            token: token.into(),
            metadata: String::new(),
            policy: ChannelPolicy::default(),
            handler: None,
        }
    }

    /// Set the cookie decryption context.
    #[must_use]
    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Set the initial policy.
    #[must_use]
    pub fn policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach the application handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn ChannelHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

/// Selects a channel by id or by session name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelSelector<'a> {
    /// Channel id.
    Id(ChannelId),
    /// Session name.
    Session(&'a str),
}

impl From<ChannelId> for ChannelSelector<'_> {
    fn from(id: ChannelId) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for ChannelSelector<'a> {
    fn from(name: &'a str) -> Self {
        Self::Session(name)
    }
}

fn cookie_key(cookie_name: &str, token: &str) -> String {
    format!("{cookie_name}:{token}").to_lowercase()
}

#[derive(Default)]
struct Registry {
    channels: HashMap<ChannelId, Arc<EventChannel>>,
    by_name: HashMap<String, ChannelId>,
    by_cookie: HashMap<String, ChannelId>,
    /// Cookie name (lowercase) to decryption contexts in use, refcounted.
    cookie_contexts: HashMap<String, HashMap<String, usize>>,
    next_id: u64,
    guard: BruteForceGuard,
}

impl Registry {
    fn remove(&mut self, id: ChannelId) -> Option<Arc<EventChannel>> {
        let channel = self.channels.remove(&id)?;
        let identity = channel.identity();
        if self.by_name.get(&identity.session_name) == Some(&id) {
            let _ = self.by_name.remove(&identity.session_name);
        }
        let _ = self
            .by_cookie
            .remove(&cookie_key(&identity.cookie_name, &identity.token));
        let cookie = identity.cookie_name.to_lowercase();
        if let Some(contexts) = self.cookie_contexts.get_mut(&cookie) {
            if let Some(count) = contexts.get_mut(&identity.metadata) {
                *count -= 1;
                if *count == 0 {
                    let _ = contexts.remove(&identity.metadata);
                }
            }
            if contexts.is_empty() {
                let _ = self.cookie_contexts.remove(&cookie);
            }
        }
        Some(channel)
    }

    fn select(&self, selector: ChannelSelector<'_>) -> Option<Arc<EventChannel>> {
        let id = match selector {
            ChannelSelector::Id(id) => id,
            ChannelSelector::Session(name) => *self.by_name.get(name)?,
        };
        self.channels.get(&id).cloned()
    }
}

/// Server-side event hub.
///
/// Share it as `Arc<EventDriver>`; every method takes `&self` and none of
/// them block.
pub struct EventDriver {
    registry: Mutex<Registry>,
    wake: Notify,
    scheduler: Mutex<SchedulerState>,
    task: Mutex<Option<JoinHandle<()>>>,
    interval_ms: AtomicU64,
    authenticator: RwLock<Option<Arc<dyn ChannelAuthenticator>>>,
    decoder: RwLock<Arc<dyn CookieDecoder>>,
    force_authentication: AtomicBool,
    cookie_timeout: AtomicU32,
}

impl Default for EventDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDriver {
    /// Create a stopped driver with no channels.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            wake: Notify::new(),
            scheduler: Mutex::new(SchedulerState::Stopped),
            task: Mutex::new(None),
            interval_ms: AtomicU64::new(duration_ms(MONITOR_INTERVAL_MIN)),
            authenticator: RwLock::new(None),
            decoder: RwLock::new(Arc::new(PlainCookies)),
            force_authentication: AtomicBool::new(false),
            cookie_timeout: AtomicU32::new(0),
        }
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Register a channel. `None` when `(cookie_name, token)` is taken.
    pub fn register_channel(&self, registration: ChannelRegistration) -> Option<ChannelId> {
        let ChannelRegistration {
            session_name,
            cookie_name,
            token,
            metadata,
            policy,
            handler,
        } = registration;
        let key = cookie_key(&cookie_name, &token);

        let mut registry = self.registry.lock();
        if registry.by_cookie.contains_key(&key) {
            warn!(session = %session_name, cookie = %cookie_name, "duplicate channel registration");
            return None;
        }
        registry.next_id += 1;
        let id = ChannelId::new(registry.next_id);

        let _ = registry
            .by_name
            .entry(session_name.clone())
            .or_insert(id);
        let _ = registry.by_cookie.insert(key, id);
        *registry
            .cookie_contexts
            .entry(cookie_name.to_lowercase())
            .or_default()
            .entry(metadata.clone())
            .or_insert(0) += 1;

        let identity = ChannelIdentity {
            id,
            session_name,
            cookie_name,
            token,
            metadata,
        };
        info!(channel_id = %id, session = %identity.session_name, policy = %policy, "channel registered");
        let channel = Arc::new(EventChannel::new(identity, policy, handler));
        let _ = registry.channels.insert(id, channel);
        gauge!("eventhub_channels_active").increment(1.0);
        Some(id)
    }

    /// Remove a channel. With `flush`, a channel that still has undelivered
    /// events stays registered and `false` is returned.
    pub fn unregister_channel(&self, id: ChannelId, flush: bool) -> bool {
        let Some(channel) = self.find_channel(id) else {
            return false;
        };
        if flush && !channel.flush_channel() {
            debug!(channel_id = %id, queued = channel.queue_count(), "unregister postponed, queue not empty");
            return false;
        }
        let removed = self.registry.lock().remove(id);
        match removed {
            Some(channel) => {
                gauge!("eventhub_channels_active").decrement(1.0);
                channel.close_channel();
                info!(channel_id = %id, "channel unregistered");
                true
            }
            None => false,
        }
    }

    /// [`Self::unregister_channel`] by cookie name and token.
    pub fn unregister_by_cookie(&self, cookie_name: &str, token: &str, flush: bool) -> bool {
        self.find_by_cookie(cookie_name, token)
            .is_some_and(|channel| self.unregister_channel(channel.id(), flush))
    }

    /// Drop every channel without telling the application: handlers are
    /// detached first, then each channel is closed. Ids restart at 1.
    /// Returns how many channels were removed.
    pub fn reset(&self) -> usize {
        let channels: Vec<Arc<EventChannel>> = {
            let mut registry = self.registry.lock();
            registry.by_name.clear();
            registry.by_cookie.clear();
            registry.cookie_contexts.clear();
            registry.next_id = 0;
            registry.channels.drain().map(|(_, channel)| channel).collect()
        };
        for channel in &channels {
            channel.detach_handler();
            channel.close_channel();
        }
        gauge!("eventhub_channels_active").set(0.0);
        info!(channels = channels.len(), "event driver reset");
        channels.len()
    }

    // ── Posting ─────────────────────────────────────────────────────────

    /// Queue an event and wake the scheduler. Returns the sequence number,
    /// or `None` for an unknown channel or a stopping driver.
    pub fn post_event(&self, id: ChannelId, post: EventPost) -> Option<u64> {
        if self.scheduler_state() == SchedulerState::Stopping {
            debug!(channel_id = %id, "post refused, driver stopping");
            return None;
        }
        let channel = self.find_channel(id)?;
        let number = channel.post_event(post);
        counter!("eventhub_events_posted_total").increment(1);
        self.wake.notify_one();
        Some(number)
    }

    /// Wake the scheduler after inbound frames arrived.
    pub fn incoming_event(&self) {
        self.wake.notify_one();
    }

    // ── Per-channel operations ──────────────────────────────────────────

    /// Change a channel's policy and handler.
    pub fn set_channel_policy(
        &self,
        id: ChannelId,
        policy: ChannelPolicy,
        handler: Option<Arc<dyn ChannelHandler>>,
    ) -> bool {
        self.find_channel(id)
            .is_some_and(|channel| channel.change_event_policy(policy, handler))
    }

    /// Ask the channel's handler whether the channel is still valid.
    /// Unknown channels are invalid.
    pub fn check_channel_policy(&self, id: ChannelId) -> bool {
        self.find_channel(id)
            .is_some_and(|channel| channel.check_channel_policy())
    }

    /// Send what can be sent now; true when the queue drained.
    pub fn flush_channel(&self, id: ChannelId) -> bool {
        self.find_channel(id)
            .is_some_and(|channel| channel.flush_channel())
    }

    /// [`Self::flush_channel`] by cookie name and token.
    pub fn flush_by_cookie(&self, cookie_name: &str, token: &str) -> bool {
        self.find_by_cookie(cookie_name, token)
            .is_some_and(|channel| channel.flush_channel())
    }

    /// Undelivered events of a channel.
    pub fn channel_queue_count<'a>(&self, channel: impl Into<ChannelSelector<'a>>) -> Option<usize> {
        self.registry
            .lock()
            .select(channel.into())
            .map(|channel| channel.queue_count())
    }

    /// Connected clients of a channel (0 when unknown).
    pub fn channel_client_count<'a>(&self, channel: impl Into<ChannelSelector<'a>>) -> usize {
        self.registry
            .lock()
            .select(channel.into())
            .map_or(0, |channel| channel.client_count())
    }

    /// Registered channels.
    pub fn channel_count(&self) -> usize {
        self.registry.lock().channels.len()
    }

    // ── Lookups ─────────────────────────────────────────────────────────

    /// Channel by id.
    pub fn find_channel(&self, id: ChannelId) -> Option<Arc<EventChannel>> {
        self.registry.lock().channels.get(&id).cloned()
    }

    /// Channel by session name.
    pub fn find_by_session(&self, session_name: &str) -> Option<Arc<EventChannel>> {
        self.registry
            .lock()
            .select(ChannelSelector::Session(session_name))
    }

    /// Channel by cookie name and (decoded) token.
    pub fn find_by_cookie(&self, cookie_name: &str, token: &str) -> Option<Arc<EventChannel>> {
        let registry = self.registry.lock();
        let id = registry.by_cookie.get(&cookie_key(cookie_name, token))?;
        registry.channels.get(id).cloned()
    }

    // ── Configuration ───────────────────────────────────────────────────

    /// Require a matching cookie for channels found by URL routing.
    pub fn set_force_authentication(&self, force: bool) {
        self.force_authentication.store(force, Ordering::Relaxed);
    }

    /// Whether routed connections must carry a matching cookie.
    pub fn force_authentication(&self) -> bool {
        self.force_authentication.load(Ordering::Relaxed)
    }

    /// Set the brute-force interval in seconds; refused outside 3..=60.
    pub fn set_brute_force_interval(&self, secs: u64) -> bool {
        self.registry.lock().guard.set_interval_secs(secs)
    }

    /// Current brute-force interval.
    pub fn brute_force_interval(&self) -> Duration {
        self.registry.lock().guard.interval()
    }

    /// Cookie lifetime in minutes refreshed on each answer; 0 disables.
    pub fn set_cookie_timeout(&self, minutes: u32) {
        self.cookie_timeout.store(minutes, Ordering::Relaxed);
    }

    /// Cookie lifetime in minutes.
    pub fn cookie_timeout(&self) -> u32 {
        self.cookie_timeout.load(Ordering::Relaxed)
    }

    /// Install the trusted authentication callback.
    pub fn set_authenticator(&self, authenticator: Arc<dyn ChannelAuthenticator>) {
        *self.authenticator.write() = Some(authenticator);
    }

    /// Install the cookie decoder (plain values by default).
    pub fn set_cookie_decoder(&self, decoder: Arc<dyn CookieDecoder>) {
        *self.decoder.write() = decoder;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
