//! Background scheduler task.
//!
//! One task per driver wakes on a post or inbound signal, or when its
//! interval elapses. The interval shrinks to the minimum after a pass that
//! moved events and doubles after an idle pass.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{EventDriver, duration_ms};
use crate::channel::EventChannel;

/// Shortest scheduler interval.
pub const MONITOR_INTERVAL_MIN: Duration = Duration::from_millis(500);
/// Longest scheduler interval.
pub const MONITOR_INTERVAL_MAX: Duration = Duration::from_secs(10);
/// Polls made by [`EventDriver::stop`] while waiting for the task.
pub const MONITOR_END_LOOPS: u32 = 100;
/// Wait between those polls.
pub const MONITOR_END_WAIT: Duration = Duration::from_millis(100);

/// Lifecycle of the scheduler task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// No task running.
    Stopped,
    /// Task running.
    Running,
    /// Stop requested; the task exits after its current pass.
    Stopping,
}

impl SchedulerState {
    /// Short label for health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl EventDriver {
    /// Spawn the scheduler task. Starting a running driver is a no-op;
    /// starting a stopping driver is refused.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.scheduler.lock();
        match *state {
            SchedulerState::Running => return true,
            SchedulerState::Stopping => return false,
            SchedulerState::Stopped => {}
        }
        *state = SchedulerState::Running;
        drop(state);

        self.interval_ms
            .store(duration_ms(MONITOR_INTERVAL_MIN), Ordering::Relaxed);
        let driver = Arc::clone(self);
        let handle = tokio::spawn(async move { driver.run_scheduler().await });
        *self.task.lock() = Some(handle);
        info!("event driver started");
        true
    }

    /// Ask the scheduler to finish and wait for it, polling up to
    /// [`MONITOR_END_LOOPS`] times. Returns whether it stopped.
    pub async fn stop(&self) -> bool {
        {
            let mut state = self.scheduler.lock();
            if *state == SchedulerState::Stopped {
                return true;
            }
            *state = SchedulerState::Stopping;
        }
        self.wake.notify_one();

        for _ in 0..MONITOR_END_LOOPS {
            let finished = self
                .task
                .lock()
                .as_ref()
                .is_none_or(tokio::task::JoinHandle::is_finished);
            if finished {
                let _ = self.task.lock().take();
                *self.scheduler.lock() = SchedulerState::Stopped;
                info!("event driver stopped");
                return true;
            }
            tokio::time::sleep(MONITOR_END_WAIT).await;
        }
        warn!("event driver did not stop in time");
        false
    }

    /// Whether the scheduler is running.
    pub fn is_active(&self) -> bool {
        self.scheduler_state() == SchedulerState::Running
    }

    /// Current lifecycle state.
    pub fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler.lock()
    }

    /// Current wake interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    async fn run_scheduler(self: Arc<Self>) {
        debug!("scheduler loop entered");
        loop {
            let interval = self.interval();
            tokio::select! {
                () = self.wake.notified() => {}
                () = tokio::time::sleep(interval) => {}
            }
            let stopping = self.scheduler_state() == SchedulerState::Stopping;

            let started = Instant::now();
            let activity = self.send_channels();
            histogram!("eventhub_scheduler_pass_seconds").record(started.elapsed().as_secs_f64());
            self.recalculate_interval(activity);

            if stopping {
                break;
            }
        }
        debug!("scheduler loop left");
    }

    /// One scheduler pass: send on every channel with pending work, then
    /// receive on each. Returns the activity (events sent plus received).
    pub fn send_channels(&self) -> usize {
        let pending: Vec<Arc<EventChannel>> = {
            let mut registry = self.registry.lock();
            let _ = registry.guard.sweep();
            registry
                .channels
                .values()
                .filter(|channel| channel.has_pending())
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for channel in &pending {
            match catch_unwind(AssertUnwindSafe(|| channel.send_channel())) {
                Ok(count) => sent += count,
                Err(_) => error!(channel_id = %channel.id(), "sending on channel panicked"),
            }
        }
        let mut received = 0;
        for channel in &pending {
            match catch_unwind(AssertUnwindSafe(|| channel.receiving())) {
                Ok(count) => received += count,
                Err(_) => error!(channel_id = %channel.id(), "channel handler panicked"),
            }
        }
        counter!("eventhub_events_received_total").increment(received as u64);
        debug!(channels = pending.len(), sent, received, "scheduler pass");
        sent + received
    }

    /// Adapt the interval to the last pass: any activity resets it to the
    /// minimum, an idle pass doubles it up to the maximum.
    pub fn recalculate_interval(&self, activity: usize) {
        let next = if activity > 0 {
            MONITOR_INTERVAL_MIN
        } else {
            (self.interval() * 2).min(MONITOR_INTERVAL_MAX)
        };
        self.interval_ms.store(duration_ms(next), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use eventhub_core::{
        ChannelHandler, ChannelInfo, EventKind, EventPost, InboundEvent, IncomingRequest,
        SenderFingerprint, StreamLink,
    };
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::ChannelRegistration;

    #[test]
    fn idle_interval_doubles_to_max() {
        let driver = EventDriver::new();
        assert_eq!(driver.interval(), MONITOR_INTERVAL_MIN);
        let mut seen = vec![driver.interval()];
        for _ in 0..6 {
            driver.recalculate_interval(0);
            seen.push(driver.interval());
        }
        assert_eq!(
            seen,
            [500, 1000, 2000, 4000, 8000, 10_000, 10_000].map(Duration::from_millis)
        );
        driver.recalculate_interval(3);
        assert_eq!(driver.interval(), MONITOR_INTERVAL_MIN);
    }

    #[test]
    fn pass_without_work_is_idle() {
        let driver = EventDriver::new();
        let _ = driver.register_channel(ChannelRegistration::new("a", "sid", "t"));
        assert_eq!(driver.send_channels(), 0);
    }

    #[test]
    fn panicking_handler_does_not_starve_others() {
        struct Boom;
        impl ChannelHandler for Boom {
            fn on_event(&self, _channel: &ChannelInfo, _event: InboundEvent) {
                panic!("handler failure");
            }
        }
        #[derive(Default)]
        struct Count(Mutex<usize>);
        impl ChannelHandler for Count {
            fn on_event(&self, _channel: &ChannelInfo, _event: InboundEvent) {
                *self.0.lock() += 1;
            }
        }

        let driver = EventDriver::new();
        let counter = Arc::new(Count::default());
        let mut receivers = Vec::new();
        for (name, token, handler) in [
            ("bad", "t1", Arc::new(Boom) as Arc<dyn ChannelHandler>),
            ("good", "t2", counter.clone() as Arc<dyn ChannelHandler>),
        ] {
            let _ = driver
                .register_channel(ChannelRegistration::new(name, "sid", token).handler(handler))
                .unwrap();
            let request = IncomingRequest::new(format!("/eventhub/Events/{name}"), "10.0.0.1")
                .with_desktop(name);
            let (tx, rx) = mpsc::channel(4);
            receivers.push(rx);
            let link = StreamLink::new(SenderFingerprint::of("10.0.0.1"), tx);
            assert!(driver.incoming_new_stream(&request, link).is_ok());
        }
        let _ = driver.send_channels();
        assert_eq!(*counter.0.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop() {
        let driver = Arc::new(EventDriver::new());
        assert!(!driver.is_active());
        assert!(driver.start());
        assert!(driver.start());
        assert!(driver.is_active());
        assert!(driver.stop().await);
        assert_eq!(driver.scheduler_state(), SchedulerState::Stopped);
        assert!(driver.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_delivers_posted_events() {
        let driver = Arc::new(EventDriver::new());
        let id = driver
            .register_channel(ChannelRegistration::new("chat", "sid", "tok1"))
            .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let request = IncomingRequest::new("/eventhub/Events/chat", "10.0.0.1");
        let link = StreamLink::new(SenderFingerprint::of("10.0.0.1"), tx);
        assert_eq!(driver.incoming_new_stream(&request, link), Ok(id));
        assert!(driver.start());

        for p in ["one", "two"] {
            let _ = driver.post_event(id, EventPost::new(p).kind(EventKind::Message));
        }
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.data.as_str(), second.data.as_str()), ("one", "two"));
        assert_eq!(driver.channel_queue_count(id), Some(0));
        assert!(driver.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn posting_while_stopping_is_refused() {
        let driver = Arc::new(EventDriver::new());
        let id = driver
            .register_channel(ChannelRegistration::new("chat", "sid", "tok1"))
            .unwrap();
        *driver.scheduler.lock() = SchedulerState::Stopping;
        assert!(driver.post_event(id, EventPost::new("late")).is_none());
        *driver.scheduler.lock() = SchedulerState::Stopped;
        assert_eq!(driver.post_event(id, EventPost::new("queued")), Some(1));
    }
}
