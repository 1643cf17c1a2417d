//! End-to-end delivery through the public driver API.

use std::sync::Arc;
use std::time::Duration;

use eventhub_core::{
    ChannelId, EventPost, IncomingRequest, PollBatch, PollRequest, PollWaiter, SenderFingerprint,
    StreamLink, StreamMessage, TransportKind,
};
use eventhub_driver::{ChannelRegistration, EventDriver};
use proptest::prelude::*;
use tokio::sync::{mpsc, oneshot};

const CLIENT: &str = "10.0.0.1";

fn stream(
    driver: &EventDriver,
    session: &str,
    capacity: usize,
) -> (ChannelId, mpsc::Receiver<StreamMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    let request = IncomingRequest::new(format!("/eventhub/Events/{session}"), CLIENT);
    let id = driver
        .incoming_new_stream(&request, StreamLink::new(SenderFingerprint::of(CLIENT), tx))
        .unwrap();
    (id, rx)
}

fn poll(driver: &EventDriver, cookie: &str) -> oneshot::Receiver<PollBatch> {
    let (tx, rx) = oneshot::channel();
    let request = IncomingRequest::new("/eventhub/Polling", CLIENT).with_cookie("sid", cookie);
    let waiter = PollWaiter::new(SenderFingerprint::of(CLIENT), tx);
    let _ = driver
        .incoming_long_poll(&request, PollRequest::default(), waiter)
        .unwrap();
    rx
}

#[tokio::test(start_paused = true)]
async fn poll_receives_posted_event_then_parks() {
    let driver = Arc::new(EventDriver::new());
    let id = driver
        .register_channel(ChannelRegistration::new("chat", "sid", "tok1"))
        .unwrap();
    assert!(driver.start());

    assert_eq!(driver.post_event(id, EventPost::new("hello")), Some(1));
    let batch = poll(&driver, "tok1").await.unwrap();
    let payloads: Vec<_> = batch.events.iter().map(|e| e.payload.as_str()).collect();
    assert_eq!(payloads, ["hello"]);
    let channel = driver.find_channel(id).unwrap();
    assert_eq!(channel.transport_kind(), TransportKind::NotConnected);

    let second = poll(&driver, "tok1");
    assert_eq!(channel.transport_kind(), TransportKind::Polling);
    let answer = tokio::time::timeout(Duration::from_secs(30), second).await;
    assert!(answer.is_err(), "nothing posted, the poll stays parked");

    assert!(driver.stop().await);
}

#[tokio::test(start_paused = true)]
async fn parked_poll_is_answered_by_the_scheduler() {
    let driver = Arc::new(EventDriver::new());
    let id = driver
        .register_channel(ChannelRegistration::new("chat", "sid", "tok1"))
        .unwrap();
    assert!(driver.start());

    let pending = poll(&driver, "tok1");
    let _ = driver.post_event(id, EventPost::new("late"));
    let batch = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.events[0].payload, "late");
    assert!(driver.stop().await);
}

#[test]
fn flushed_unregister_removes_every_lookup() {
    let driver = EventDriver::new();
    let id = driver
        .register_channel(ChannelRegistration::new("chat", "sid", "tok1"))
        .unwrap();
    let (_, mut rx) = stream(&driver, "chat", 4);
    let _ = driver.post_event(id, EventPost::new("bye"));

    assert!(driver.unregister_channel(id, true));
    assert_eq!(rx.try_recv().unwrap().data, "bye");
    assert!(driver.find_channel(id).is_none());
    assert!(driver.find_by_session("chat").is_none());
    assert!(driver.find_by_cookie("sid", "tok1").is_none());
    assert_eq!(driver.channel_queue_count(id), None);
    assert_eq!(driver.channel_count(), 0);
}

proptest! {
    #[test]
    fn events_leave_in_post_order(payloads in proptest::collection::vec("[a-z]{1,8}", 1..40)) {
        let driver = EventDriver::new();
        let id = driver
            .register_channel(ChannelRegistration::new("fifo", "sid", "t"))
            .unwrap();
        let (_, mut rx) = stream(&driver, "fifo", payloads.len());
        for p in &payloads {
            let _ = driver.post_event(id, EventPost::new(p.clone()));
        }
        let channel = driver.find_channel(id).unwrap();
        prop_assert_eq!(channel.send_channel(), payloads.len());

        let mut received = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            received.push(msg.data);
        }
        prop_assert_eq!(received, payloads);
    }

    #[test]
    fn queue_count_is_posted_minus_delivered(posted in 1usize..30, capacity in 1usize..30) {
        let driver = EventDriver::new();
        let id = driver
            .register_channel(ChannelRegistration::new("count", "sid", "t"))
            .unwrap();
        let (_, _rx) = stream(&driver, "count", capacity);
        for i in 0..posted {
            let _ = driver.post_event(id, EventPost::new(i.to_string()));
        }
        let sent = driver.find_channel(id).unwrap().send_channel();
        prop_assert_eq!(sent, posted.min(capacity));
        prop_assert_eq!(driver.channel_queue_count(id), Some(posted - sent));
    }
}
