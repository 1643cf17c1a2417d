//! Live-listener tests: real sockets against a served router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eventhub_core::{ChannelHandler, ChannelInfo, EventKind, EventPost, InboundEvent};
use eventhub_driver::{ChannelRegistration, EventDriver};
use eventhub_server::EventHubServer;
use eventhub_settings::ServerSettings;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

struct Forward(mpsc::UnboundedSender<InboundEvent>);

impl ChannelHandler for Forward {
    fn on_event(&self, _channel: &ChannelInfo, event: InboundEvent) {
        let _ = self.0.send(event);
    }
}

struct Harness {
    addr: SocketAddr,
    server: Arc<EventHubServer>,
    serving: JoinHandle<()>,
}

impl Harness {
    async fn start(settings: ServerSettings) -> Self {
        let driver = Arc::new(EventDriver::new());
        assert!(driver.start());
        let server = Arc::new(EventHubServer::new(settings, driver));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await.unwrap() })
        };
        Self {
            addr,
            server,
            serving,
        }
    }

    fn driver(&self) -> &Arc<EventDriver> {
        self.server.driver()
    }

    async fn stop(self) {
        assert!(self.driver().stop().await);
        let _ = self.driver().reset();
        self.server.shutdown().shutdown();
        tokio::time::timeout(WAIT, self.serving).await.unwrap().unwrap();
    }
}

/// Send a raw HTTP/1.1 request and read the whole response.
async fn http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn poll_request(cookie: &str, body: &str) -> String {
    format!(
        "POST /eventhub/Polling HTTP/1.1\r\nHost: localhost\r\nCookie: sid={cookie}\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn socket_receives_posted_event_and_reports_client_messages() {
    let harness = Harness::start(ServerSettings::default()).await;
    let (tx, mut inbound) = mpsc::unbounded_channel();
    let id = harness
        .driver()
        .register_channel(
            ChannelRegistration::new("room/42", "sid", "tok1").handler(Arc::new(Forward(tx))),
        )
        .unwrap();

    let url = format!("ws://{}/eventhub/Sockets/room/42", harness.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let _ = harness.driver().post_event(id, EventPost::new("hello"));
    let text = loop {
        let msg = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            break text.as_str().to_string();
        }
    };
    assert_eq!(text, "hello");

    ws.send(Message::text("from client")).await.unwrap();
    let open = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(open.kind, EventKind::Open);
    let event = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(event, InboundEvent::new(EventKind::Message, "from client"));

    ws.close(None).await.unwrap();
    let close = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(close.kind, EventKind::Close);

    harness.stop().await;
}

#[tokio::test]
async fn unknown_socket_session_is_refused() {
    let harness = Harness::start(ServerSettings::default()).await;
    let url = format!("ws://{}/eventhub/Sockets/missing", harness.addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
    harness.stop().await;
}

#[tokio::test]
async fn cookie_poll_receives_event() {
    let harness = Harness::start(ServerSettings::default()).await;
    let id = harness
        .driver()
        .register_channel(ChannelRegistration::new("chat", "sid", "tok1"))
        .unwrap();
    let _ = harness.driver().post_event(id, EventPost::new("hello"));

    let response = http(harness.addr, &poll_request("tok1", "")).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""payload":"hello""#), "{response}");

    let refused = http(harness.addr, &poll_request("wrong", "")).await;
    assert!(refused.starts_with("HTTP/1.1 403"), "{refused}");

    harness.stop().await;
}

#[tokio::test]
async fn idle_poll_is_answered_empty_after_timeout() {
    let settings = ServerSettings {
        poll_timeout_ms: 200,
        ..ServerSettings::default()
    };
    let harness = Harness::start(settings).await;
    let _ = harness
        .driver()
        .register_channel(ChannelRegistration::new("chat", "sid", "tok1"));

    let response = http(harness.addr, &poll_request("tok1", "")).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""empty":true"#), "{response}");

    harness.stop().await;
}

#[tokio::test]
async fn stream_delivers_named_event() {
    let harness = Harness::start(ServerSettings::default()).await;
    let id = harness
        .driver()
        .register_channel(ChannelRegistration::new("feed", "sid", "tok1"))
        .unwrap();

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(b"GET /eventhub/Events/feed HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let _ = harness
        .driver()
        .post_event(id, EventPost::new("tick").kind_name("clock"));

    let mut seen = String::new();
    let mut buf = [0_u8; 1024];
    while !seen.contains("data: tick") {
        let n = tokio::time::timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0, "stream ended early: {seen}");
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(seen.starts_with("HTTP/1.1 200"), "{seen}");
    assert!(seen.contains("text/event-stream"), "{seen}");
    assert!(seen.contains("event: clock"), "{seen}");

    drop(stream);
    harness.stop().await;
}

#[tokio::test]
async fn health_over_the_wire() {
    let harness = Harness::start(ServerSettings::default()).await;
    let response = http(
        harness.addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.contains(r#""scheduler":"running""#), "{response}");
    assert!(response.contains(r#""status":"ok""#), "{response}");
    harness.stop().await;
}
