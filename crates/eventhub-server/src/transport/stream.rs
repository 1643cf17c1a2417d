//! `GET <base>/Events[/<session>]`: Server-Sent Events transport.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use eventhub_core::{ChannelId, StreamLink, StreamMessage};
use eventhub_driver::EventDriver;
use futures::StreamExt;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::rejection_status;
use crate::metrics::{STREAM_CONNECTIONS_ACTIVE, STREAM_CONNECTIONS_TOTAL};
use crate::request::{ClientRequest, with_cookie};
use crate::server::AppState;

/// Bind the request to a channel and answer with an event stream.
pub async fn stream_handler(
    State(state): State<AppState>,
    ClientRequest(request): ClientRequest,
) -> Response {
    let (tx, rx) = mpsc::channel(state.settings.socket_buffer);
    let link = StreamLink::new(request.fingerprint(), tx);
    let id = match state.driver.incoming_new_stream(&request, link) {
        Ok(id) => id,
        Err(err) => return rejection_status(&err).into_response(),
    };
    let cookie = state.refreshed_cookie(&request, id);

    let guard = StreamGuard::new(id, Arc::clone(&state.driver));
    let events = ReceiverStream::new(rx).map(move |message| {
        let _ = &guard;
        Ok::<_, Infallible>(to_sse(message))
    });
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive()));
    with_cookie(sse.into_response(), cookie)
}

/// Lives as long as the response body; wakes the driver when the client
/// goes away so the dead link is reaped promptly.
struct StreamGuard {
    id: ChannelId,
    driver: Arc<EventDriver>,
}

impl StreamGuard {
    fn new(id: ChannelId, driver: Arc<EventDriver>) -> Self {
        counter!(STREAM_CONNECTIONS_TOTAL).increment(1);
        gauge!(STREAM_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(channel_id = %id, "stream opened");
        Self { id, driver }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        gauge!(STREAM_CONNECTIONS_ACTIVE).decrement(1.0);
        debug!(channel_id = %self.id, "stream closed");
        self.driver.incoming_event();
    }
}

/// Render one stream message as an SSE event. Carriage returns cannot be
/// carried by SSE fields and are dropped.
pub fn to_sse(message: StreamMessage) -> Event {
    let name: String = message
        .event
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect();
    let data = message.data.replace("\r\n", "\n").replace('\r', "\n");
    Event::default()
        .id(message.id.to_string())
        .event(name)
        .data(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(message: StreamMessage) -> String {
        let events = futures::stream::iter([Ok::<_, Infallible>(to_sse(message))]);
        let body = Sse::new(events).into_response().into_body();
        let bytes = axum::body::to_bytes(body, 10_000).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn event_carries_id_name_and_data() {
        let text = render(StreamMessage {
            id: 7,
            event: "message".into(),
            data: "hello".into(),
        })
        .await;
        assert!(text.contains("id: 7\n"), "{text}");
        assert!(text.contains("event: message\n"), "{text}");
        assert!(text.contains("data: hello\n"), "{text}");
    }

    #[tokio::test]
    async fn multiline_data_is_split_into_data_lines() {
        let text = render(StreamMessage {
            id: 2,
            event: "odd\r\nname".into(),
            data: "one\r\ntwo".into(),
        })
        .await;
        assert!(text.contains("event: oddname\n"), "{text}");
        assert!(text.contains("data: one\ndata: two\n"), "{text}");
    }

    #[test]
    fn carriage_returns_do_not_panic() {
        let _ = to_sse(StreamMessage {
            id: 1,
            event: "odd\r\nname".into(),
            data: "line one\r\nline two\rthree".into(),
        });
    }
}
