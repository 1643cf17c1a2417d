//! `GET <base>/Sockets[/<session>]`: WebSocket transport.
//!
//! The request is bound to a channel before the upgrade so an unbound
//! request gets a plain 403. After the upgrade a reader loop feeds client
//! frames to the link, a writer task forwards driver frames and pings, and
//! a heartbeat drops clients whose pongs stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use eventhub_core::{ChannelId, EventKind, InboundEvent, SocketFrame, SocketLink};
use eventhub_driver::EventDriver;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, Liveness, run_heartbeat};
use crate::error::rejection_status;
use crate::metrics::{
    SOCKET_CONNECTIONS_ACTIVE, SOCKET_CONNECTIONS_TOTAL, SOCKET_DURATION_SECONDS,
};
use crate::request::{ClientRequest, with_cookie};
use crate::server::AppState;

/// Everything a session needs once the upgrade completed.
struct SocketSession {
    id: ChannelId,
    driver: Arc<EventDriver>,
    open: Arc<AtomicBool>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    heartbeat: Duration,
}

/// Bind the request to a channel, then upgrade.
pub async fn socket_handler(
    State(state): State<AppState>,
    ClientRequest(request): ClientRequest,
    ws: WebSocketUpgrade,
) -> Response {
    let (out_tx, out_rx) = mpsc::channel(state.settings.socket_buffer);
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(false));
    let link = SocketLink::new(request.fingerprint(), out_tx, in_rx, Arc::clone(&open));

    let id = match state.driver.incoming_new_socket(&request, link) {
        Ok(id) => id,
        Err(err) => return rejection_status(&err).into_response(),
    };
    let cookie = state.refreshed_cookie(&request, id);
    let session = SocketSession {
        id,
        driver: Arc::clone(&state.driver),
        open,
        inbound: in_tx,
        heartbeat: state.heartbeat_interval(),
    };
    with_cookie(
        ws.on_upgrade(move |socket| run_socket_session(socket, session, out_rx)),
        cookie,
    )
}

#[instrument(skip_all, fields(channel_id = %session.id))]
async fn run_socket_session(
    socket: WebSocket,
    session: SocketSession,
    frames: mpsc::Receiver<SocketFrame>,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let started = Instant::now();
    info!("socket connected");
    counter!(SOCKET_CONNECTIONS_TOTAL).increment(1);
    gauge!(SOCKET_CONNECTIONS_ACTIVE).increment(1.0);

    session.open.store(true, Ordering::Release);
    session.driver.incoming_event();

    let cancel = CancellationToken::new();
    let liveness = Arc::new(Liveness::new());
    let writer = tokio::spawn(forward_frames(ws_tx, frames, session.heartbeat, cancel.clone()));
    let heartbeat = {
        let (liveness, cancel) = (Arc::clone(&liveness), cancel.clone());
        let interval = session.heartbeat;
        tokio::spawn(async move {
            if run_heartbeat(liveness, interval, interval * 2, cancel.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!("client unresponsive, disconnecting");
                cancel.cancel();
            }
        })
    };

    loop {
        let next = tokio::select! {
            msg = ws_rx.next() => msg,
            () = cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = next else { break };
        liveness.mark_alive();
        let event = match msg {
            Message::Text(text) => InboundEvent::new(EventKind::Message, text.as_str()),
            Message::Binary(data) => {
                InboundEvent::new(EventKind::Binary, String::from_utf8_lossy(&data))
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        };
        if session.inbound.send(event).is_err() {
            debug!("link replaced by a newer connection");
            break;
        }
        session.driver.incoming_event();
    }

    session.open.store(false, Ordering::Release);
    cancel.cancel();
    let _ = writer.await;
    heartbeat.abort();
    session.driver.incoming_event();

    info!("socket disconnected");
    gauge!(SOCKET_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(SOCKET_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Writer task: driver frames and periodic pings out to the client. Ends
/// when the link is dropped, a close frame went out, or the session is
/// cancelled.
async fn forward_frames(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<SocketFrame>,
    ping_every: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_every);
    // first tick is immediate
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let closing = matches!(frame, SocketFrame::Close { .. });
                if ws_tx.send(to_message(frame)).await.is_err() || closing {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => break,
        }
    }
    let _ = ws_tx.close().await;
    cancel.cancel();
}

/// Map a driver frame onto a WebSocket message.
fn to_message(frame: SocketFrame) -> Message {
    match frame {
        SocketFrame::Text(text) => Message::Text(text.into()),
        SocketFrame::Binary(data) => Message::Binary(data.into()),
        SocketFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_frames_map_directly() {
        assert_eq!(
            to_message(SocketFrame::Text("hi".into())),
            Message::Text("hi".into())
        );
        assert_eq!(
            to_message(SocketFrame::Binary(vec![1, 2])),
            Message::Binary(vec![1, 2].into())
        );
    }

    #[test]
    fn close_frame_keeps_code_and_reason() {
        let msg = to_message(SocketFrame::Close {
            code: 1000,
            reason: "Channel closed".into(),
        });
        let Message::Close(Some(frame)) = msg else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason.as_str(), "Channel closed");
    }
}
