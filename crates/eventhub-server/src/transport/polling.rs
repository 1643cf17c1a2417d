//! `POST <base>/Polling[/<session>]`: JSON long-poll transport.
//!
//! Request body (all fields optional):
//! `{"message": "...", "type": "message", "closeChannel": false}`.
//! The answer carries every event delivered to this poll, or nothing when
//! the poll timeout passes first.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eventhub_core::{EventKind, InboundEvent, OutboundEvent, PollBatch, PollRequest, PollWaiter};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::rejection_status;
use crate::request::{ClientRequest, with_cookie};
use crate::server::AppState;

/// Body of a long-poll request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollEnvelope {
    /// Client to server message, if any.
    pub message: Option<String>,
    /// Kind of the message; `message` when absent.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Ask the server to close the channel.
    pub close_channel: bool,
}

impl PollEnvelope {
    /// Parse a request body; an empty body is an empty envelope.
    pub fn parse(body: &[u8]) -> Result<Self, String> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| e.to_string())
    }

    /// Convert into the driver's poll request.
    pub fn into_request(self) -> Result<PollRequest, String> {
        let message = match self.message {
            Some(payload) => {
                let kind = match self.kind.as_deref() {
                    Some(kind) => kind.parse::<EventKind>()?,
                    None => EventKind::Message,
                };
                Some(InboundEvent::new(kind, payload))
            }
            None => None,
        };
        Ok(PollRequest {
            message,
            close_channel: self.close_channel,
        })
    }
}

/// One event in a poll answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolledEvent {
    /// Sequence number within the channel.
    pub number: u64,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Application-defined kind name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Payload text.
    pub payload: String,
}

impl From<OutboundEvent> for PolledEvent {
    fn from(event: OutboundEvent) -> Self {
        Self {
            number: event.number,
            kind: event.kind,
            type_name: event.kind_name,
            payload: event.payload,
        }
    }
}

/// Body of a long-poll answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollAnswer {
    /// Delivered events in post order.
    pub events: Vec<PolledEvent>,
    /// No events delivered.
    pub empty: bool,
    /// The channel was closed at the client's request.
    pub channel_closed: bool,
}

impl From<PollBatch> for PollAnswer {
    fn from(batch: PollBatch) -> Self {
        let events: Vec<PolledEvent> = batch.events.into_iter().map(PolledEvent::from).collect();
        Self {
            empty: events.is_empty(),
            events,
            channel_closed: batch.channel_closed,
        }
    }
}

/// Park the request on its channel until events arrive or the poll
/// timeout passes.
pub async fn polling_handler(
    State(state): State<AppState>,
    ClientRequest(request): ClientRequest,
    body: Bytes,
) -> Response {
    let poll = match PollEnvelope::parse(&body).and_then(PollEnvelope::into_request) {
        Ok(poll) => poll,
        Err(reason) => {
            debug!(%reason, "malformed poll envelope");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let (tx, rx) = oneshot::channel();
    let waiter = PollWaiter::new(request.fingerprint(), tx);
    let id = match state.driver.incoming_long_poll(&request, poll, waiter) {
        Ok(id) => id,
        Err(err) => return rejection_status(&err).into_response(),
    };
    let cookie = state.refreshed_cookie(&request, id);

    let batch = match tokio::time::timeout(state.poll_timeout(), rx).await {
        Ok(Ok(batch)) => batch,
        // waiter dropped without an answer
        Ok(Err(_)) => PollBatch::empty(),
        Err(_) => {
            debug!(channel_id = %id, "long poll timed out");
            PollBatch::empty()
        }
    };
    with_cookie(Json(PollAnswer::from(batch)).into_response(), cookie)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_body_is_a_plain_poll() {
        let poll = PollEnvelope::parse(b"  ").unwrap().into_request().unwrap();
        assert_eq!(poll, PollRequest::default());
    }

    #[test]
    fn message_defaults_to_message_kind() {
        let poll = PollEnvelope::parse(br#"{"message": "hi"}"#)
            .unwrap()
            .into_request()
            .unwrap();
        assert_eq!(poll.message, Some(InboundEvent::new(EventKind::Message, "hi")));
        assert!(!poll.close_channel);
    }

    #[test]
    fn typed_message_and_close_flag() {
        let poll = PollEnvelope::parse(br#"{"message": "bye", "type": "Error", "closeChannel": true}"#)
            .unwrap()
            .into_request()
            .unwrap();
        assert_eq!(poll.message, Some(InboundEvent::new(EventKind::Error, "bye")));
        assert!(poll.close_channel);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let envelope = PollEnvelope::parse(br#"{"message": "x", "type": "shout"}"#).unwrap();
        assert_matches!(envelope.into_request(), Err(reason) if reason.contains("shout"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(PollEnvelope::parse(b"{not json").is_err());
    }

    #[test]
    fn answer_shape() {
        let batch = PollBatch {
            events: vec![OutboundEvent {
                number: 3,
                kind: EventKind::Message,
                kind_name: Some("chat".into()),
                payload: "hello".into(),
                target: None,
            }],
            channel_closed: false,
        };
        let json = serde_json::to_value(PollAnswer::from(batch)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "events": [{"number": 3, "type": "message", "typeName": "chat", "payload": "hello"}],
                "empty": false,
                "channelClosed": false,
            })
        );
    }

    #[test]
    fn closed_answer_is_empty() {
        let answer = PollAnswer::from(PollBatch::closed());
        assert!(answer.empty);
        assert!(answer.channel_closed);
        let json = serde_json::to_value(answer).unwrap();
        assert!(json["events"].as_array().unwrap().is_empty());
    }
}
