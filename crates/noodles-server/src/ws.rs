//! `WebSocket` transport for scene sessions.
//!
//! Each binary frame carries exactly one CBOR-framed message. Text frames
//! are not part of the protocol and close the session as malformed.
//! Ping and pong frames are handled by the socket itself and never reach
//! the session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{future, SinkExt, StreamExt};
use noodles_types::{ClientMessage, ServerMessage};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::run_session;
use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` scene session.
///
/// # Route
///
/// `GET /`
pub async fn ws_session(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");

    let (sink, stream) = socket.split();
    let inbound = stream.filter_map(|frame| future::ready(decode_frame(frame)));
    let outbound = sink
        .sink_map_err(|e| SessionError::Transport(e.to_string()))
        .with(|message: ServerMessage| future::ready(encode_frame(&message)));

    if let Err(e) = run_session(inbound, outbound, state.hub.clone(), state.session).await {
        debug!(error = %e, "WebSocket session ended");
    }
}

/// Turn one socket frame into a client message, skipping control frames.
fn decode_frame(
    frame: Result<Message, axum::Error>,
) -> Option<Result<ClientMessage, SessionError>> {
    match frame {
        Ok(Message::Binary(bytes)) => Some(ClientMessage::decode(&bytes).map_err(SessionError::from)),
        Ok(Message::Text(_)) => Some(Err(SessionError::MalformedMessage(String::from(
            "text frames are not accepted",
        )))),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
    }
}

fn encode_frame(message: &ServerMessage) -> Result<Message, SessionError> {
    message
        .encode()
        .map(|bytes| Message::Binary(bytes.into()))
        .map_err(|e| {
            warn!(tag = ?message.tag(), error = %e, "failed to encode server message");
            SessionError::Transport(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use noodles_types::{IntroPayload, InvokeReply, Value};

    use super::*;

    #[test]
    fn binary_intro_decodes() {
        let intro = ClientMessage::Intro(IntroPayload {
            client_name: String::from("viewer"),
        });
        let bytes = intro.encode().unwrap_or_default();
        let decoded = decode_frame(Ok(Message::Binary(bytes.into())));
        assert!(matches!(decoded, Some(Ok(ref m)) if *m == intro));
    }

    #[test]
    fn text_frames_are_malformed() {
        let decoded = decode_frame(Ok(Message::Text("hello".into())));
        assert!(matches!(decoded, Some(Err(SessionError::MalformedMessage(_)))));
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(decode_frame(Ok(Message::Ping(Vec::new().into()))).is_none());
        assert!(decode_frame(Ok(Message::Close(None))).is_none());
    }

    #[test]
    fn server_messages_encode_as_binary() {
        let reply = ServerMessage::InvokeReply(InvokeReply::success(None, Value::Null));
        assert!(matches!(encode_frame(&reply), Ok(Message::Binary(_))));
    }
}
