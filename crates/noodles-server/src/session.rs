//! Per-connection session state machine.
//!
//! ```text
//! Connecting -> AwaitingIntro -> Active -> Closed
//!                     |                      ^
//!                     +----------------------+  (handshake failure)
//! ```
//!
//! A session only moves bytes. It decodes nothing itself: the transport
//! hands it a stream of already decoded [`ClientMessage`]s and a sink
//! that accepts [`ServerMessage`]s, so the same state machine runs over a
//! real `WebSocket` or over in-memory channels in tests.

use std::fmt;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use noodles_core::ServerConfig;
use noodles_types::{ClientMessage, ServerMessage, SessionInfo};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::hub::HubHandle;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, nothing received yet.
    Connecting,
    /// Waiting for the client's single `Intro`.
    AwaitingIntro,
    /// Subscribed and accepting invocations.
    Active,
    /// Finished; unsubscribed if it was ever subscribed.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::AwaitingIntro => "awaiting_intro",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long the client may take to introduce itself.
    pub intro_timeout: Duration,
    /// Room in the session's outbound queue beyond its join snapshot.
    /// A session that falls further behind than this is evicted.
    pub outbound_capacity: usize,
}

impl SessionConfig {
    /// Extract the session limits from the server configuration.
    pub const fn from_server(config: &ServerConfig) -> Self {
        Self {
            intro_timeout: config.intro_timeout(),
            outbound_capacity: config.outbound_queue_capacity,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_server(&ServerConfig::default())
    }
}

/// Drive one connection from handshake to close.
///
/// Returns `Ok(())` when the client disconnects or is evicted, and the
/// [`SessionError`] that closed the connection otherwise. Either way the
/// session is unsubscribed before this returns; the scene is untouched.
///
/// # Errors
///
/// - [`SessionError::HandshakeFailed`] if no valid `Intro` arrives in time.
/// - [`SessionError::ProtocolViolation`] for a non-intro first message, a
///   second `Intro`, or a server-only message.
/// - [`SessionError::MalformedMessage`] for an undecodable frame.
/// - [`SessionError::HubUnavailable`] if the hub refuses or has stopped.
/// - [`SessionError::Transport`] if the outbound sink fails.
pub async fn run_session<S, K>(
    inbound: S,
    outbound: K,
    hub: HubHandle,
    config: SessionConfig,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<ClientMessage, SessionError>>,
    K: Sink<ServerMessage>,
    K::Error: fmt::Display,
{
    let mut inbound = std::pin::pin!(inbound);
    let mut outbound = std::pin::pin!(outbound);
    let mut state = SessionState::Connecting;

    transition(&mut state, SessionState::AwaitingIntro);
    let info = match await_intro(&mut inbound, config.intro_timeout).await {
        Ok(info) => info,
        Err(err) => {
            transition(&mut state, SessionState::Closed);
            let _ = outbound.close().await;
            return Err(err);
        }
    };

    let mut queue = match hub.join(info.clone(), config.outbound_capacity).await {
        Ok(queue) => queue,
        Err(err) => {
            transition(&mut state, SessionState::Closed);
            let _ = outbound.close().await;
            return Err(err);
        }
    };
    transition(&mut state, SessionState::Active);
    info!(session = %info.id, client = %info.client_name, "session active");

    let outcome = loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(message) = next else {
                    warn!(session = %info.id, "session evicted from broadcast");
                    break Ok(());
                };
                if let Err(e) = outbound.send(message).await {
                    break Err(SessionError::Transport(e.to_string()));
                }
            }
            frame = inbound.next() => {
                match frame {
                    None => {
                        debug!(session = %info.id, "client disconnected");
                        break Ok(());
                    }
                    Some(Err(err)) => break Err(err),
                    Some(Ok(ClientMessage::Intro(_))) => {
                        break Err(SessionError::ProtocolViolation(String::from(
                            "session already introduced",
                        )));
                    }
                    Some(Ok(ClientMessage::InvokeRequest(request))) => {
                        if let Err(err) = hub.invoke(info.id, request).await {
                            break Err(err);
                        }
                    }
                }
            }
        }
    };

    transition(&mut state, SessionState::Closed);
    if let Err(err) = hub.leave(info.id).await {
        debug!(session = %info.id, error = %err, "leave not delivered");
    }
    let _ = outbound.close().await;
    match &outcome {
        Ok(()) => info!(session = %info.id, "session closed"),
        Err(err) => warn!(session = %info.id, error = %err, "session closed with error"),
    }
    outcome
}

async fn await_intro<S>(inbound: &mut S, timeout: Duration) -> Result<SessionInfo, SessionError>
where
    S: Stream<Item = Result<ClientMessage, SessionError>> + Unpin,
{
    let first = tokio::time::timeout(timeout, inbound.next())
        .await
        .map_err(|_elapsed| {
            SessionError::HandshakeFailed(format!("no intro within {}ms", timeout.as_millis()))
        })?;

    match first {
        None => Err(SessionError::HandshakeFailed(String::from(
            "connection closed before intro",
        ))),
        Some(Err(SessionError::MalformedMessage(reason))) => Err(SessionError::HandshakeFailed(
            format!("malformed intro: {reason}"),
        )),
        Some(Err(err)) => Err(err),
        Some(Ok(ClientMessage::Intro(intro))) => Ok(SessionInfo::new(intro.client_name)),
        Some(Ok(ClientMessage::InvokeRequest(_))) => Err(SessionError::ProtocolViolation(
            String::from("first message must be an intro"),
        )),
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!(from = %state, to = %next, "session state");
    *state = next;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::channel::mpsc as chan;
    use noodles_core::Scene;
    use noodles_types::{IntroPayload, InvokeRequest, MessageTag};

    use super::*;
    use crate::hub::Hub;

    type Inbound = chan::UnboundedSender<Result<ClientMessage, SessionError>>;

    fn config() -> SessionConfig {
        SessionConfig {
            intro_timeout: Duration::from_millis(100),
            outbound_capacity: 64,
        }
    }

    fn intro(name: &str) -> Result<ClientMessage, SessionError> {
        Ok(ClientMessage::Intro(IntroPayload {
            client_name: String::from(name),
        }))
    }

    fn start() -> (
        Inbound,
        chan::UnboundedReceiver<ServerMessage>,
        tokio::task::JoinHandle<Result<(), SessionError>>,
    ) {
        let scene = Scene::with_limits(None, None).unwrap();
        let (hub, _task) = Hub::spawn(scene, 8);
        let (in_tx, in_rx) = chan::unbounded();
        let (out_tx, out_rx) = chan::unbounded();
        let session = tokio::spawn(run_session(in_rx, out_tx, hub, config()));
        (in_tx, out_rx, session)
    }

    #[tokio::test]
    async fn intro_timeout_fails_handshake() {
        let (_in_tx, _out_rx, session) = start();
        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn invoke_before_intro_is_a_violation() {
        let (in_tx, mut out_rx, session) = start();
        in_tx
            .unbounded_send(Ok(ClientMessage::InvokeRequest(InvokeRequest {
                invoke_id: None,
                method: noodles_types::IDGroup::new(0, 0),
                target: None,
                args: Vec::new(),
            })))
            .unwrap();
        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::ProtocolViolation(_))));
        // Never subscribed, so no snapshot was sent.
        assert!(out_rx.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_intro_fails_handshake() {
        let (in_tx, _out_rx, session) = start();
        in_tx
            .unbounded_send(Err(SessionError::MalformedMessage(String::from("junk"))))
            .unwrap();
        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn second_intro_closes_active_session() {
        let (in_tx, mut out_rx, session) = start();
        in_tx.unbounded_send(intro("a")).unwrap();

        // Snapshot of the three built-in methods.
        for _ in 0..3 {
            assert!(matches!(out_rx.next().await, Some(ServerMessage::CreateDelta(_))));
        }

        in_tx.unbounded_send(intro("a")).unwrap();
        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn server_only_tag_closes_active_session() {
        let (in_tx, _out_rx, session) = start();
        in_tx.unbounded_send(intro("a")).unwrap();
        in_tx
            .unbounded_send(Err(SessionError::from(
                noodles_types::CodecError::UnexpectedTag(MessageTag::InvokeReply),
            )))
            .unwrap();
        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn client_close_is_clean() {
        let (in_tx, _out_rx, session) = start();
        in_tx.unbounded_send(intro("a")).unwrap();
        drop(in_tx);
        assert!(session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn scene_larger_than_the_queue_is_still_joinable() {
        let mut scene = Scene::with_limits(None, None).unwrap();
        for n in 0..200 {
            scene
                .registry_mut()
                .create(noodles_types::ComponentKind::Buffer, format!("b{n}"), noodles_types::Value::Null)
                .unwrap();
        }
        let (hub, _task) = Hub::spawn(scene, 8);
        let (in_tx, in_rx) = chan::unbounded();
        let (out_tx, mut out_rx) = chan::unbounded();
        let session = tokio::spawn(run_session(in_rx, out_tx, hub, config()));

        in_tx.unbounded_send(intro("big")).unwrap();
        for _ in 0..203 {
            assert!(matches!(out_rx.next().await, Some(ServerMessage::CreateDelta(_))));
        }
        drop(in_tx);
        assert!(session.await.unwrap().is_ok());
    }

    #[test]
    fn states_render_for_logs() {
        assert_eq!(SessionState::AwaitingIntro.to_string(), "awaiting_intro");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
