//! End-to-end tests for the scene server.
//!
//! The two-client scenario runs sessions over in-memory channels so every
//! step is deterministic. A smaller set of tests drives the real Axum
//! router, once with `tower::ServiceExt` and once over a TCP socket.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::channel::mpsc as chan;
use futures::{SinkExt, StreamExt};
use noodles_core::Scene;
use noodles_server::{demo, run_session, AppState, Hub, HubHandle, SessionConfig, SessionError};
use noodles_types::{
    ClientMessage, ComponentKind, ComponentRef, DeltaPayload, ErrorCode, IDGroup, IntroPayload,
    InvokeReply, InvokeRequest, ServerMessage,
};
use tokio::task::JoinHandle;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);

fn session_config() -> SessionConfig {
    SessionConfig {
        intro_timeout: Duration::from_millis(500),
        outbound_capacity: 256,
    }
}

struct Fixture {
    hub: HubHandle,
    hub_task: JoinHandle<Scene>,
    point_plot: IDGroup,
    delete_component: IDGroup,
}

fn fixture() -> Fixture {
    let mut scene = Scene::with_limits(None, None).unwrap();
    let point_plot = demo::install(&mut scene).unwrap();
    let delete_component = scene.builtins().delete_component;
    let (hub, hub_task) = Hub::spawn(scene, 64);
    Fixture {
        hub,
        hub_task,
        point_plot,
        delete_component,
    }
}

/// One client driving a session over channels.
struct Client {
    inbound: chan::UnboundedSender<Result<ClientMessage, SessionError>>,
    outbound: chan::UnboundedReceiver<ServerMessage>,
    session: JoinHandle<Result<(), SessionError>>,
}

impl Client {
    fn connect(hub: &HubHandle) -> Self {
        let (in_tx, in_rx) = chan::unbounded();
        let (out_tx, out_rx) = chan::unbounded();
        let session = tokio::spawn(run_session(in_rx, out_tx, hub.clone(), session_config()));
        Self {
            inbound: in_tx,
            outbound: out_rx,
            session,
        }
    }

    fn send(&self, message: ClientMessage) {
        self.inbound.unbounded_send(Ok(message)).unwrap();
    }

    fn intro(&self, name: &str) {
        self.send(ClientMessage::Intro(IntroPayload {
            client_name: String::from(name),
        }));
    }

    fn invoke(&self, id: &str, method: IDGroup, target: Option<ComponentRef>) {
        self.send(ClientMessage::InvokeRequest(InvokeRequest {
            invoke_id: Some(String::from(id)),
            method,
            target,
            args: Vec::new(),
        }));
    }

    async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(WAIT, self.outbound.next())
            .await
            .unwrap()
            .unwrap()
    }

    async fn recv_n(&mut self, n: usize) -> Vec<ServerMessage> {
        let mut messages = Vec::with_capacity(n);
        for _ in 0..n {
            messages.push(self.recv().await);
        }
        messages
    }

    async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.outbound.next()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }
}

fn create(message: &ServerMessage) -> &DeltaPayload {
    match message {
        ServerMessage::CreateDelta(delta) => delta,
        other => panic!("expected CreateDelta, got {other:?}"),
    }
}

fn delete(message: &ServerMessage) -> &DeltaPayload {
    match message {
        ServerMessage::DeleteDelta(delta) => delta,
        other => panic!("expected DeleteDelta, got {other:?}"),
    }
}

fn reply(message: &ServerMessage) -> &InvokeReply {
    match message {
        ServerMessage::InvokeReply(reply) => reply,
        other => panic!("expected InvokeReply, got {other:?}"),
    }
}

#[tokio::test]
async fn two_clients_observe_the_same_ordered_stream() {
    let fixture = fixture();
    let mut a = Client::connect(&fixture.hub);
    let mut b = Client::connect(&fixture.hub);

    // Both start from a scene holding only methods.
    a.intro("A");
    let snapshot = a.recv_n(4).await;
    assert!(snapshot.iter().all(|m| create(m).kind == ComponentKind::Method));
    b.intro("B");
    assert_eq!(b.recv_n(4).await, snapshot);

    // A creates a plot: both see the buffer, view, material and geometry in
    // that order; only A sees the reply.
    a.invoke("plot", fixture.point_plot, None);
    let seen_by_a = a.recv_n(5).await;
    let kinds: Vec<_> = seen_by_a[..4].iter().map(|m| create(m).kind).collect();
    assert_eq!(
        kinds,
        [
            ComponentKind::Buffer,
            ComponentKind::BufferView,
            ComponentKind::Material,
            ComponentKind::Geometry
        ]
    );
    let material = create(&seen_by_a[2]);
    let geometry = create(&seen_by_a[3]);
    assert!(geometry.seq > material.seq);
    let plot_reply = reply(&seen_by_a[4]);
    assert_eq!(plot_reply.invoke_id.as_deref(), Some("plot"));
    assert!(plot_reply.is_success());
    assert_eq!(b.recv_n(4).await, seen_by_a[..4].to_vec());

    // A deletes the geometry.
    let geometry_ref = ComponentRef::new(geometry.kind, geometry.id);
    a.invoke("del", fixture.delete_component, Some(geometry_ref));
    let seen_by_a_2 = a.recv_n(2).await;
    let deleted = delete(&seen_by_a_2[0]);
    assert_eq!(deleted.id, geometry.id);
    assert!(deleted.seq > geometry.seq);
    assert!(reply(&seen_by_a_2[1]).is_success());
    assert_eq!(b.recv_n(1).await, seen_by_a_2[..1].to_vec());
    b.assert_quiet().await;

    // Deleting it again names a dead target and broadcasts nothing.
    a.invoke("again", fixture.delete_component, Some(geometry_ref));
    let stale = a.recv().await;
    let stale = reply(&stale);
    assert_eq!(
        stale.error.as_ref().map(|e| e.code),
        Some(ErrorCode::TargetNotFound)
    );
    b.assert_quiet().await;

    // Disconnecting A leaves the scene alone.
    let material_ref = ComponentRef::new(material.kind, material.id);
    drop(a.inbound);
    assert!(a.session.await.unwrap().is_ok());
    drop(b.inbound);
    assert!(b.session.await.unwrap().is_ok());

    fixture.hub.shutdown().await.unwrap();
    let scene = fixture.hub_task.await.unwrap();
    assert!(scene.registry().contains(material_ref));
    assert!(scene.registry().get(geometry_ref).is_err());
    assert!(scene.registry().broadcaster().is_empty());
}

#[tokio::test]
async fn late_joiner_snapshot_includes_earlier_work() {
    let fixture = fixture();
    let mut a = Client::connect(&fixture.hub);
    a.intro("A");
    a.recv_n(4).await;
    a.invoke("plot", fixture.point_plot, None);
    let created = a.recv_n(5).await;

    let mut late = Client::connect(&fixture.hub);
    late.intro("late");
    let snapshot = late.recv_n(8).await;
    // Methods first, then the plot's components in kind order, which is
    // also the order they were created in.
    assert_eq!(snapshot[4..], created[..4]);
    late.assert_quiet().await;
}

#[tokio::test]
async fn unknown_method_is_reported_to_the_caller_only() {
    let fixture = fixture();
    let mut a = Client::connect(&fixture.hub);
    let mut b = Client::connect(&fixture.hub);
    a.intro("A");
    a.recv_n(4).await;
    b.intro("B");
    b.recv_n(4).await;

    a.invoke("nope", IDGroup::new(99, 0), None);
    let message = a.recv().await;
    assert!(matches!(
        message,
        ServerMessage::InvokeReply(InvokeReply { error: Some(ref e), .. })
            if e.code == ErrorCode::MethodNotFound
    ));
    b.assert_quiet().await;
}

// ============================================================================
// Router
// ============================================================================

fn app_state(hub: HubHandle) -> Arc<AppState> {
    Arc::new(AppState::new(hub, session_config()))
}

#[tokio::test]
async fn root_requires_websocket_upgrade() {
    let fixture = fixture();
    let router = noodles_server::build_router(app_state(fixture.hub.clone()));

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_client_error());

    let response = router
        .oneshot(Request::builder().uri("/api").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn websocket_session_over_tcp() {
    use tokio_tungstenite::tungstenite::Message;

    let fixture = fixture();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = app_state(fixture.hub.clone());
    tokio::spawn(noodles_server::serve(listener, state, std::future::pending()));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();

    let intro = ClientMessage::Intro(IntroPayload {
        client_name: String::from("tcp"),
    });
    socket
        .send(Message::Binary(intro.encode().unwrap().into()))
        .await
        .unwrap();

    let invoke = ClientMessage::InvokeRequest(InvokeRequest {
        invoke_id: Some(String::from("1")),
        method: fixture.point_plot,
        target: None,
        args: Vec::new(),
    });
    socket
        .send(Message::Binary(invoke.encode().unwrap().into()))
        .await
        .unwrap();

    // Four method snapshots, four creates, one reply.
    let mut received = Vec::new();
    while received.len() < 9 {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Binary(bytes) = frame {
            received.push(ServerMessage::decode(&bytes).unwrap());
        }
    }
    assert!(matches!(
        received.last(),
        Some(ServerMessage::InvokeReply(r)) if r.is_success()
    ));

    // Text frames are not part of the protocol.
    socket.send(Message::Text("hello".into())).await.unwrap();
    let closed = tokio::time::timeout(WAIT, async {
        while let Some(Ok(frame)) = socket.next().await {
            if frame.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
