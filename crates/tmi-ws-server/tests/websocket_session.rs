//! End-to-end WebSocket test: bind the real router on an ephemeral port and
//! drive it with `tokio-tungstenite` as a client, covering spec.md §8's S1
//! happy path (two participants join, one's diagram_operation broadcasts to
//! the other but not back to the origin).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tmi_collab::Hub;
use tmi_protocol::Role;
use tmi_protocol::SessionLimits;
use tmi_ws_server::AppState;
use tmi_ws_server::auth::DevTokenVerifier;
use tmi_ws_server::build_router;
use tmi_ws_server::reference::InMemoryDiagramStore;
use tmi_ws_server::reference::OpenAuthorizationResolver;

async fn spawn_server() -> SocketAddr {
    let authorization: Arc<dyn tmi_collab::AuthorizationResolver> = Arc::new(OpenAuthorizationResolver::new(Role::Writer));
    let store: Arc<dyn tmi_collab::DiagramStore> = Arc::new(InMemoryDiagramStore::new());
    let hub = Hub::new(Arc::clone(&authorization), Arc::clone(&store), SessionLimits::default());
    let state = AppState {
        hub,
        authorization,
        store,
        tokens: Arc::new(DevTokenVerifier),
        limits: SessionLimits::default(),
        create_session_policy: tmi_collab::CreateSessionPolicy::ReturnExisting,
    };
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn next_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
) -> Value {
    loop {
        match ws.next().await.expect("stream ended").expect("ws error") {
            Message::Text(text) => return serde_json::from_str(&text).expect("valid json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn two_participants_exchange_diagram_operations() {
    let addr = spawn_server().await;
    let url = |user: &str| format!("ws://{addr}/threat_models/tm1/diagrams/d1/ws?token={user}");

    let (mut alice, _) = connect_async(url("alice")).await.expect("alice connects");
    // participant_joined(self) + participants_update
    let _ = next_json(&mut alice).await;
    let _ = next_json(&mut alice).await;

    let (mut bob, _) = connect_async(url("bob")).await.expect("bob connects");
    // bob observes its own join broadcast + the roster update
    let bob_joined = next_json(&mut bob).await;
    assert_eq!(bob_joined["message_type"], "participant_joined");
    let _ = next_json(&mut bob).await;

    // alice observes bob joining
    let alice_sees_bob = next_json(&mut alice).await;
    assert_eq!(alice_sees_bob["message_type"], "participant_joined");
    assert_eq!(alice_sees_bob["user"], "bob");
    let _ = next_json(&mut alice).await;

    let op = json!({
        "message_type": "diagram_operation",
        "operation_id": "op-1",
        "update_vector": 0,
        "cell_patches": [],
    });
    alice.send(Message::Text(op.to_string())).await.expect("send op");

    let broadcast = next_json(&mut bob).await;
    assert_eq!(broadcast["message_type"], "history_operation");
    assert_eq!(broadcast["operation_id"], "op-1");

    tokio::time::timeout(Duration::from_millis(200), async {
        let frame = next_json(&mut alice).await;
        panic!("alice should not receive its own operation echoed back: {frame:?}");
    })
    .await
    .expect_err("no frame should arrive for alice within the timeout");
}

#[tokio::test]
async fn unauthenticated_handshake_is_rejected() {
    let addr = spawn_server().await;
    let url = format!("ws://{addr}/threat_models/tm1/diagrams/d1/ws?token=");
    let err = connect_async(url).await.expect_err("empty token must be rejected");
    assert!(err.to_string().contains("401") || format!("{err:?}").contains("401"));
}
