//! End-to-end seed scenarios driven against a real in-process hub: a
//! `TcpListener` bound to an ephemeral port with `axum::serve` run on a
//! background task, and a real `tokio-tungstenite` client socket on the
//! other end. Unit-level properties (registry monotonicity, coalescing,
//! symmetry, ...) are covered alongside the code they exercise; this file
//! only covers behaviour that crosses the registry/state-store/WS
//! boundary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use lightwave_hub::config::HubConfig;
use lightwave_hub::ota::OtaRepository;
use lightwave_hub::registry::Registry;
use lightwave_hub::state_store::StateStore;
use lightwave_hub::ws::AppState;
use lightwave_hub::control_server;
use lightwave_proto::ws::{ClientMessage, ServerMessage};
use lightwave_proto::{Capabilities, NodeState, Topology};

async fn spawn_test_hub() -> (SocketAddr, Arc<AppState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = HubConfig { ota_root: std::env::temp_dir().join("lw-scenarios-ota").to_string_lossy().into_owned(), ..HubConfig::default() };
    let registry = Arc::new(Registry::new());
    let store = Arc::new(StateStore::new());
    let ota_repo = OtaRepository::load(config.ota_root.clone()).await;
    let app_state = Arc::new(AppState::new(config, registry, store, ota_repo));

    let router = control_server::build_router(app_state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    // give the accept loop a moment to start polling before the first connect.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, app_state)
}

fn identity() -> (String, String, Capabilities, Topology) {
    (
        "AA:BB:CC:DD:EE:01".to_string(),
        "1.0.0".to_string(),
        Capabilities { udp: true, ota: true, clock: true },
        Topology { leds: 320, channels: 2 },
    )
}

async fn send(write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin), msg: &ClientMessage) {
    let text = serde_json::to_string(msg).unwrap();
    write.send(Message::Text(text)).await.unwrap();
}

async fn recv_server_message(
    read: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> ServerMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("timed out waiting for server message")
            .expect("socket closed early")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("malformed server message");
        }
    }
}

#[tokio::test]
async fn cold_start_single_node_gets_welcomed_and_snapshotted() {
    let (addr, app_state) = spawn_test_hub().await;
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let (mac, fw, caps, topo) = identity();
    send(&mut write, &ClientMessage::Hello { mac: mac.clone(), fw, caps, topo }).await;

    let welcome = recv_server_message(&mut read).await;
    let node_id = match welcome {
        ServerMessage::Welcome { node_id, proto, .. } => {
            assert_eq!(proto, lightwave_proto::LW_PROTO_VER);
            node_id
        }
        other => panic!("expected welcome, got {other:?}"),
    };

    let snapshot = recv_server_message(&mut read).await;
    match snapshot {
        ServerMessage::StateSnapshot { global, .. } => {
            assert_eq!(global.effect_id, 0);
            assert_eq!(global.brightness, 128);
        }
        other => panic!("expected state snapshot, got {other:?}"),
    }

    send(&mut write, &ClientMessage::Ka { node_id, token: app_state.registry.get(node_id).await.unwrap().token, rssi: -40, loss_pct: 0.0, drift_us: 0, uptime_s: 1 }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app_state.registry.get(node_id).await.unwrap().state, NodeState::Ready);
}

#[tokio::test]
async fn saturated_send_queue_drops_without_disconnecting() {
    let (_addr, app_state) = spawn_test_hub().await;
    let node_id = app_state.registry.register_node("AA:BB:CC:DD:EE:02", "10.0.0.9").await;
    app_state.registry.send_welcome(node_id).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel(lightwave_hub::ws::SEND_QUEUE_CAPACITY);
    app_state.senders.write().await.insert(node_id, tx);

    // Saturate the queue without ever draining it, then keep sending: the
    // policy is drop-and-log, never closing the channel or panicking.
    for i in 0..(lightwave_hub::ws::SEND_QUEUE_CAPACITY as u8 + 10) {
        app_state.send_to(node_id, ServerMessage::ParametersSet {
            apply_at_us: 0,
            fields: lightwave_proto::ws::ParametersSetFields { brightness: Some(i), ..Default::default() },
        }).await;
    }

    assert!(app_state.senders.read().await.contains_key(&node_id));
    // The receiver end is still open and holds exactly the queue capacity
    // worth of messages; later sends were dropped, not queued unbounded.
    let mut drained = 0;
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    assert_eq!(drained, lightwave_hub::ws::SEND_QUEUE_CAPACITY);
}

#[tokio::test]
async fn lost_node_reclaims_its_id_and_gets_a_fresh_token_on_rejoin() {
    let (addr, app_state) = spawn_test_hub().await;
    let url = format!("ws://{addr}/ws");

    let (mac, fw, caps, topo) = identity();

    let (ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write1, mut read1) = ws1.split();
    send(&mut write1, &ClientMessage::Hello { mac: mac.clone(), fw: fw.clone(), caps, topo }).await;
    let (node_id1, token1) = match recv_server_message(&mut read1).await {
        ServerMessage::Welcome { node_id, token, .. } => (node_id, token),
        other => panic!("expected welcome, got {other:?}"),
    };
    let _ = recv_server_message(&mut read1).await; // state.snapshot

    drop(write1);
    drop(read1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app_state.registry.get(node_id1).await.unwrap().state, NodeState::Lost);

    let (ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write2, mut read2) = ws2.split();
    send(&mut write2, &ClientMessage::Hello { mac: mac.clone(), fw, caps, topo }).await;
    let (node_id2, token2) = match recv_server_message(&mut read2).await {
        ServerMessage::Welcome { node_id, token, .. } => (node_id, token),
        other => panic!("expected welcome, got {other:?}"),
    };

    assert_eq!(node_id1, node_id2, "rejoining mac should reclaim the same node id");
    assert_ne!(token1, token2, "a rejoin must mint a fresh token");

    send(&mut write2, &ClientMessage::Ka { node_id: node_id2, token: token2, rssi: -40, loss_pct: 0.0, drift_us: 0, uptime_s: 1 }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app_state.registry.get(node_id2).await.unwrap().state, NodeState::Ready);
}

#[tokio::test]
async fn coalesced_brightness_changes_broadcast_to_ready_nodes_only_once() {
    let (addr, app_state) = spawn_test_hub().await;
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let (mac, fw, caps, topo) = identity();
    send(&mut write, &ClientMessage::Hello { mac, fw, caps, topo }).await;
    let (node_id, token) = match recv_server_message(&mut read).await {
        ServerMessage::Welcome { node_id, token, .. } => (node_id, token),
        other => panic!("expected welcome, got {other:?}"),
    };
    let _ = recv_server_message(&mut read).await; // state.snapshot
    send(&mut write, &ClientMessage::Ka { node_id, token, rssi: -40, loss_pct: 0.0, drift_us: 0, uptime_s: 1 }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    for v in [128u8, 140, 150, 165, 180] {
        app_state.store.set_brightness(v).await;
    }
    let result = app_state.store.coalesce(0).await;
    match &result.parameters_set {
        Some(ServerMessage::ParametersSet { fields, .. }) => assert_eq!(fields.brightness, Some(180)),
        other => panic!("expected exactly one parameters.set, got {other:?}"),
    }
    assert!(result.effects_set_current.is_none());

    app_state.broadcast_ready(result.parameters_set.unwrap()).await;
    match recv_server_message(&mut read).await {
        ServerMessage::ParametersSet { fields, .. } => assert_eq!(fields.brightness, Some(180)),
        other => panic!("expected the coalesced brightness to reach the node, got {other:?}"),
    }
}
