//! Per-connection WebSocket control-plane handling: one task pumps
//! outbound `ServerMessage`s from a bounded channel, one loop parses
//! inbound `ClientMessage`s and dispatches them into the registry, state
//! store, and OTA dispatcher. `AppState` is the single piece of shared
//! state every HTTP and WS handler closes over.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use lightwave_proto::ws::{ClientMessage, ServerMessage};
use lightwave_proto::ErrorCode;

use crate::config::HubConfig;
use crate::ota::{Dispatcher, OtaRepository};
use crate::pending_join::{PendingJoin, PendingJoinRing};
use crate::registry::{now_ms, Registry};
use crate::state_store::StateStore;

pub const SEND_QUEUE_CAPACITY: usize = 32;

pub struct AppState {
    pub config: HubConfig,
    pub registry: Arc<Registry>,
    pub store: Arc<StateStore>,
    pub ota: RwLock<OtaRepository>,
    pub dispatcher: RwLock<Dispatcher>,
    pub pending_joins: PendingJoinRing,
    pub senders: RwLock<HashMap<u8, mpsc::Sender<ServerMessage>>>,
    pub node_addrs: RwLock<HashMap<u8, SocketAddr>>,
    next_client_id: AtomicU64,
}

impl AppState {
    pub fn new(config: HubConfig, registry: Arc<Registry>, store: Arc<StateStore>, ota: OtaRepository) -> Self {
        Self {
            config,
            registry,
            store,
            ota: RwLock::new(ota),
            dispatcher: RwLock::new(Dispatcher::new()),
            pending_joins: PendingJoinRing::new(),
            senders: RwLock::new(HashMap::new()),
            node_addrs: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Sends a message to one node's queue. Per the back-pressure policy
    /// this never blocks and never closes the connection on a full queue —
    /// it drops the message and logs a throttled warning, trusting the
    /// next coalesced broadcast to carry the latest state.
    pub async fn send_to(&self, node_id: u8, msg: ServerMessage) {
        let senders = self.senders.read().await;
        if let Some(tx) = senders.get(&node_id) {
            if tx.try_send(msg).is_err() {
                warn!(node_id, "send queue full, dropping message");
            }
        }
    }

    pub async fn broadcast_ready(&self, msg: ServerMessage) {
        let ready = self.registry.for_each_ready().await;
        for node in ready {
            self.send_to(node.node_id, msg.clone()).await;
        }
    }
}

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(SEND_QUEUE_CAPACITY);
    let mut bound_node_id: Option<u8> = None;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else { continue };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else { continue };
        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                let _ = tx.try_send(ServerMessage::Error { code: ErrorCode::InvalidJson, message: e.to_string() });
                continue;
            }
        };

        match client_msg {
            ClientMessage::Hello { mac, fw, caps, topo } => {
                let node_id = state.registry.register_node(&mac, "0.0.0.0").await;
                state.registry.set_hello_info(node_id, fw, caps, topo).await;
                let (token, _hash) = state.registry.send_welcome(node_id).await.unwrap();
                bound_node_id = Some(node_id);
                state.senders.write().await.insert(node_id, tx.clone());

                let apply_at_us = (now_ms() + state.config.apply_delta.as_millis() as u64) * 1_000;
                let join = PendingJoin { client_id, node_id, apply_at_us };
                if !state.pending_joins.push(join).await {
                    emit_welcome_and_snapshot(&state, node_id, token, apply_at_us).await;
                } else {
                    // In this single-process hub the "main loop drain" and the
                    // network context share the same async runtime, so there
                    // is no separate thread to hand the join off to. Draining
                    // immediately here keeps behaviour identical to a drained
                    // main loop without introducing a second dispatch path.
                    for pending in state.pending_joins.drain(1).await {
                        emit_welcome_and_snapshot(&state, pending.node_id, token.clone(), pending.apply_at_us).await;
                    }
                }
            }
            ClientMessage::Ka { node_id, token, rssi, loss_pct, drift_us, uptime_s: _ } => {
                if let Err(e) = state.registry.update_keepalive(node_id, &token, rssi, loss_pct, drift_us).await {
                    warn!(node_id, "keepalive error: {e}");
                }
            }
            ClientMessage::TsPing { .. } => {
                // Time-sync pings are answered by the dedicated UDP socket
                // per the external-interfaces contract; a WS-borne ping is
                // not part of this protocol and is ignored.
            }
            ClientMessage::OtaStatus { node_id, state: ota_state_str, pct, error } => {
                let ota_node_state = match ota_state_str.as_str() {
                    "downloading" => lightwave_proto::OtaNodeState::Downloading,
                    "installing" => lightwave_proto::OtaNodeState::Installing,
                    "complete" => lightwave_proto::OtaNodeState::Complete,
                    "error" => lightwave_proto::OtaNodeState::Error,
                    _ => lightwave_proto::OtaNodeState::Idle,
                };
                let _ = state.registry.set_ota_state(node_id, ota_node_state, pct, None, error).await;
                let complete = matches!(ota_node_state, lightwave_proto::OtaNodeState::Complete);
                let is_error = matches!(ota_node_state, lightwave_proto::OtaNodeState::Error);
                let (advanced, version, url, sha256) = {
                    let mut dispatcher = state.dispatcher.write().await;
                    let advanced = dispatcher.on_status(node_id, complete, is_error);
                    (advanced, dispatcher.version.clone(), dispatcher.url.clone(), dispatcher.sha256.clone())
                };
                if let Some(next_node_id) = advanced {
                    state.send_to(next_node_id, ServerMessage::OtaUpdate { version, url, sha256 }).await;
                }
            }
        }
    }

    if let Some(node_id) = bound_node_id {
        info!(node_id, "node websocket disconnected");
        state.registry.disconnect(node_id).await;
        state.senders.write().await.remove(&node_id);
    }
    send_task.abort();
}

async fn emit_welcome_and_snapshot(state: &Arc<AppState>, node_id: u8, token: String, apply_at_us: u64) {
    state
        .send_to(
            node_id,
            ServerMessage::Welcome {
                proto: lightwave_proto::LW_PROTO_VER,
                node_id,
                token,
                udp_port: state.config.udp_port,
                hub_epoch_us: now_ms() * 1_000,
            },
        )
        .await;

    let global = state.store.global_snapshot().await;
    let zones_enabled = state.store.zones_enabled();
    let zones = if zones_enabled { Some(state.store.zones_for_node(node_id).await) } else { None };
    state
        .send_to(node_id, ServerMessage::StateSnapshot { node_id, apply_at_us, zones_enabled, global, zones })
        .await;
}
