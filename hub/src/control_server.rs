//! HTTP diagnostics/OTA admin surface. Every handler is a thin wrapper
//! around the registry, state store, and OTA dispatcher — no business
//! logic lives here beyond request shape validation. The `/ws` upgrade
//! itself, and the per-connection envelope handling it spawns, live in
//! `ws.rs`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::ws::{ws_upgrade, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_origins.trim() == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = state
            .config
            .cors_origins
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    let ota_root = state.config.ota_root.clone();

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/nodes", get(nodes))
        .route("/ota/manifest.json", get(ota_manifest))
        .route("/ota/rollout", post(ota_rollout))
        .route("/ota/abort", post(ota_abort))
        .route("/ota/state", get(ota_state))
        .nest_service("/ota/bin", ServeDir::new(ota_root))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let startup = crate::STARTUP_MS.load(std::sync::atomic::Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_ms - startup) / 1000 } else { 0 };
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION"), "uptimeSecs": uptime_secs }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let nodes = state.registry.for_each_all().await;
    let ready = nodes.iter().filter(|n| matches!(n.state, lightwave_proto::NodeState::Ready)).count();
    Json(json!({
        "totalNodes": nodes.len(),
        "readyNodes": ready,
    }))
}

async fn nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let nodes = state.registry.for_each_all().await;
    let view: Vec<_> = nodes
        .into_iter()
        .map(|n| {
            json!({
                "nodeId": n.node_id,
                "mac": n.mac,
                "ip": n.ip,
                "state": n.state,
                "rssi": n.rssi,
                "lossPct": n.loss_pct,
                "driftUs": n.drift_us,
                "otaState": n.ota_state,
                "otaPct": n.ota_pct,
            })
        })
        .collect();
    Json(json!({ "nodes": view }))
}

async fn ota_manifest(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let _ota = state.ota.read().await;
    Json(json!({ "ok": true }))
}

#[derive(serde::Deserialize)]
struct RolloutQuery {
    track: String,
    node: Option<String>,
}

async fn ota_rollout(State(state): State<Arc<AppState>>, Query(q): Query<RolloutQuery>) -> impl IntoResponse {
    let release = {
        let ota = state.ota.read().await;
        let Some(release) = ota.release("esp32", &q.track) else {
            return (axum::http::StatusCode::BAD_REQUEST, Json(json!({ "error": "unknown track" })));
        };
        release.clone()
    };
    let node_ids: Vec<u8> = match q.node {
        Some(n) => n.split(',').filter_map(|s| s.parse().ok()).collect(),
        None => state.registry.for_each_ready().await.into_iter().map(|n| n.node_id).collect(),
    };

    let first_node = {
        let mut dispatcher = state.dispatcher.write().await;
        dispatcher.start_rollout(&release, node_ids);
        dispatcher.current_node()
    };
    if let Some(node_id) = first_node {
        state
            .send_to(
                node_id,
                lightwave_proto::ws::ServerMessage::OtaUpdate {
                    version: release.version,
                    url: release.url,
                    sha256: release.sha256,
                },
            )
            .await;
    }
    (axum::http::StatusCode::OK, Json(json!({ "ok": true })))
}

async fn ota_abort(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.dispatcher.write().await.abort();
    Json(json!({ "ok": true }))
}

async fn ota_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dispatcher = state.dispatcher.read().await;
    Json(json!({
        "currentNode": dispatcher.current_node(),
        "version": dispatcher.version,
    }))
}
