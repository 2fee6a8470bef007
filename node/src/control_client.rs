//! Everything that connects this node to the hub: the WebSocket control
//! channel (`hello`/`ka`/`ota_status` out, snapshots/deltas in) and the two
//! dedicated UDP sockets — time-sync ping/pong and the 100 Hz fanout
//! receiver. Reconnection is the caller's problem only in the sense that
//! `run` never returns except on an unrecoverable local error; a dropped
//! connection or socket error is logged and retried with backoff.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lightwave_proto::ws::{ClientMessage, ServerMessage};
use lightwave_proto::{Capabilities, TimeSyncPing, TimeSyncPong, Topology};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::scheduler::ApplyScheduler;

const RECONNECT_MIN_BACKOFF: Duration = Duration::from_millis(500);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(10);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(2);
const TIME_SYNC_PERIOD: Duration = Duration::from_millis(200);

fn now_us() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

/// Everything the node announces about itself in `hello`.
#[derive(Clone)]
pub struct NodeIdentity {
    pub mac: String,
    pub fw: String,
    pub caps: Capabilities,
    pub topo: Topology,
}

/// Hub clock offset estimate, updated by the time-sync task and read by
/// whichever code stamps outgoing `applyAt` comparisons.
#[derive(Default)]
pub struct TimeSyncState {
    hub_offset_us: AtomicI64,
    one_way_delay_us: AtomicI64,
    locked: AtomicBool,
}

const LOCK_DELAY_BOUND_US: i64 = 5_000;

impl TimeSyncState {
    pub fn hub_offset_us(&self) -> i64 {
        self.hub_offset_us.load(Ordering::Relaxed)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn observe(&self, theta_us: i64, delta_us: i64) {
        let prev = self.hub_offset_us.load(Ordering::Relaxed);
        let smoothed = prev + (theta_us - prev) / 4;
        self.hub_offset_us.store(smoothed, Ordering::Relaxed);
        self.one_way_delay_us.store(delta_us, Ordering::Relaxed);
        self.locked.store(delta_us.abs() < LOCK_DELAY_BOUND_US, Ordering::Relaxed);
    }
}

/// `θ = ((t2-t1)+(t3-t4))/2`, `δ = ((t4-t1)-(t3-t2))/2`, per the node-side
/// round defined for the dedicated time-sync socket.
pub fn estimate_offset_and_delay(t1_us: u64, t2_us: u64, t3_us: u64, t4_us: u64) -> (i64, i64) {
    let t1 = t1_us as i64;
    let t2 = t2_us as i64;
    let t3 = t3_us as i64;
    let t4 = t4_us as i64;
    let theta = ((t2 - t1) + (t3 - t4)) / 2;
    let delta = ((t4 - t1) - (t3 - t2)) / 2;
    (theta, delta)
}

pub struct ControlClient {
    pub ws_url: Url,
    pub identity: NodeIdentity,
}

impl ControlClient {
    /// Reconnects forever with exponential backoff. Each session is
    /// independent: a fresh `hello` is sent every time the socket reopens,
    /// and the token from that session's `welcome` is what every `ka` in
    /// that session echoes back.
    pub async fn run(&self, scheduler: Arc<Mutex<ApplyScheduler>>, assigned_node_id: Arc<std::sync::atomic::AtomicU8>) -> ! {
        let assigned_token = Arc::new(Mutex::new(String::new()));
        let mut backoff = RECONNECT_MIN_BACKOFF;
        loop {
            match self.connect_once(&scheduler, &assigned_node_id, &assigned_token).await {
                Ok(()) => {
                    info!("control connection closed cleanly, reconnecting");
                    backoff = RECONNECT_MIN_BACKOFF;
                }
                Err(e) => {
                    warn!("control connection error: {e}, retrying in {backoff:?}");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
        }
    }

    async fn connect_once(
        &self,
        scheduler: &Arc<Mutex<ApplyScheduler>>,
        assigned_node_id: &Arc<std::sync::atomic::AtomicU8>,
        assigned_token: &Arc<Mutex<String>>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.ws_url.as_str()).await?;
        info!(url = %self.ws_url, "connected to hub");
        let (mut write, mut read) = ws_stream.split();

        send_json(&mut write, &ClientMessage::Hello {
            mac: self.identity.mac.clone(),
            fw: self.identity.fw.clone(),
            caps: self.identity.caps,
            topo: self.identity.topo,
        })
        .await?;

        let mut ka_ticker = tokio::time::interval(KEEPALIVE_PERIOD);
        ka_ticker.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                _ = ka_ticker.tick() => {
                    let ka = ClientMessage::Ka {
                        node_id: assigned_node_id.load(Ordering::Relaxed),
                        token: assigned_token.lock().await.clone(),
                        rssi: -50,
                        loss_pct: 0.0,
                        drift_us: 0,
                        uptime_s: 0,
                    };
                    if let Err(e) = send_json(&mut write, &ka).await {
                        warn!("keepalive send failed: {e}");
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let msg = msg?;
                    if let Message::Text(text) = msg {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(server_msg) => self.handle_server_message(server_msg, scheduler, assigned_node_id, assigned_token).await,
                            Err(e) => warn!("failed to parse server message: {e}"),
                        }
                    }
                }
            }
        }
    }

    async fn handle_server_message(
        &self,
        msg: ServerMessage,
        scheduler: &Arc<Mutex<ApplyScheduler>>,
        assigned_node_id: &Arc<std::sync::atomic::AtomicU8>,
        assigned_token: &Arc<Mutex<String>>,
    ) {
        match msg {
            ServerMessage::Welcome { node_id, token, .. } => {
                assigned_node_id.store(node_id, Ordering::Relaxed);
                *assigned_token.lock().await = token;
                info!(node_id, "welcomed by hub");
            }
            ServerMessage::StateSnapshot { apply_at_us, global, .. } => {
                let mut sched = scheduler.lock().await;
                sched.schedule_effect(global.effect_id, apply_at_us);
                sched.schedule_parameters(
                    &lightwave_proto::ws::ParametersSetFields {
                        brightness: Some(global.brightness),
                        speed: Some(global.speed),
                        palette_id: Some(global.palette_id),
                        hue: Some(global.hue),
                        intensity: Some(global.intensity),
                        saturation: Some(global.saturation),
                        complexity: Some(global.complexity),
                        variation: Some(global.variation),
                    },
                    apply_at_us,
                );
            }
            ServerMessage::EffectsSetCurrent { effect_id, apply_at_us } => {
                scheduler.lock().await.schedule_effect(effect_id, apply_at_us);
            }
            ServerMessage::ParametersSet { apply_at_us, fields } => {
                scheduler.lock().await.schedule_parameters(&fields, apply_at_us);
            }
            ServerMessage::ZonesUpdate { zone_id, apply_at_us, fields } => {
                scheduler.lock().await.schedule_zone(zone_id, &fields, apply_at_us);
            }
            ServerMessage::TsPong { .. } => {
                debug!("ts_pong received over control channel, ignored (time sync is UDP-only)");
            }
            ServerMessage::OtaUpdate { version, url, sha256 } => {
                info!(version, url, sha256, "ota update announced");
            }
            ServerMessage::Error { code, message } => {
                warn!(?code, message, "hub reported an error");
            }
        }
    }
}

async fn send_json<S>(
    sink: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    msg: &S,
) -> anyhow::Result<()>
where
    S: serde::Serialize,
{
    let text = serde_json::to_string(msg)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

/// Runs the node side of the dedicated time-sync socket forever: send a
/// ping, wait for the matching pong, fold the result into `state`. A
/// dropped reply or malformed pong is logged and the round simply
/// contributes nothing rather than blocking the next one.
pub async fn run_time_sync_client(hub_addr: SocketAddr, token_hash: u32, state: Arc<TimeSyncState>) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect(hub_addr).await?;
    let mut seq: u32 = 0;
    let mut buf = [0u8; 64];
    loop {
        let t1_us = now_us();
        let ping = TimeSyncPing { proto: lightwave_proto::LW_PROTO_VER, seq, token_hash, t1_us };
        if let Err(e) = socket.send(&ping.to_bytes()).await {
            warn!("time-sync ping send failed: {e}");
            tokio::time::sleep(TIME_SYNC_PERIOD).await;
            continue;
        }

        match tokio::time::timeout(TIME_SYNC_PERIOD, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                let t4_us = now_us();
                match TimeSyncPong::from_bytes(&buf[..len]) {
                    Ok(pong) if pong.seq == seq => {
                        let (theta, delta) = estimate_offset_and_delay(pong.t1_us, pong.t2_us, pong.t3_us, t4_us);
                        state.observe(theta, delta);
                    }
                    Ok(_) => debug!("stale time-sync pong ignored"),
                    Err(e) => warn!("malformed time-sync pong: {e}"),
                }
            }
            Ok(Err(e)) => warn!("time-sync recv error: {e}"),
            Err(_) => debug!("time-sync round timed out"),
        }

        seq = seq.wrapping_add(1);
        tokio::time::sleep(TIME_SYNC_PERIOD).await;
    }
}

/// Receives 100 Hz `PARAM_DELTA` fanout packets and folds each into the
/// scheduler exactly like a `parameters.set`/`effects.setCurrent` pair,
/// since the data plane carries the same authoritative snapshot as the
/// control plane, just with tighter timing.
pub async fn run_fanout_receiver(bind_port: u16, scheduler: Arc<Mutex<ApplyScheduler>>) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", bind_port)).await?;
    let mut buf = [0u8; 128];
    let mut last_seq: Option<u32> = None;
    loop {
        let (len, _addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("fanout recv error: {e}");
                continue;
            }
        };
        let packet = match lightwave_proto::ShowPacket::from_bytes(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                debug!("dropping malformed fanout packet: {e}");
                continue;
            }
        };
        if let Some(prev) = last_seq {
            if packet.header.seq < prev {
                continue; // older packet reordered in flight, ignore
            }
        }
        last_seq = Some(packet.header.seq);

        let apply_at_us = packet.header.apply_at_us;
        let mut sched = scheduler.lock().await;
        sched.schedule_effect(packet.payload.effect_id, apply_at_us);
        sched.schedule_parameters(
            &lightwave_proto::ws::ParametersSetFields {
                brightness: Some(packet.payload.brightness),
                speed: Some(packet.payload.speed),
                palette_id: Some(packet.payload.palette_id),
                hue: Some(packet.payload.hue as u8),
                intensity: None,
                saturation: None,
                complexity: None,
                variation: None,
            },
            apply_at_us,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_delay_match_the_synthetic_round() {
        let (theta, delta) = estimate_offset_and_delay(1_000_000, 1_012_500, 1_012_510, 1_025_000);
        assert!((theta - 12_505).abs() < 10, "theta={theta}");
        assert!(delta < 20, "delta={delta}");
    }

    #[test]
    fn state_locks_once_delay_is_small() {
        let state = TimeSyncState::default();
        state.observe(100, 50);
        assert!(state.is_locked());
        state.observe(100, 50_000);
        assert!(!state.is_locked());
    }
}
