//! 100 Hz show-clock fanout: the data-plane UDP broadcast of the
//! authoritative snapshot to every `Ready` node. Stateless with respect to
//! parameter deltas — every packet carries the full current snapshot, so a
//! node that just joined or dropped a packet is never left stale for more
//! than one tick.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lightwave_proto::{ParamDelta, ShowPacket};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::registry::{now_ms, Registry};
use crate::state_store::StateStore;

pub const FANOUT_PERIOD: Duration = Duration::from_millis(10);

pub struct Fanout {
    socket: UdpSocket,
    seq: AtomicU32,
}

impl Fanout {
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(Self { socket, seq: AtomicU32::new(0) })
    }

    /// Runs the 100 Hz tick loop forever. `node_addr` resolves a node id to
    /// its UDP socket address; nodes without a known address are skipped
    /// for this tick (the next tick will pick them up once known).
    pub async fn run(
        &self,
        registry: Arc<Registry>,
        store: Arc<StateStore>,
        apply_delta: Duration,
        node_addr: impl Fn(u8) -> Option<SocketAddr>,
    ) -> ! {
        let mut interval = tokio::time::interval(FANOUT_PERIOD);
        let mut last_tick_ms = now_ms();
        loop {
            interval.tick().await;
            let now = now_ms();
            if now.saturating_sub(last_tick_ms) > 2 * FANOUT_PERIOD.as_millis() as u64 {
                warn!(overrun_ms = now - last_tick_ms, "fanout tick overrun");
            }
            last_tick_ms = now;

            let global = store.global_snapshot().await;
            let hub_now_us = now * 1_000;
            let apply_at_us = hub_now_us + apply_delta.as_micros() as u64;
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);

            for node in registry.for_each_ready().await {
                if node.token_hash == 0 {
                    continue; // Not yet authenticated on the data plane.
                }
                let Some(addr) = node_addr(node.node_id) else { continue };
                let packet = ShowPacket::new(
                    seq,
                    node.token_hash,
                    hub_now_us,
                    apply_at_us,
                    ParamDelta {
                        effect_id: global.effect_id,
                        palette_id: global.palette_id,
                        brightness: global.brightness,
                        speed: global.speed,
                        hue: global.hue as u16,
                    },
                );
                match self.socket.send_to(&packet.to_bytes(), addr).await {
                    Ok(_) => {
                        registry.record_udp_sent(node.node_id).await;
                        debug!(node_id = node.node_id, seq, "fanout packet sent");
                    }
                    Err(e) => warn!(node_id = node.node_id, "fanout send failed: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_increments_monotonically() {
        let seq = AtomicU32::new(0);
        let a = seq.fetch_add(1, Ordering::Relaxed);
        let b = seq.fetch_add(1, Ordering::Relaxed);
        assert!(b > a);
    }
}
