//! Dedicated UDP time-sync socket, separate from fanout, answering
//! monotonic ping/pong with no queueing path. Modelled on the bind-or-warn,
//! loop-forever-without-crashing shape used for the other UDP listener in
//! this codebase: malformed packets are counted and dropped, never
//! propagated as an error that would bring the task down.

use std::sync::atomic::{AtomicU64, Ordering};

use lightwave_proto::{TimeSyncPing, TimeSyncPong};
use tokio::net::UdpSocket;
use tracing::{info, warn};

fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[derive(Default)]
pub struct TimeSyncMetrics {
    pub malformed_dropped: AtomicU64,
    pub ponged: AtomicU64,
}

pub struct TimeSyncServer {
    socket: UdpSocket,
    pub metrics: TimeSyncMetrics,
}

impl TimeSyncServer {
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        info!(port, "time-sync socket bound");
        Ok(Self { socket, metrics: TimeSyncMetrics::default() })
    }

    /// Runs the ping/pong loop forever. Never returns an error: a
    /// malformed packet is counted and dropped, a send failure is logged
    /// and the loop continues.
    pub async fn run(&self) -> ! {
        let mut buf = [0u8; 64];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("time-sync recv error: {e}");
                    continue;
                }
            };
            let t2_us = now_us();

            let ping = match TimeSyncPing::from_bytes(&buf[..len]) {
                Ok(p) => p,
                Err(e) => {
                    self.metrics.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(%e, "dropping malformed time-sync packet");
                    continue;
                }
            };

            let t3_us = now_us();
            let pong = TimeSyncPong {
                proto: ping.proto,
                seq: ping.seq,
                token_hash: ping.token_hash,
                t1_us: ping.t1_us,
                t2_us,
                t3_us,
            };
            if let Err(e) = self.socket.send_to(&pong.to_bytes(), addr).await {
                warn!("time-sync send failed: {e}");
                continue;
            }
            self.metrics.ponged.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic model of the hub side of a time-sync round, used to
    /// check convergence without a real socket.
    fn synthetic_round(t1_us: u64, hub_offset_us: i64, one_way_delay_us: u64) -> (u64, u64) {
        let t2_us = (t1_us as i64 + hub_offset_us) as u64 + one_way_delay_us;
        let t3_us = t2_us + 10; // hub processing time
        (t2_us, t3_us)
    }

    #[test]
    fn theta_and_delta_converge_to_injected_truth() {
        let true_offset_us: i64 = 12_345;
        let true_delay_us: u64 = 500;
        let mut t1 = 1_000_000u64;

        let mut last_theta = 0i64;
        let mut last_delta = 0u64;
        for _ in 0..8 {
            let (t2, t3) = synthetic_round(t1, true_offset_us, true_delay_us);
            let t4 = t3 + true_delay_us + 10;

            let theta = ((t2 as i64 - t1 as i64) + (t3 as i64 - t4 as i64)) / 2;
            let delta = ((t4 - t1) as i64 - (t3 as i64 - t2 as i64)) as u64 / 2;
            last_theta = theta;
            last_delta = delta;
            t1 += 100_000;
        }

        assert!((last_theta - true_offset_us).abs() < 100, "theta={last_theta}");
        assert!(last_delta < true_delay_us + 200, "delta={last_delta}");
    }
}
