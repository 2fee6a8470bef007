//! Fixed-capacity queue decoupling the async WebSocket `hello` callback
//! from the main loop that actually emits `welcome` + `state.snapshot`.
//! Bounded at 4 entries; on overflow the caller falls back to sending
//! inline (with a warning) rather than blocking the network context.

use tokio::sync::Mutex;
use tracing::warn;

pub const PENDING_JOIN_CAPACITY: usize = 4;

#[derive(Debug, Clone)]
pub struct PendingJoin {
    pub client_id: u64,
    pub node_id: u8,
    pub apply_at_us: u64,
}

pub struct PendingJoinRing {
    queue: Mutex<Vec<PendingJoin>>,
}

impl Default for PendingJoinRing {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingJoinRing {
    pub fn new() -> Self {
        Self { queue: Mutex::new(Vec::with_capacity(PENDING_JOIN_CAPACITY)) }
    }

    /// Returns `true` if the join was enqueued, `false` if the ring is
    /// full and the caller must fall back to an inline send.
    pub async fn push(&self, join: PendingJoin) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.len() >= PENDING_JOIN_CAPACITY {
            warn!(node_id = join.node_id, "pending-join ring full, falling back to inline send");
            return false;
        }
        queue.push(join);
        true
    }

    /// Drains up to `max` pending joins for the main loop to process.
    pub async fn drain(&self, max: usize) -> Vec<PendingJoin> {
        let mut queue = self.queue.lock().await;
        let n = max.min(queue.len());
        queue.drain(0..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_falls_back_to_inline() {
        let ring = PendingJoinRing::new();
        for i in 0..PENDING_JOIN_CAPACITY as u8 {
            assert!(ring.push(PendingJoin { client_id: i as u64, node_id: i, apply_at_us: 0 }).await);
        }
        assert!(!ring.push(PendingJoin { client_id: 99, node_id: 99, apply_at_us: 0 }).await);
    }

    #[tokio::test]
    async fn drain_respects_max_and_order() {
        let ring = PendingJoinRing::new();
        ring.push(PendingJoin { client_id: 1, node_id: 1, apply_at_us: 0 }).await;
        ring.push(PendingJoin { client_id: 2, node_id: 2, apply_at_us: 0 }).await;
        let drained = ring.drain(1).await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].node_id, 1);
        let rest = ring.drain(10).await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].node_id, 2);
    }
}
