//! Node registry: identity, lifecycle state machine, and telemetry for
//! every node that has ever said `hello` this process lifetime.
//!
//! Mirrors the shared-state idiom used throughout the rest of the
//! codebase (`Arc<RwLock<...>>` guarding a plain map, mutated under the
//! shortest possible critical section) rather than anything fancier —
//! the registry is a map with a tick, not a database.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use lightwave_proto::{Capabilities, NodeState, OtaNodeState, Topology};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::RegistryError;

#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub node_id: u8,
    pub mac: String,
    pub ip: String,
    pub token: String,
    pub token_hash: u32,
    pub state: NodeState,
    pub last_seen_ms: u64,
    pub capabilities: Capabilities,
    pub topology: Topology,
    pub fw: String,
    pub rssi: i16,
    pub loss_pct: f32,
    pub drift_us: i64,
    pub time_sync_locked: bool,
    pub udp_sent: u64,
    pub keepalives_received: u64,
    pub ota_state: OtaNodeState,
    pub ota_pct: u8,
    pub ota_version: Option<String>,
    pub ota_error: Option<String>,
}

impl NodeEntry {
    fn new(node_id: u8, mac: String, ip: String, now_ms: u64) -> Self {
        Self {
            node_id,
            mac,
            ip,
            token: String::new(),
            token_hash: 0,
            state: NodeState::Pending,
            last_seen_ms: now_ms,
            capabilities: Capabilities::default(),
            topology: Topology::default(),
            fw: String::new(),
            rssi: 0,
            loss_pct: 0.0,
            drift_us: 0,
            time_sync_locked: false,
            udp_sent: 0,
            keepalives_received: 0,
            ota_state: OtaNodeState::Idle,
            ota_pct: 0,
            ota_version: None,
            ota_error: None,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Opaque per-session token; a fast non-cryptographic hash is sufficient
/// since the hash is only ever compared against itself, echoed verbatim in
/// every data-plane packet rather than used as a security boundary.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub struct Registry {
    entries: RwLock<HashMap<u8, NodeEntry>>,
    mac_to_id: RwLock<HashMap<String, u8>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), mac_to_id: RwLock::new(HashMap::new()) }
    }

    /// Allocates or reuses a node id by `mac`, stamps `lastSeenMs`, and
    /// sets state to `Pending` if this is a fresh entry. Re-joining MACs
    /// reclaim their previous id only if that entry still exists. A
    /// reclaimed `Lost` entry is reset to `Pending` with its token cleared,
    /// so `send_welcome` mints a fresh one instead of handing back a stale
    /// token for a node the sweep already gave up on.
    pub async fn register_node(&self, mac: &str, ip: &str) -> u8 {
        let now = now_ms();
        let mut mac_map = self.mac_to_id.write().await;
        if let Some(&existing_id) = mac_map.get(mac) {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&existing_id) {
                entry.ip = ip.to_string();
                entry.last_seen_ms = now;
                if matches!(entry.state, NodeState::Lost) {
                    entry.state = NodeState::Pending;
                    entry.token.clear();
                    entry.token_hash = 0;
                    info!(node_id = existing_id, mac, "lost node rejoined, resetting to pending");
                } else {
                    info!(node_id = existing_id, mac, "node re-joined, reusing id");
                }
                return existing_id;
            }
        }

        let mut entries = self.entries.write().await;
        let next_id = (1u8..=255).find(|id| !entries.contains_key(id)).unwrap_or(1);
        entries.insert(next_id, NodeEntry::new(next_id, mac.to_string(), ip.to_string(), now));
        mac_map.insert(mac.to_string(), next_id);
        info!(node_id = next_id, mac, "node registered");
        next_id
    }

    /// Transitions `Pending -> Authed`, issuing a fresh token. Idempotent
    /// for an already-`Authed`/`Ready`/`Degraded` node: returns the
    /// existing token rather than minting a new one.
    pub async fn send_welcome(&self, node_id: u8) -> Result<(String, u32), RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&node_id).ok_or(RegistryError::NotFound(node_id))?;
        if matches!(entry.state, NodeState::Pending) {
            entry.token = new_token();
            entry.token_hash = fnv1a_hash(entry.token.as_bytes());
            entry.state = NodeState::Authed;
        }
        Ok((entry.token.clone(), entry.token_hash))
    }

    /// Validates the keepalive's token, refreshes telemetry and
    /// `lastSeenMs`, and lifts `Authed -> Ready` on the first keepalive.
    pub async fn update_keepalive(
        &self,
        node_id: u8,
        token: &str,
        rssi: i16,
        loss_pct: f32,
        drift_us: i64,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&node_id).ok_or(RegistryError::NotFound(node_id))?;
        if entry.token != token {
            warn!(node_id, "keepalive token mismatch, ignoring");
            return Ok(());
        }
        entry.last_seen_ms = now_ms();
        entry.rssi = rssi;
        entry.loss_pct = loss_pct;
        entry.drift_us = drift_us;
        entry.keepalives_received += 1;
        if matches!(entry.state, NodeState::Authed | NodeState::Degraded) {
            entry.state = NodeState::Ready;
        }
        Ok(())
    }

    pub async fn mark_ready(&self, node_id: u8) -> Result<(), RegistryError> {
        self.set_state(node_id, NodeState::Ready).await
    }

    pub async fn mark_degraded(&self, node_id: u8) -> Result<(), RegistryError> {
        self.set_state(node_id, NodeState::Degraded).await
    }

    pub async fn mark_lost(&self, node_id: u8) -> Result<(), RegistryError> {
        self.set_state(node_id, NodeState::Lost).await
    }

    async fn set_state(&self, node_id: u8, state: NodeState) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&node_id).ok_or(RegistryError::NotFound(node_id))?;
        if matches!(entry.state, NodeState::Lost) {
            return Ok(()); // Lost is terminal; no resurrection without a fresh hello.
        }
        entry.state = state;
        Ok(())
    }

    pub async fn set_ota_state(
        &self,
        node_id: u8,
        state: OtaNodeState,
        pct: u8,
        version: Option<String>,
        error: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&node_id).ok_or(RegistryError::NotFound(node_id))?;
        entry.ota_state = state;
        entry.ota_pct = pct;
        if version.is_some() {
            entry.ota_version = version;
        }
        entry.ota_error = error;
        Ok(())
    }

    /// Stamps the firmware/capabilities/topology fields reported in `hello`.
    /// Silently a no-op if the node has since been swept.
    pub async fn set_hello_info(&self, node_id: u8, fw: String, caps: Capabilities, topo: Topology) {
        if let Some(entry) = self.entries.write().await.get_mut(&node_id) {
            entry.fw = fw;
            entry.capabilities = caps;
            entry.topology = topo;
        }
    }

    pub async fn record_udp_sent(&self, node_id: u8) {
        if let Some(entry) = self.entries.write().await.get_mut(&node_id) {
            entry.udp_sent += 1;
        }
    }

    /// Sweeps every entry: `Authed/Ready` silent for `>= t1` degrade;
    /// `Degraded` silent for `>= t2` goes `Lost`; `Lost` entries older than
    /// `t3` since their last activity are garbage-collected entirely.
    ///
    /// `entries` is released before `mac_to_id` is ever touched, so this
    /// never holds both locks at once — `register_node` can take them in
    /// either order without risking an AB/BA deadlock against this sweep.
    pub async fn tick(
        &self,
        now_ms: u64,
        t1_degrade_ms: u64,
        t2_lost_ms: u64,
        t3_gc_ms: u64,
    ) {
        let removed: Vec<(u8, String)> = {
            let mut entries = self.entries.write().await;
            let mut to_remove = Vec::new();
            for entry in entries.values_mut() {
                let silence = now_ms.saturating_sub(entry.last_seen_ms);
                match entry.state {
                    NodeState::Ready if silence >= t1_degrade_ms => {
                        warn!(node_id = entry.node_id, "node silent, degrading");
                        entry.state = NodeState::Degraded;
                    }
                    NodeState::Degraded if silence >= t2_lost_ms => {
                        warn!(node_id = entry.node_id, "node silent past t2, marking lost");
                        entry.state = NodeState::Lost;
                    }
                    NodeState::Lost if silence >= t3_gc_ms => {
                        to_remove.push(entry.node_id);
                    }
                    _ => {}
                }
            }
            to_remove.into_iter().filter_map(|id| entries.remove(&id).map(|e| (id, e.mac))).collect()
        };
        if !removed.is_empty() {
            let mut mac_map = self.mac_to_id.write().await;
            for (node_id, mac) in removed {
                info!(node_id, "swept lost node from registry");
                mac_map.remove(&mac);
            }
        }
    }

    pub async fn get(&self, node_id: u8) -> Option<NodeEntry> {
        self.entries.read().await.get(&node_id).cloned()
    }

    pub async fn for_each_ready(&self) -> Vec<NodeEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| matches!(e.state, NodeState::Ready))
            .cloned()
            .collect()
    }

    pub async fn for_each_authed(&self) -> Vec<NodeEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| matches!(e.state, NodeState::Authed | NodeState::Ready | NodeState::Degraded))
            .cloned()
            .collect()
    }

    pub async fn for_each_all(&self) -> Vec<NodeEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn disconnect(&self, node_id: u8) {
        let _ = self.set_state(node_id, NodeState::Lost).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_monotonicity_follows_dfa() {
        let reg = Registry::new();
        let id = reg.register_node("AA:BB:CC:DD:EE:01", "10.0.0.5").await;
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Pending);

        let (token, _hash) = reg.send_welcome(id).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Authed);

        reg.update_keepalive(id, &token, -40, 0.0, 0).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Ready);

        reg.mark_degraded(id).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Degraded);

        reg.update_keepalive(id, &token, -40, 0.0, 0).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Ready);

        reg.mark_lost(id).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Lost);

        // Lost is terminal: further transitions are no-ops.
        reg.mark_ready(id).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Lost);
    }

    #[tokio::test]
    async fn rejoin_reclaims_same_node_id() {
        let reg = Registry::new();
        let id = reg.register_node("AA:BB:CC:DD:EE:02", "10.0.0.6").await;
        reg.send_welcome(id).await.unwrap();
        reg.mark_lost(id).await.unwrap();

        let id2 = reg.register_node("AA:BB:CC:DD:EE:02", "10.0.0.7").await;
        assert_eq!(id, id2);
    }

    #[tokio::test]
    async fn sweep_transitions_on_silence_then_gc() {
        let reg = Registry::new();
        let id = reg.register_node("AA:BB:CC:DD:EE:03", "10.0.0.8").await;
        let (token, _) = reg.send_welcome(id).await.unwrap();
        reg.update_keepalive(id, &token, -40, 0.0, 0).await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Ready);

        let base = reg.get(id).await.unwrap().last_seen_ms;
        reg.tick(base + 10_000, 5_000, 20_000, 120_000).await;
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Degraded);

        reg.tick(base + 30_000, 5_000, 20_000, 120_000).await;
        assert_eq!(reg.get(id).await.unwrap().state, NodeState::Lost);

        reg.tick(base + 200_000, 5_000, 20_000, 120_000).await;
        assert!(reg.get(id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_node_operations_error_without_mutation() {
        let reg = Registry::new();
        assert!(matches!(reg.mark_ready(200).await, Err(RegistryError::NotFound(200))));
    }
}
