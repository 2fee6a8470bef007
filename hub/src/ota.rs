//! OTA manifest repository and rollout dispatcher. The dispatcher is a
//! small explicit state machine in the same style as the tick-based
//! sequencer elsewhere in this codebase: `Idle -> InProgress -> Complete |
//! Aborted`, advanced one node at a time rather than modelled as a web of
//! callbacks.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// `platforms.<platform>.releases.<track>`
    pub platforms: HashMap<String, PlatformReleases>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformReleases {
    pub releases: HashMap<String, Release>,
}

pub struct OtaRepository {
    root: PathBuf,
    manifest: Manifest,
}

impl OtaRepository {
    pub async fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let manifest_path = root.join("manifest.json");
        let manifest = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("failed to parse ota manifest: {e}, using empty manifest");
                Manifest::default()
            }),
            Err(_) => {
                info!("no ota manifest found at {:?}, starting empty", manifest_path);
                Manifest::default()
            }
        };
        Self { root, manifest }
    }

    pub fn release(&self, platform: &str, track: &str) -> Option<&Release> {
        self.manifest.platforms.get(platform)?.releases.get(track)
    }

    /// Resolves a requested binary path under the OTA root, rejecting any
    /// path containing a `..` component or escaping the root.
    pub fn resolve_binary(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        if rel.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir)) {
            warn!(relative, "rejected ota binary path (traversal attempt)");
            return None;
        }
        let full = self.root.join(rel);
        Some(full)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRolloutStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    InProgress { node_list: Vec<u8>, current_idx: usize },
    Complete,
    Aborted,
}

pub struct Dispatcher {
    pub state: DispatchState,
    pub node_status: HashMap<u8, NodeRolloutStatus>,
    pub version: String,
    pub url: String,
    pub sha256: String,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            state: DispatchState::Idle,
            node_status: HashMap::new(),
            version: String::new(),
            url: String::new(),
            sha256: String::new(),
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_rollout(&mut self, release: &Release, node_ids: Vec<u8>) {
        self.version = release.version.clone();
        self.url = release.url.clone();
        self.sha256 = release.sha256.clone();
        self.node_status = node_ids.iter().map(|&id| (id, NodeRolloutStatus::Pending)).collect();
        if let Some(&first) = node_ids.first() {
            self.node_status.insert(first, NodeRolloutStatus::InProgress);
        }
        self.state = DispatchState::InProgress { node_list: node_ids, current_idx: 0 };
        info!(version = %self.version, "ota rollout started");
    }

    /// `error` advances to the next node rather than aborting — a single
    /// node's failure does not stop the fleet rollout. Returns the node id
    /// the rollout advanced to, if any, so the caller can send it
    /// `ota_update` — the dispatcher only tracks state transitions, it does
    /// not hold a reference to `AppState::send_to` itself.
    pub fn on_status(&mut self, node_id: u8, complete: bool, error: bool) -> Option<u8> {
        let (node_list, current_idx) = match &mut self.state {
            DispatchState::InProgress { node_list, current_idx } => (node_list, current_idx),
            _ => return None,
        };

        if error {
            self.node_status.insert(node_id, NodeRolloutStatus::Error);
            warn!(node_id, "ota node reported error, continuing rollout");
            Self::advance(node_list, current_idx, &mut self.node_status, &mut self.state)
        } else if complete {
            self.node_status.insert(node_id, NodeRolloutStatus::Complete);
            Self::advance(node_list, current_idx, &mut self.node_status, &mut self.state)
        } else {
            None
        }
    }

    fn advance(
        node_list: &[u8],
        current_idx: &mut usize,
        node_status: &mut HashMap<u8, NodeRolloutStatus>,
        state: &mut DispatchState,
    ) -> Option<u8> {
        *current_idx += 1;
        if *current_idx >= node_list.len() {
            *state = DispatchState::Complete;
            info!("ota rollout complete");
            return None;
        }
        let next = node_list[*current_idx];
        node_status.insert(next, NodeRolloutStatus::InProgress);
        Some(next)
    }

    pub fn current_node(&self) -> Option<u8> {
        match &self.state {
            DispatchState::InProgress { node_list, current_idx } => node_list.get(*current_idx).copied(),
            _ => None,
        }
    }

    /// Transitions to `Aborted` regardless of current state.
    pub fn abort(&mut self) {
        self.state = DispatchState::Aborted;
        warn!("ota rollout aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release {
        Release { version: "1.2.0".into(), url: "v1.2.0/node.bin".into(), sha256: "deadbeef".into(), size: 4096 }
    }

    #[test]
    fn error_on_one_node_does_not_abort_rollout() {
        let mut d = Dispatcher::new();
        d.start_rollout(&release(), vec![1, 2, 3]);
        let advanced = d.on_status(1, false, true);
        assert_eq!(advanced, Some(2));
        assert_eq!(d.node_status[&1], NodeRolloutStatus::Error);
        assert_eq!(d.current_node(), Some(2));
        assert!(matches!(d.state, DispatchState::InProgress { .. }));
    }

    #[test]
    fn rollout_completes_after_last_node() {
        let mut d = Dispatcher::new();
        d.start_rollout(&release(), vec![1, 2]);
        d.on_status(1, true, false);
        d.on_status(2, true, false);
        assert_eq!(d.state, DispatchState::Complete);
    }

    #[test]
    fn abort_works_from_any_state() {
        let mut d = Dispatcher::new();
        d.abort();
        assert_eq!(d.state, DispatchState::Aborted);
        d.start_rollout(&release(), vec![1]);
        d.abort();
        assert_eq!(d.state, DispatchState::Aborted);
    }

    #[test]
    fn binary_path_traversal_rejected() {
        let repo = OtaRepository { root: PathBuf::from("/ota"), manifest: Manifest::default() };
        assert!(repo.resolve_binary("../../etc/passwd").is_none());
        assert!(repo.resolve_binary("v1.2.0/node.bin").is_some());
    }
}
