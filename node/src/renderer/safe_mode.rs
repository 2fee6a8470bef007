//! Fail-safe supervision: a crash counter persisted across restarts under
//! the `ota` namespace, entering safe mode (effect 0 forced, nothing else
//! accepted) after too many consecutive faults, and clearing back to normal
//! operation once the node has run stably for long enough.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::persistence::{namespaces, KvStore};

const CRASH_COUNTER_KEY: &str = "crash_counter";
const MAX_CONSECUTIVE_FAULTS: u32 = 3;
const STABLE_RESET_AFTER: Duration = Duration::from_secs(5 * 60);

pub struct SafeModeSupervisor {
    consecutive_faults: AtomicU32,
    stable_ms: AtomicU32,
    forced: std::sync::atomic::AtomicBool,
}

impl SafeModeSupervisor {
    /// Loads the persisted crash counter, entering safe mode immediately if
    /// the last run left it at or above the threshold — a node that
    /// repeatedly crashes on boot must not keep retrying the effect that
    /// crashed it.
    pub async fn load(store: &KvStore) -> Self {
        let count = match store.get(namespaces::OTA, CRASH_COUNTER_KEY).await {
            Some(bytes) => String::from_utf8_lossy(&bytes).trim().parse::<u32>().unwrap_or(0),
            None => 0,
        };
        Self {
            consecutive_faults: AtomicU32::new(count),
            stable_ms: AtomicU32::new(0),
            forced: std::sync::atomic::AtomicBool::new(count >= MAX_CONSECUTIVE_FAULTS),
        }
    }

    pub fn in_safe_mode(&self) -> bool {
        self.forced.load(Ordering::Relaxed)
    }

    /// Called once per frame by the render loop. `faulted` is true when the
    /// frame just rendered raised a recoverable panic (caught via
    /// `catch_unwind` at the call site) or produced a detectably invalid
    /// buffer.
    pub async fn observe_frame(&self, faulted: bool, dt: f32, store: &KvStore) {
        if faulted {
            let count = self.consecutive_faults.fetch_add(1, Ordering::Relaxed) + 1;
            self.stable_ms.store(0, Ordering::Relaxed);
            store.set(namespaces::OTA, CRASH_COUNTER_KEY, count.to_string().into_bytes()).await;
            if count >= MAX_CONSECUTIVE_FAULTS {
                self.forced.store(true, Ordering::Relaxed);
            }
            return;
        }

        if self.consecutive_faults.load(Ordering::Relaxed) == 0 {
            return;
        }
        let elapsed_ms = (dt.max(0.0) * 1000.0) as u32;
        let stable_ms = self.stable_ms.fetch_add(elapsed_ms, Ordering::Relaxed) + elapsed_ms;
        if stable_ms >= STABLE_RESET_AFTER.as_millis() as u32 {
            self.consecutive_faults.store(0, Ordering::Relaxed);
            self.forced.store(false, Ordering::Relaxed);
            store.set(namespaces::OTA, CRASH_COUNTER_KEY, b"0".to_vec()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> KvStore {
        let dir = std::env::temp_dir().join(format!("lw-safemode-test-{}", std::process::id()));
        KvStore::open(&dir).await
    }

    #[tokio::test]
    async fn repeated_faults_force_safe_mode() {
        let store = store().await;
        let supervisor = SafeModeSupervisor::load(&store).await;
        for _ in 0..MAX_CONSECUTIVE_FAULTS {
            supervisor.observe_frame(true, 1.0 / 60.0, &store).await;
        }
        assert!(supervisor.in_safe_mode());
    }

    #[tokio::test]
    async fn fresh_node_is_not_in_safe_mode() {
        let store = store().await;
        let supervisor = SafeModeSupervisor::load(&store).await;
        assert!(!supervisor.in_safe_mode());
    }
}
