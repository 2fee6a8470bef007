//! Key-value/blob persistence, standing in for the NVS/LittleFS store a
//! real node would use. Reads are served from an in-memory cache; writes
//! mark a key dirty and a background task flushes dirty keys to disk on a
//! debounced interval, the same "never block the caller on I/O, never
//! crash on a bad file" shape as the rest of the codebase's persistence
//! layer.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::warn;

#[derive(Default)]
struct Cache {
    values: HashMap<(String, String), Vec<u8>>,
    dirty: HashSet<(String, String)>,
}

pub struct KvStore {
    root: PathBuf,
    cache: RwLock<Cache>,
}

impl KvStore {
    pub async fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut cache = Cache::default();
        if let Ok(mut namespaces) = tokio::fs::read_dir(&root).await {
            while let Ok(Some(ns_entry)) = namespaces.next_entry().await {
                let ns_path = ns_entry.path();
                if !ns_path.is_dir() {
                    continue;
                }
                let ns = ns_entry.file_name().to_string_lossy().to_string();
                if let Ok(mut files) = tokio::fs::read_dir(&ns_path).await {
                    while let Ok(Some(f)) = files.next_entry().await {
                        let path = f.path();
                        if path.extension().and_then(|e| e.to_str()) != Some("json") {
                            continue;
                        }
                        let key = path.file_stem().unwrap_or_default().to_string_lossy().to_string();
                        match tokio::fs::read(&path).await {
                            Ok(bytes) => {
                                cache.values.insert((ns.clone(), key), bytes);
                            }
                            Err(e) => warn!(?path, "failed to read kv entry: {e}, skipping"),
                        }
                    }
                }
            }
        }
        Self { root, cache: RwLock::new(cache) }
    }

    pub async fn get(&self, ns: &str, key: &str) -> Option<Vec<u8>> {
        self.cache.read().await.values.get(&(ns.to_string(), key.to_string())).cloned()
    }

    pub async fn set(&self, ns: &str, key: &str, value: Vec<u8>) {
        let mut cache = self.cache.write().await;
        let k = (ns.to_string(), key.to_string());
        cache.values.insert(k.clone(), value);
        cache.dirty.insert(k);
    }

    pub async fn remove(&self, ns: &str, key: &str) {
        let mut cache = self.cache.write().await;
        let k = (ns.to_string(), key.to_string());
        cache.values.remove(&k);
        cache.dirty.insert(k);
    }

    /// Flushes every dirty key to `<root>/<ns>/<key>.json`. Invalid or
    /// unwritable entries are logged and skipped rather than aborting the
    /// whole flush — a corrupt namespace never takes down the others.
    pub async fn flush(&self) {
        let dirty: Vec<(String, String)> = {
            let mut cache = self.cache.write().await;
            cache.dirty.drain().collect()
        };
        for (ns, key) in dirty {
            let value = self.cache.read().await.values.get(&(ns.clone(), key.clone())).cloned();
            let dir = self.root.join(&ns);
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                warn!(ns, "failed to create kv namespace dir: {e}");
                continue;
            }
            let path = path_for(&dir, &key);
            match value {
                Some(bytes) => {
                    if let Err(e) = tokio::fs::write(&path, &bytes).await {
                        warn!(?path, "failed to flush kv entry: {e}");
                    }
                }
                None => {
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
    }

    pub async fn run_debounced_flush(&self, period: std::time::Duration) -> ! {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            self.flush().await;
        }
    }
}

fn path_for(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

/// Convenience helpers for the well-known namespaces from the external
/// interfaces: `cfg` (global params/zone layout/enable flags), `presets`
/// (slot 0..N), `ota` (last-applied version, crash counter).
pub mod namespaces {
    pub const CFG: &str = "cfg";
    pub const PRESETS: &str = "presets";
    pub const OTA: &str = "ota";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips_before_flush() {
        let dir = std::env::temp_dir().join(format!("lw-kv-test-{}", uuid::Uuid::new_v4()));
        let store = KvStore::open(&dir).await;
        store.set("cfg", "global", b"{\"brightness\":128}".to_vec()).await;
        assert_eq!(store.get("cfg", "global").await.unwrap(), b"{\"brightness\":128}");
    }

    #[tokio::test]
    async fn flush_persists_and_reopen_reloads() {
        let dir = std::env::temp_dir().join(format!("lw-kv-test-{}", uuid::Uuid::new_v4()));
        {
            let store = KvStore::open(&dir).await;
            store.set("presets", "0", b"slot-data".to_vec()).await;
            store.flush().await;
        }
        let reopened = KvStore::open(&dir).await;
        assert_eq!(reopened.get("presets", "0").await.unwrap(), b"slot-data");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn missing_namespace_yields_none_not_panic() {
        let dir = std::env::temp_dir().join(format!("lw-kv-test-{}", uuid::Uuid::new_v4()));
        let store = KvStore::open(&dir).await;
        assert!(store.get("ota", "crash_counter").await.is_none());
    }
}
