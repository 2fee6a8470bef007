//! Process configuration, read once at startup from environment variables
//! with sensible defaults — no CLI flag parser, matching the hub's own
//! existing `main()` style (`PORT`, `CORS_ORIGINS`, `BACKEND_MODE` read
//! directly via `std::env::var`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// HTTP + WebSocket control-plane port.
    pub port: u16,
    /// UDP fanout (data-plane) port.
    pub udp_port: u16,
    /// UDP time-sync port, distinct from fanout.
    pub ts_udp_port: u16,
    /// SoftAP SSID (network bring-up is a named external collaborator;
    /// this is passed straight through to it).
    pub softap_ssid: String,
    pub softap_passphrase: String,
    /// `applyAt` lead time added to every outbound scheduled change.
    pub apply_delta: Duration,
    /// Registry sweep thresholds.
    pub t1_degrade: Duration,
    pub t2_lost: Duration,
    pub t3_gc: Duration,
    /// Root directory for OTA manifests/binaries.
    pub ota_root: String,
    /// Root directory for the KV persistence store.
    pub kv_root: String,
    /// CORS origins, comma-separated, or `*`.
    pub cors_origins: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            udp_port: 7000,
            ts_udp_port: 7001,
            softap_ssid: "LightwaveOS".to_string(),
            softap_passphrase: "lightwave".to_string(),
            apply_delta: Duration::from_millis(200),
            t1_degrade: Duration::from_secs(5),
            t2_lost: Duration::from_secs(20),
            t3_gc: Duration::from_secs(120),
            ota_root: "./ota".to_string(),
            kv_root: "./data".to_string(),
            cors_origins: "*".to_string(),
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_u16("PORT", defaults.port),
            udp_port: env_u16("LW_UDP_PORT", defaults.udp_port),
            ts_udp_port: env_u16("LW_TS_UDP_PORT", defaults.ts_udp_port),
            softap_ssid: std::env::var("LW_SOFTAP_SSID").unwrap_or(defaults.softap_ssid),
            softap_passphrase: std::env::var("LW_SOFTAP_PASSPHRASE")
                .unwrap_or(defaults.softap_passphrase),
            apply_delta: Duration::from_millis(env_u64("LW_APPLY_DELTA_MS", 200)),
            t1_degrade: Duration::from_millis(env_u64("LW_T1_MS", 5_000)),
            t2_lost: Duration::from_millis(env_u64("LW_T2_MS", 20_000)),
            t3_gc: Duration::from_millis(env_u64("LW_T3_MS", 120_000)),
            ota_root: std::env::var("LW_OTA_ROOT").unwrap_or(defaults.ota_root),
            kv_root: std::env::var("LW_KV_ROOT").unwrap_or(defaults.kv_root),
            cors_origins: std::env::var("CORS_ORIGINS").unwrap_or(defaults.cors_origins),
        }
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
