//! Process configuration, read once at startup from environment variables
//! with sensible defaults, matching the hub's own env-var-driven config.

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hub WebSocket control-plane URL.
    pub hub_ws_url: String,
    /// Hub's dedicated time-sync UDP port.
    pub hub_ts_port: u16,
    /// Local port this node listens on for 100 Hz fanout packets.
    pub fanout_listen_port: u16,
    pub mac: String,
    pub fw_version: String,
    /// Root directory for the KV persistence store.
    pub kv_root: String,
    pub sample_rate_hz: f32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hub_ws_url: "ws://192.168.4.1:8080/ws".to_string(),
            hub_ts_port: 7001,
            fanout_listen_port: 7000,
            mac: "AA:BB:CC:DD:EE:01".to_string(),
            fw_version: env!("CARGO_PKG_VERSION").to_string(),
            kv_root: "./node-data".to_string(),
            sample_rate_hz: 44_100.0,
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hub_ws_url: std::env::var("LW_HUB_WS_URL").unwrap_or(defaults.hub_ws_url),
            hub_ts_port: env_u16("LW_HUB_TS_PORT", defaults.hub_ts_port),
            fanout_listen_port: env_u16("LW_FANOUT_LISTEN_PORT", defaults.fanout_listen_port),
            mac: std::env::var("LW_NODE_MAC").unwrap_or(defaults.mac),
            fw_version: defaults.fw_version,
            kv_root: std::env::var("LW_NODE_KV_ROOT").unwrap_or(defaults.kv_root),
            sample_rate_hz: defaults.sample_rate_hz,
        }
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
