//! WebSocket control-plane envelopes. UTF-8 JSON, tagged by a `t` field,
//! exactly as the control protocol in the external-interfaces section
//! specifies it.

use serde::{Deserialize, Serialize};

use crate::types::{Capabilities, ErrorCode, GlobalParams, Topology};

/// Messages the hub receives from a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello {
        mac: String,
        fw: String,
        caps: Capabilities,
        topo: Topology,
    },
    #[serde(rename = "ka")]
    Ka {
        #[serde(rename = "nodeId")]
        node_id: u8,
        token: String,
        rssi: i16,
        loss_pct: f32,
        drift_us: i64,
        uptime_s: u64,
    },
    #[serde(rename = "ts_ping")]
    TsPing {
        #[serde(rename = "nodeId")]
        node_id: u8,
        seq: u32,
        t1_us: u64,
    },
    #[serde(rename = "ota_status")]
    OtaStatus {
        #[serde(rename = "nodeId")]
        node_id: u8,
        state: String,
        pct: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A subset of `GlobalParams`: every field the coalescer did not touch is
/// `None`, and is omitted from the wire JSON entirely so receivers only see
/// the fields that actually changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParametersSetFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(rename = "paletteId", skip_serializing_if = "Option::is_none")]
    pub palette_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<u8>,
}

impl ParametersSetFields {
    pub fn is_empty(&self) -> bool {
        self.brightness.is_none()
            && self.speed.is_none()
            && self.palette_id.is_none()
            && self.hue.is_none()
            && self.intensity.is_none()
            && self.saturation.is_none()
            && self.complexity.is_none()
            && self.variation.is_none()
    }
}

/// A subset of `ZoneSettings`, same partial-update convention as
/// `ParametersSetFields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneFields {
    #[serde(rename = "effectId", skip_serializing_if = "Option::is_none")]
    pub effect_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(rename = "paletteId", skip_serializing_if = "Option::is_none")]
    pub palette_id: Option<u8>,
    #[serde(rename = "blendMode", skip_serializing_if = "Option::is_none")]
    pub blend_mode: Option<u8>,
}

impl ZoneFields {
    pub fn is_empty(&self) -> bool {
        self.effect_id.is_none()
            && self.brightness.is_none()
            && self.speed.is_none()
            && self.palette_id.is_none()
            && self.blend_mode.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSnapshotEntry {
    #[serde(rename = "zoneId")]
    pub zone_id: u8,
    #[serde(rename = "effectId")]
    pub effect_id: u8,
    pub brightness: u8,
    pub speed: u8,
    #[serde(rename = "paletteId")]
    pub palette_id: u8,
    #[serde(rename = "blendMode")]
    pub blend_mode: u8,
}

/// Messages the hub sends to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        proto: u8,
        #[serde(rename = "nodeId")]
        node_id: u8,
        token: String,
        #[serde(rename = "udpPort")]
        udp_port: u16,
        #[serde(rename = "hubEpoch_us")]
        hub_epoch_us: u64,
    },
    #[serde(rename = "state.snapshot")]
    StateSnapshot {
        #[serde(rename = "nodeId")]
        node_id: u8,
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
        #[serde(rename = "zonesEnabled")]
        zones_enabled: bool,
        global: GlobalParams,
        #[serde(skip_serializing_if = "Option::is_none")]
        zones: Option<Vec<ZoneSnapshotEntry>>,
    },
    #[serde(rename = "effects.setCurrent")]
    EffectsSetCurrent {
        #[serde(rename = "effectId")]
        effect_id: u8,
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
    },
    #[serde(rename = "parameters.set")]
    ParametersSet {
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
        #[serde(flatten)]
        fields: ParametersSetFields,
    },
    #[serde(rename = "zones.update")]
    ZonesUpdate {
        #[serde(rename = "zoneId")]
        zone_id: u8,
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
        #[serde(flatten)]
        fields: ZoneFields,
    },
    #[serde(rename = "ts_pong")]
    TsPong {
        #[serde(rename = "nodeId")]
        node_id: u8,
        seq: u32,
        t1_us: u64,
        t2_us: u64,
        t3_us: u64,
    },
    #[serde(rename = "ota_update")]
    OtaUpdate {
        version: String,
        url: String,
        sha256: String,
    },
    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_parses_from_json() {
        let raw = r#"{"t":"hello","mac":"AA:BB:CC:DD:EE:01","fw":"1.0.0","caps":{"udp":true,"ota":true,"clock":true},"topo":{"leds":320,"channels":2}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Hello { mac, fw, caps, topo } => {
                assert_eq!(mac, "AA:BB:CC:DD:EE:01");
                assert_eq!(fw, "1.0.0");
                assert!(caps.udp && caps.ota && caps.clock);
                assert_eq!(topo.leds, 320);
            }
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn parameters_set_omits_unset_fields() {
        let msg = ServerMessage::ParametersSet {
            apply_at_us: 1_000,
            fields: ParametersSetFields { brightness: Some(180), ..Default::default() },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"brightness\":180"));
        assert!(!json.contains("speed"));
        assert!(!json.contains("paletteId"));
    }

    #[test]
    fn welcome_round_trips_field_names() {
        let msg = ServerMessage::Welcome {
            proto: 1,
            node_id: 3,
            token: "tok".into(),
            udp_port: 5500,
            hub_epoch_us: 42,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"t\":\"welcome\""));
        assert!(json.contains("\"nodeId\":3"));
        assert!(json.contains("\"udpPort\":5500"));
    }
}
