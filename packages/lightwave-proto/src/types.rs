//! Shared value types: node lifecycle, OTA state, zone/global parameters.

use serde::{Deserialize, Serialize};

/// Registry lifecycle state for a node. See the state machine in
/// `lightwave-hub::registry`: `Pending -> Authed -> Ready <-> Degraded ->
/// Lost`, with `Lost` terminal until the entry is swept and a fresh `hello`
/// re-creates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Authed,
    Ready,
    Degraded,
    Lost,
}

/// Per-node OTA progress, independent of the dispatcher's own rollout state
/// machine in `lightwave-hub::ota`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtaNodeState {
    Idle,
    Downloading,
    Installing,
    Complete,
    Error,
}

/// Zone compositing mode. Numeric order matches the spec's `0..7` encoding
/// so it can be sent as a single `u8` on either wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    Replace = 0,
    Additive = 1,
    Screen = 2,
    Multiply = 3,
    Max = 4,
    Min = 5,
    Alpha = 6,
    Subtract = 7,
}

impl BlendMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Additive,
            2 => Self::Screen,
            3 => Self::Multiply,
            4 => Self::Max,
            5 => Self::Min,
            6 => Self::Alpha,
            7 => Self::Subtract,
            _ => Self::Replace,
        }
    }
}

/// Node-declared capability flags, sent in `hello` and retained in the
/// registry entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub udp: bool,
    pub ota: bool,
    pub clock: bool,
}

/// Node-declared LED topology, sent in `hello`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Topology {
    pub leds: u16,
    pub channels: u8,
}

/// Authoritative global parameter set, owned by the hub's state store and
/// mirrored (after `applyAt` scheduling) on every node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GlobalParams {
    pub effect_id: u8,
    pub brightness: u8,
    pub speed: u8,
    pub palette_id: u8,
    pub hue: u8,
    pub intensity: u8,
    pub saturation: u8,
    pub complexity: u8,
    pub variation: u8,
}

/// Nine independent dirty bits, one per `GlobalParams` field, in field
/// declaration order. Bit 0 (`EFFECT`) is broadcast separately via
/// `effects.setCurrent`; the rest are coalesced into one `parameters.set`.
pub mod global_dirty_bits {
    pub const EFFECT: u16 = 1 << 0;
    pub const BRIGHTNESS: u16 = 1 << 1;
    pub const SPEED: u16 = 1 << 2;
    pub const PALETTE: u16 = 1 << 3;
    pub const HUE: u16 = 1 << 4;
    pub const INTENSITY: u16 = 1 << 5;
    pub const SATURATION: u16 = 1 << 6;
    pub const COMPLEXITY: u16 = 1 << 7;
    pub const VARIATION: u16 = 1 << 8;
    pub const ALL: u16 = (1 << 9) - 1;
}

/// Per-zone, per-node parameter set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ZoneSettings {
    pub effect_id: u8,
    pub brightness: u8,
    pub speed: u8,
    pub palette_id: u8,
    pub blend_mode: u8,
}

/// Five independent dirty bits, one per `ZoneSettings` field.
pub mod zone_dirty_bits {
    pub const EFFECT: u8 = 1 << 0;
    pub const BRIGHTNESS: u8 = 1 << 1;
    pub const SPEED: u8 = 1 << 2;
    pub const PALETTE: u8 = 1 << 3;
    pub const BLEND_MODE: u8 = 1 << 4;
    pub const ALL: u8 = (1 << 5) - 1;
}

/// A contiguous LED range on one physical strip, plus its mirror on the
/// other strip, addressed by the zone compositor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneLayout {
    pub zone_id: u8,
    pub s1_left_start: u16,
    pub s1_left_end: u16,
    pub s1_right_start: u16,
    pub s1_right_end: u16,
    pub total_leds: u16,
}

/// Validation/operation error codes carried in WS error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingField,
    OutOfRange,
    InvalidValue,
    InvalidJson,
    FeatureDisabled,
    InternalError,
    OperationFailed,
    SystemNotReady,
}
