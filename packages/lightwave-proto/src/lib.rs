//! # lightwave-proto
//!
//! Shared wire and control-plane types for the LightwaveOS hub/node fleet.
//!
//! These types are used by:
//! - `lightwave-hub`: building and parsing fanout/time-sync UDP packets and
//!   the WebSocket control-plane JSON envelopes sent to every node.
//! - `lightwave-node`: the mirror image — parsing what the hub sends, and
//!   building what it sends back.
//!
//! ## Wire conventions
//!
//! - UDP packets (`wire` module) are fixed-layout structs in **network byte
//!   order** (big-endian), matching the spec exactly. They are encoded and
//!   decoded by hand rather than cast in place, because a `#[repr(C)]` +
//!   zero-copy cast would inherit the host's native endianness, which is
//!   wrong for a wire format that must be endian-stable across an ESP32
//!   node and an x86/ARM hub.
//! - WebSocket envelopes (`ws` module) are UTF-8 JSON, tagged by a `t`
//!   field, matching the spec's control protocol exactly.
//! - Shared value types (`types` module) — node lifecycle state, OTA
//!   state, zone blend modes, global parameters — are used on both wire
//!   shapes and in-memory state on both sides of the fleet.

pub mod types;
pub mod wire;
pub mod ws;

pub use types::*;
pub use wire::*;
