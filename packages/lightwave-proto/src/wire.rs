//! Fixed-layout UDP wire structs, encoded/decoded by hand in network byte
//! order (big-endian). Modelled on the explicit field-at-a-time writer
//! style used by real binary lighting-protocol wire formats, adapted here
//! to big-endian since this protocol (unlike some LAN lighting protocols)
//! must be endian-stable across heterogeneous hub/node hardware.

use thiserror::Error;

/// Protocol version stamped into every UDP header. Bump whenever a wire
/// struct's layout changes.
pub const LW_PROTO_VER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    ParamDelta = 1,
    TimeSyncPing = 2,
    TimeSyncPong = 3,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::ParamDelta),
            2 => Some(Self::TimeSyncPing),
            3 => Some(Self::TimeSyncPong),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },
    #[error("protocol byte mismatch: expected {expected}, got {got}")]
    ProtocolMismatch { expected: u8, got: u8 },
    #[error("unknown msgType byte {0}")]
    UnknownMsgType(u8),
}

/// 24-byte fixed header in front of every fanout/time-sync UDP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub proto: u8,
    pub msg_type: u8,
    pub payload_len: u16,
    pub seq: u32,
    pub token_hash: u32,
    pub hub_now_us: u64,
    pub apply_at_us: u64,
}

pub const UDP_HEADER_LEN: usize = 1 + 1 + 2 + 4 + 4 + 8 + 8;

impl UdpHeader {
    pub fn to_bytes(&self) -> [u8; UDP_HEADER_LEN] {
        let mut buf = [0u8; UDP_HEADER_LEN];
        let mut off = 0;
        buf[off] = self.proto;
        off += 1;
        buf[off] = self.msg_type;
        off += 1;
        buf[off..off + 2].copy_from_slice(&self.payload_len.to_be_bytes());
        off += 2;
        buf[off..off + 4].copy_from_slice(&self.seq.to_be_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.token_hash.to_be_bytes());
        off += 4;
        buf[off..off + 8].copy_from_slice(&self.hub_now_us.to_be_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.apply_at_us.to_be_bytes());
        buf
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, WireError> {
        if b.len() < UDP_HEADER_LEN {
            return Err(WireError::TooShort { need: UDP_HEADER_LEN, have: b.len() });
        }
        let proto = b[0];
        if proto != LW_PROTO_VER {
            return Err(WireError::ProtocolMismatch { expected: LW_PROTO_VER, got: proto });
        }
        let msg_type = b[1];
        let payload_len = u16::from_be_bytes([b[2], b[3]]);
        let seq = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
        let token_hash = u32::from_be_bytes([b[8], b[9], b[10], b[11]]);
        let hub_now_us = u64::from_be_bytes(b[12..20].try_into().unwrap());
        let apply_at_us = u64::from_be_bytes(b[20..28].try_into().unwrap());
        Ok(Self { proto, msg_type, payload_len, seq, token_hash, hub_now_us, apply_at_us })
    }
}

/// Data-plane payload carried after `UdpHeader` in a `PARAM_DELTA` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamDelta {
    pub effect_id: u8,
    pub palette_id: u8,
    pub brightness: u8,
    pub speed: u8,
    pub hue: u16,
}

pub const PARAM_DELTA_LEN: usize = 1 + 1 + 1 + 1 + 2;

impl ParamDelta {
    pub fn to_bytes(&self) -> [u8; PARAM_DELTA_LEN] {
        let mut buf = [0u8; PARAM_DELTA_LEN];
        buf[0] = self.effect_id;
        buf[1] = self.palette_id;
        buf[2] = self.brightness;
        buf[3] = self.speed;
        buf[4..6].copy_from_slice(&self.hue.to_be_bytes());
        buf
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, WireError> {
        if b.len() < PARAM_DELTA_LEN {
            return Err(WireError::TooShort { need: PARAM_DELTA_LEN, have: b.len() });
        }
        Ok(Self {
            effect_id: b[0],
            palette_id: b[1],
            brightness: b[2],
            speed: b[3],
            hue: u16::from_be_bytes([b[4], b[5]]),
        })
    }
}

/// A complete fanout packet: header plus `ParamDelta` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowPacket {
    pub header: UdpHeader,
    pub payload: ParamDelta,
}

impl ShowPacket {
    pub fn new(seq: u32, token_hash: u32, hub_now_us: u64, apply_at_us: u64, payload: ParamDelta) -> Self {
        Self {
            header: UdpHeader {
                proto: LW_PROTO_VER,
                msg_type: MsgType::ParamDelta as u8,
                payload_len: PARAM_DELTA_LEN as u16,
                seq,
                token_hash,
                hub_now_us,
                apply_at_us,
            },
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(UDP_HEADER_LEN + PARAM_DELTA_LEN);
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload.to_bytes());
        buf
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, WireError> {
        let header = UdpHeader::from_bytes(b)?;
        if header.msg_type != MsgType::ParamDelta as u8 {
            return Err(WireError::UnknownMsgType(header.msg_type));
        }
        let payload = ParamDelta::from_bytes(&b[UDP_HEADER_LEN..])?;
        Ok(Self { header, payload })
    }
}

/// Reserved byte kept for alignment/future flags; always zero on the wire
/// today.
pub const TIME_SYNC_RESERVED: u8 = 0;

/// `node -> hub` time-sync ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPing {
    pub proto: u8,
    pub seq: u32,
    pub token_hash: u32,
    pub t1_us: u64,
}

pub const TIME_SYNC_PING_LEN: usize = 1 + 1 + 2 + 4 + 4 + 8;

impl TimeSyncPing {
    pub fn to_bytes(&self) -> [u8; TIME_SYNC_PING_LEN] {
        let mut buf = [0u8; TIME_SYNC_PING_LEN];
        buf[0] = self.proto;
        buf[1] = MsgType::TimeSyncPing as u8;
        buf[2] = TIME_SYNC_RESERVED;
        buf[3] = TIME_SYNC_RESERVED;
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.token_hash.to_be_bytes());
        buf[12..20].copy_from_slice(&self.t1_us.to_be_bytes());
        buf
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, WireError> {
        if b.len() < TIME_SYNC_PING_LEN {
            return Err(WireError::TooShort { need: TIME_SYNC_PING_LEN, have: b.len() });
        }
        let proto = b[0];
        if proto != LW_PROTO_VER {
            return Err(WireError::ProtocolMismatch { expected: LW_PROTO_VER, got: proto });
        }
        if b[1] != MsgType::TimeSyncPing as u8 {
            return Err(WireError::UnknownMsgType(b[1]));
        }
        Ok(Self {
            proto,
            seq: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            token_hash: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            t1_us: u64::from_be_bytes(b[12..20].try_into().unwrap()),
        })
    }
}

/// `hub -> node` time-sync pong, echoing the ping's `seq`/`tokenHash`/`t1Us`
/// and adding the hub's receive/send timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPong {
    pub proto: u8,
    pub seq: u32,
    pub token_hash: u32,
    pub t1_us: u64,
    pub t2_us: u64,
    pub t3_us: u64,
}

pub const TIME_SYNC_PONG_LEN: usize = 1 + 1 + 2 + 4 + 4 + 8 + 8 + 8;

impl TimeSyncPong {
    pub fn to_bytes(&self) -> [u8; TIME_SYNC_PONG_LEN] {
        let mut buf = [0u8; TIME_SYNC_PONG_LEN];
        buf[0] = self.proto;
        buf[1] = MsgType::TimeSyncPong as u8;
        buf[2] = TIME_SYNC_RESERVED;
        buf[3] = TIME_SYNC_RESERVED;
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.token_hash.to_be_bytes());
        buf[12..20].copy_from_slice(&self.t1_us.to_be_bytes());
        buf[20..28].copy_from_slice(&self.t2_us.to_be_bytes());
        buf[28..36].copy_from_slice(&self.t3_us.to_be_bytes());
        buf
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, WireError> {
        if b.len() < TIME_SYNC_PONG_LEN {
            return Err(WireError::TooShort { need: TIME_SYNC_PONG_LEN, have: b.len() });
        }
        let proto = b[0];
        if proto != LW_PROTO_VER {
            return Err(WireError::ProtocolMismatch { expected: LW_PROTO_VER, got: proto });
        }
        if b[1] != MsgType::TimeSyncPong as u8 {
            return Err(WireError::UnknownMsgType(b[1]));
        }
        Ok(Self {
            proto,
            seq: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            token_hash: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            t1_us: u64::from_be_bytes(b[12..20].try_into().unwrap()),
            t2_us: u64::from_be_bytes(b[20..28].try_into().unwrap()),
            t3_us: u64::from_be_bytes(b[28..36].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_packet_round_trips() {
        let pkt = ShowPacket::new(
            42,
            0xdead_beef,
            1_000_000,
            1_020_000,
            ParamDelta { effect_id: 5, palette_id: 2, brightness: 180, speed: 90, hue: 300 },
        );
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), UDP_HEADER_LEN + PARAM_DELTA_LEN);
        let decoded = ShowPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn header_is_big_endian() {
        let header = UdpHeader {
            proto: LW_PROTO_VER,
            msg_type: MsgType::ParamDelta as u8,
            payload_len: 0x0102,
            seq: 1,
            token_hash: 0,
            hub_now_us: 0,
            apply_at_us: 0,
        };
        let bytes = header.to_bytes();
        // payload_len occupies bytes [2,3]; big-endian means the high byte comes first.
        assert_eq!(bytes[2], 0x01);
        assert_eq!(bytes[3], 0x02);
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let mut bytes = UdpHeader {
            proto: LW_PROTO_VER,
            msg_type: MsgType::ParamDelta as u8,
            payload_len: 0,
            seq: 0,
            token_hash: 0,
            hub_now_us: 0,
            apply_at_us: 0,
        }
        .to_bytes();
        bytes[0] = LW_PROTO_VER + 1;
        assert_eq!(
            UdpHeader::from_bytes(&bytes),
            Err(WireError::ProtocolMismatch { expected: LW_PROTO_VER, got: LW_PROTO_VER + 1 })
        );
    }

    #[test]
    fn rejects_short_buffers() {
        assert_eq!(
            UdpHeader::from_bytes(&[0u8; 4]),
            Err(WireError::TooShort { need: UDP_HEADER_LEN, have: 4 })
        );
    }

    #[test]
    fn time_sync_round_trips() {
        let ping = TimeSyncPing { proto: LW_PROTO_VER, seq: 7, token_hash: 99, t1_us: 123_456 };
        let decoded = TimeSyncPing::from_bytes(&ping.to_bytes()).unwrap();
        assert_eq!(decoded, ping);

        let pong = TimeSyncPong {
            proto: LW_PROTO_VER,
            seq: 7,
            token_hash: 99,
            t1_us: 123_456,
            t2_us: 123_500,
            t3_us: 123_510,
        };
        let decoded = TimeSyncPong::from_bytes(&pong.to_bytes()).unwrap();
        assert_eq!(decoded, pong);
    }
}
