//! Error types for the hub's fallible boundaries. Validation failures on
//! the WebSocket control plane carry a `lightwave_proto::ErrorCode` back to
//! the client; everything else is either logged and absorbed (the
//! preferred path per the error-handling policy) or bubbled to `main` via
//! `anyhow` when it is fatal to process bring-up.

use lightwave_proto::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node id {0} is out of range")]
    OutOfRange(u8),
    #[error("no entry for node id {0}")]
    NotFound(u8),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("zone id {0} exceeds MAX_ZONES")]
    ZoneOutOfRange(u8),
    #[error("no zone entry for node {node_id} zone {zone_id}")]
    ZoneNotFound { node_id: u8, zone_id: u8 },
}

#[derive(Debug, Error)]
pub enum WsValidationError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("value out of range: {0}")]
    OutOfRange(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("feature disabled: {0}")]
    FeatureDisabled(&'static str),
    #[error("system not ready")]
    SystemNotReady,
}

impl WsValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingField(_) => ErrorCode::MissingField,
            Self::OutOfRange(_) => ErrorCode::OutOfRange,
            Self::InvalidValue(_) => ErrorCode::InvalidValue,
            Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::FeatureDisabled(_) => ErrorCode::FeatureDisabled,
            Self::SystemNotReady => ErrorCode::SystemNotReady,
        }
    }
}
