//! Packet decoding errors.

/// Errors produced while decoding Engine.IO / Socket.IO packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("binary packets are not supported")]
    Binary,

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
