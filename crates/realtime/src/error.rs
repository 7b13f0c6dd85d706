//! Error types for the real-time session manager.

use tokio_tungstenite::tungstenite;

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager) and
/// the Socket.IO transport.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("handshake timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("superseded by a newer connect")]
    Superseded,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid room name: {0:?}")]
    InvalidRoom(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<oddsdesk_protocol::PacketError> for RealtimeError {
    fn from(e: oddsdesk_protocol::PacketError) -> Self {
        RealtimeError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(RealtimeError::Timeout.to_string(), "handshake timed out");
        assert_eq!(
            RealtimeError::Superseded.to_string(),
            "superseded by a newer connect"
        );
        assert_eq!(
            RealtimeError::InvalidRoom("  ".into()).to_string(),
            "invalid room name: \"  \""
        );
        assert!(
            RealtimeError::Transport("unauthorized".into())
                .to_string()
                .contains("unauthorized")
        );
    }

    #[test]
    fn packet_errors_become_protocol_errors() {
        let err: RealtimeError = oddsdesk_protocol::PacketError::Binary.into();
        assert!(matches!(err, RealtimeError::Protocol(_)));
    }
}
