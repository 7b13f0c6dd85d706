//! Transport seam between the manager and the wire.
//!
//! A [`Connector`] opens a transport and returns a [`TransportLink`]
//! immediately; the handshake runs in the background and its outcome
//! arrives as [`TransportEvent`]s on the link's inbound channel.

#[cfg(test)]
pub(crate) mod mock;
pub mod polling;
pub mod socketio;
pub mod websocket;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use oddsdesk_protocol::{ClientEvent, UserRole};

pub use socketio::{SocketIoConnector, TransportOptions};

/// Capacity of the outbound command queue.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Capacity of the inbound event queue.
pub const INBOUND_CAPACITY: usize = 256;

/// Why a transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The backend ended the session on purpose.
    ServerDisconnect,
    /// This client ended the session on purpose.
    ClientDisconnect,
    /// The underlying connection closed.
    TransportClose,
    /// The underlying connection failed.
    TransportError,
    /// No traffic from the backend within the ping window.
    PingTimeout,
}

impl DisconnectReason {
    /// Voluntary closes end the session; everything else is retried.
    pub fn is_voluntary(self) -> bool {
        matches!(
            self,
            DisconnectReason::ServerDisconnect | DisconnectReason::ClientDisconnect
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
        };
        f.write_str(text)
    }
}

/// Everything a connector needs to open a transport.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub user_id: String,
    pub user_role: UserRole,
}

/// Commands sent from the manager to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Emit { event: String, payload: Value },
    /// Close gracefully after flushing everything queued before it.
    Close,
}

impl Outbound {
    /// Builds a client event. A payload that cannot be serialized is sent
    /// as `null`.
    pub fn client<T: serde::Serialize>(event: ClientEvent, payload: &T) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            warn!(%event, error = %e, "cannot serialize payload, sending null");
            Value::Null
        });
        Outbound::Emit {
            event: event.as_str().to_string(),
            payload,
        }
    }

    /// Name of the emitted event, if this is an emit.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Outbound::Emit { event, .. } => Some(event),
            Outbound::Close => None,
        }
    }
}

/// Events reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The handshake completed.
    Open { socket_id: String },
    /// The handshake failed.
    OpenError(String),
    /// A server-pushed event with its first argument.
    Event { name: String, payload: Value },
    /// The transport closed after a successful open.
    Disconnect(DisconnectReason),
}

/// Handle to an open (or opening) transport.
pub struct TransportLink {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<TransportEvent>,
    /// The transport's own view of whether the handshake completed.
    pub connected: Arc<AtomicBool>,
    /// Aborts the transport without a graceful close.
    pub cancel: CancellationToken,
}

/// Opens transports to the real-time backend.
pub trait Connector: Send + Sync + 'static {
    /// Creates a transport and starts its handshake in the background.
    ///
    /// Must return without waiting for the handshake.
    fn open(&self, request: OpenRequest) -> TransportLink;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voluntary_reasons() {
        assert!(DisconnectReason::ServerDisconnect.is_voluntary());
        assert!(DisconnectReason::ClientDisconnect.is_voluntary());
        assert!(!DisconnectReason::TransportClose.is_voluntary());
        assert!(!DisconnectReason::TransportError.is_voluntary());
        assert!(!DisconnectReason::PingTimeout.is_voluntary());
    }

    #[test]
    fn reason_display_matches_socket_io_vocabulary() {
        assert_eq!(DisconnectReason::PingTimeout.to_string(), "ping timeout");
        assert_eq!(
            DisconnectReason::ServerDisconnect.to_string(),
            "io server disconnect"
        );
    }

    #[test]
    fn outbound_client_event() {
        let cmd = Outbound::client(
            ClientEvent::JoinRoom,
            &oddsdesk_protocol::messages::RoomRequest {
                room: "teen20".into(),
            },
        );
        assert_eq!(cmd.event_name(), Some("joinRoom"));
        assert_eq!(
            cmd,
            Outbound::Emit {
                event: "joinRoom".into(),
                payload: serde_json::json!({"room": "teen20"}),
            }
        );
        assert_eq!(Outbound::Close.event_name(), None);
    }

    #[test]
    fn unserializable_payload_becomes_null() {
        let mut payload = std::collections::BTreeMap::new();
        payload.insert(vec![1u8], 1u8);
        assert_eq!(
            Outbound::client(ClientEvent::Ping, &payload),
            Outbound::Emit {
                event: "ping".into(),
                payload: Value::Null,
            }
        );
    }
}
