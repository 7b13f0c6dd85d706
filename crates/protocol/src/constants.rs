use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine.IO protocol revision spoken by the console backend.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Default mount path of the real-time endpoint.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Default namespace for Socket.IO packets.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Separator between packets in a long-polling payload.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Payload used by the WebSocket upgrade probe (`2probe` / `3probe`).
pub const PROBE_PAYLOAD: &str = "probe";

/// How long the handshake may take before `connect` gives up.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval of the application-level heartbeat ping.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Delay between the login announcement and room replay.
///
/// Rooms are only routed to identified sessions, so replay waits for the
/// login message to land first.
pub const ROOM_REPLAY_DELAY: Duration = Duration::from_millis(100);

/// Base delay for reconnect attempts (multiplied by the attempt number).
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Maximum reconnect attempts after an unexpected disconnect.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Timeout for the WebSocket upgrade probe.
pub const UPGRADE_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum inbound message size accepted from the backend (10 MB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Events the console sends to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Identity announcement sent right after the channel opens.
    #[serde(rename = "login")]
    Login,
    /// Best-effort notice sent before a voluntary disconnect.
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "joinRoom")]
    JoinRoom,
    #[serde(rename = "leaveRoom")]
    LeaveRoom,
    /// Application heartbeat.
    #[serde(rename = "ping")]
    Ping,
    /// Reply to a server-initiated heartbeat.
    #[serde(rename = "pong")]
    Pong,
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientEvent::Login => "login",
            ClientEvent::Logout => "logout",
            ClientEvent::JoinRoom => "joinRoom",
            ClientEvent::LeaveRoom => "leaveRoom",
            ClientEvent::Ping => "ping",
            ClientEvent::Pong => "pong",
        }
    }
}

impl std::fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server event: the same identity authenticated elsewhere.
pub const EVENT_FORCE_LOGOUT: &str = "forceLogout";

/// Server event: another admin logged in.
pub const EVENT_ADMIN_LOGGED_IN: &str = "adminLoggedIn";

/// Server event: heartbeat initiated by the backend.
pub const EVENT_SERVER_PING: &str = "ping";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_serialization_matches_as_str() {
        for event in [
            ClientEvent::Login,
            ClientEvent::Logout,
            ClientEvent::JoinRoom,
            ClientEvent::LeaveRoom,
            ClientEvent::Ping,
            ClientEvent::Pong,
        ] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }

    #[test]
    fn replay_delay_is_shorter_than_handshake() {
        assert!(ROOM_REPLAY_DELAY < HANDSHAKE_TIMEOUT);
    }
}
