use serde::{Deserialize, Serialize};

use crate::types::UserRole;

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

/// Identity announcement sent right after the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_id: String,
    pub user_role: UserRole,
    /// Server-assigned id of the transport the login travels on.
    pub socket_id: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

/// Notice sent before a voluntary disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub user_id: String,
    pub user_role: UserRole,
}

/// Join or leave a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    pub room: String,
}

/// Heartbeat ping, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub timestamp: i64,
}

impl Heartbeat {
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
