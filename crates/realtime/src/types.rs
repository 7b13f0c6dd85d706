//! Public types for the real-time session manager.

use std::time::Duration;

use oddsdesk_protocol::UserRole;
use oddsdesk_protocol::constants::{
    HANDSHAKE_TIMEOUT, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY,
    ROOM_REPLAY_DELAY,
};

use crate::transport::{DisconnectReason, TransportOptions};

/// Connection state of the manager.
///
/// `Connecting` is entered the moment a transport is created, before the
/// handshake completes, and covers the window in which the connection is
/// assumed alive until proven otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Identity of the user owning the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub user_role: UserRole,
}

/// Snapshot of the manager's connection status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub connecting: bool,
    pub has_transport: bool,
    pub current_user: Option<SessionUser>,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The caller called `disconnect`.
    Logout,
    /// The backend reported a duplicate login elsewhere.
    ForcedLogout,
    /// Either end closed the channel on purpose.
    Closed(DisconnectReason),
    /// Every reconnect attempt failed.
    RetriesExhausted { attempts: u32 },
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// A reconnect attempt was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    SessionEnded(SessionEnd),
}

/// Reconnection policy after an unexpected disconnect.
///
/// Delays grow linearly (`base_delay * attempt`) without a ceiling; retries
/// stop entirely after `max_attempts` and the session is dropped.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: RECONNECT_BASE_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

/// Configuration of the connection manager.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base address of the real-time service, e.g. `https://api.example.com`.
    pub endpoint: String,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Wait between the login announcement and room replay.
    pub room_replay_delay: Duration,
    pub reconnect: ReconnectConfig,
    pub transport: TransportOptions,
    /// Capacity of the status event channel.
    pub event_capacity: usize,
}

impl RealtimeConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            room_replay_delay: ROOM_REPLAY_DELAY,
            reconnect: ReconnectConfig::default(),
            transport: TransportOptions::default(),
            event_capacity: 64,
        }
    }
}

/// Identity bound to the current logical connection attempt.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub(crate) user_id: String,
    pub(crate) user_role: UserRole,
    pub(crate) auth_token: Option<String>,
}

impl Session {
    pub(crate) fn user(&self) -> SessionUser {
        SessionUser {
            user_id: self.user_id.clone(),
            user_role: self.user_role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_ne!(ConnectionState::Connected, ConnectionState::Connecting);
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn reconnect_delay_is_linear_and_increasing() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(500),
            max_attempts: 10,
        };
        let delays: Vec<_> = (1..=10).map(|a| config.delay_for_attempt(a)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[3], Duration::from_secs(2));
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn zeroth_attempt_uses_base_delay() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), config.base_delay);
    }

    #[test]
    fn realtime_config_defaults() {
        let config = RealtimeConfig::new("https://api.example.com");
        assert_eq!(config.endpoint, "https://api.example.com");
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.room_replay_delay < config.handshake_timeout);
    }
}
