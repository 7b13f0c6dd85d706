//! Probe configuration.
//!
//! Read from a TOML file (`oddsdesk.toml` by default). Every key is
//! optional; durations are in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use oddsdesk_protocol::UserRole;
use oddsdesk_protocol::constants::{
    DEFAULT_PATH, HANDSHAKE_TIMEOUT, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_BASE_DELAY, ROOM_REPLAY_DELAY, UPGRADE_PROBE_TIMEOUT,
};
use oddsdesk_realtime::{RealtimeConfig, ReconnectConfig, TransportOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Base address of the real-time service.
    pub endpoint: String,
    pub path: String,
    pub user_id: String,
    pub user_role: UserRole,
    /// JSON file holding `{"token": "..."}`.
    pub token_file: Option<PathBuf>,
    /// Rooms to join after connecting.
    pub rooms: Vec<String>,
    /// Try to upgrade from long-polling to WebSocket.
    pub upgrade: bool,
    pub handshake_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub room_replay_delay_ms: u64,
    pub upgrade_probe_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4000".into(),
            path: DEFAULT_PATH.into(),
            user_id: String::new(),
            user_role: UserRole::Admin,
            token_file: None,
            rooms: Vec::new(),
            upgrade: true,
            handshake_timeout_ms: millis(HANDSHAKE_TIMEOUT),
            heartbeat_interval_ms: millis(HEARTBEAT_INTERVAL),
            room_replay_delay_ms: millis(ROOM_REPLAY_DELAY),
            upgrade_probe_timeout_ms: millis(UPGRADE_PROBE_TIMEOUT),
            reconnect_base_delay_ms: millis(RECONNECT_BASE_DELAY),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl ProbeConfig {
    /// Loads the file at `path`, or the defaults if it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ProbeConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn realtime(&self) -> RealtimeConfig {
        let mut config = RealtimeConfig::new(self.endpoint.clone());
        config.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
        config.heartbeat_interval = Duration::from_millis(self.heartbeat_interval_ms);
        config.room_replay_delay = Duration::from_millis(self.room_replay_delay_ms);
        config.reconnect = ReconnectConfig {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        };
        config.transport = TransportOptions {
            path: self.path.clone(),
            upgrade: self.upgrade,
            probe_timeout: Duration::from_millis(self.upgrade_probe_timeout_ms),
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library() {
        let config = ProbeConfig::default().realtime();
        let library = RealtimeConfig::new("http://localhost:4000");
        assert_eq!(config.handshake_timeout, library.handshake_timeout);
        assert_eq!(config.heartbeat_interval, library.heartbeat_interval);
        assert_eq!(config.reconnect.max_attempts, library.reconnect.max_attempts);
        assert!(config.transport.upgrade);
    }

    #[test]
    fn partial_toml() {
        let config: ProbeConfig = toml::from_str(
            r#"
            endpoint = "https://api.example.com"
            user_role = "agent"
            rooms = ["teen20", "dt20"]
            reconnect_base_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "https://api.example.com");
        assert_eq!(config.user_role, UserRole::Agent);
        assert_eq!(config.rooms, vec!["teen20", "dt20"]);
        assert_eq!(
            config.realtime().reconnect.delay_for_attempt(2),
            Duration::from_millis(500)
        );
        assert_eq!(config.path, DEFAULT_PATH);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ProbeConfig::load(&tmp.path().join("oddsdesk.toml")).unwrap();
        assert_eq!(config.endpoint, "http://localhost:4000");
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("oddsdesk.toml");
        std::fs::write(&path, "endpoint = [").unwrap();
        assert!(ProbeConfig::load(&path).is_err());
    }
}
