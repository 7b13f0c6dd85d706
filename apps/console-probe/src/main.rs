//! Operator probe for the oddsdesk real-time channel.
//!
//! Connects with the configured identity, joins rooms and logs every event
//! until the session ends or Ctrl-C is pressed.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use oddsdesk_protocol::{EventKind, ServerEvent, UserRole};
use oddsdesk_realtime::{
    ConnectionEvent, ConnectionManager, ConnectionState, TokenSource, TokenStore,
};

use config::ProbeConfig;

#[derive(Debug, Parser)]
#[command(name = "oddsdesk-probe", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "oddsdesk.toml")]
    config: PathBuf,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    user: Option<String>,

    /// `admin` or `agent`.
    #[arg(long)]
    role: Option<UserRole>,

    /// Bearer token; takes precedence over `token_file`.
    #[arg(long, env = "ODDSDESK_TOKEN")]
    token: Option<String>,

    /// Room to join; repeat for several.
    #[arg(long = "room")]
    rooms: Vec<String>,

    /// Stay on long-polling.
    #[arg(long)]
    no_upgrade: bool,
}

impl Cli {
    fn apply(&self, config: &mut ProbeConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(user) = &self.user {
            config.user_id = user.clone();
        }
        if let Some(role) = self.role {
            config.user_role = role;
        }
        if !self.rooms.is_empty() {
            config.rooms = self.rooms.clone();
        }
        if self.no_upgrade {
            config.upgrade = false;
        }
    }

    fn tokens(&self, config: &ProbeConfig) -> anyhow::Result<Arc<dyn TokenSource>> {
        if let Some(token) = &self.token {
            return Ok(Arc::new(TokenStore::in_memory(Some(token.clone()))));
        }
        match &config.token_file {
            Some(path) => {
                let store = TokenStore::open(path.clone())
                    .with_context(|| format!("reading token file {}", path.display()))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(TokenStore::in_memory(None))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,oddsdesk=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ProbeConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cli.apply(&mut config);
    anyhow::ensure!(
        !config.user_id.is_empty(),
        "no user id configured (set user_id or pass --user)"
    );

    let manager = ConnectionManager::new(config.realtime(), cli.tokens(&config)?)?;
    let mut events = manager
        .take_events()
        .context("status events already taken")?;

    manager.set_forced_logout_handler(|signal| {
        warn!(message = ?signal.message, "forced out: this identity logged in elsewhere");
    });
    manager.set_peer_login_handler(|peer| {
        info!(user = %peer.user_id, name = ?peer.user_name, ip = ?peer.ip, "another admin logged in");
    });

    for room in &config.rooms {
        manager.join_room(room)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.endpoint,
        user = %config.user_id,
        role = %config.user_role,
        "starting probe"
    );
    manager
        .connect(config.user_id.clone(), config.user_role)
        .await
        .context("connect failed")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, disconnecting");
                manager.disconnect();
                break;
            }
            event = events.recv() => match event {
                // Every new transport starts without listeners.
                Some(ConnectionEvent::StateChanged(ConnectionState::Connected)) => {
                    info!(rooms = ?manager.rooms(), "connected");
                    wire_listeners(&manager);
                }
                Some(ConnectionEvent::StateChanged(state)) => debug!(?state, "state changed"),
                Some(ConnectionEvent::Reconnecting { attempt, delay }) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "connection lost, retrying");
                }
                Some(ConnectionEvent::SessionEnded(reason)) => {
                    warn!(?reason, "session ended");
                    break;
                }
                None => break,
            }
        }
    }

    Ok(())
}

fn wire_listeners(manager: &ConnectionManager) {
    for kind in EventKind::ALL {
        manager.on(kind, log_event);
    }
}

fn log_event(event: &ServerEvent) {
    let kind = event.kind();
    match event {
        ServerEvent::CasinoOdds(feed) | ServerEvent::CasinoResult(feed) => {
            info!(%kind, room = %feed.room, data = %feed.data);
        }
        ServerEvent::SportsOdds(feed) | ServerEvent::ScoreUpdate(feed) => {
            info!(%kind, match_id = %feed.match_id, data = %feed.data);
        }
        ServerEvent::BetPlaced(bet) => {
            info!(%kind, bet = %bet.bet_id, user = %bet.user_id, stake = bet.stake, room = ?bet.room);
        }
        ServerEvent::BalanceUpdate(update) => {
            info!(%kind, user = %update.user_id, balance = update.balance, exposure = update.exposure);
        }
        ServerEvent::Notification(note) => {
            info!(%kind, level = ?note.level, "{}", note.message);
        }
        ServerEvent::Pong(heartbeat) => debug!(%kind, timestamp = heartbeat.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let cli = Cli::parse_from([
            "oddsdesk-probe",
            "--user",
            "ops-1",
            "--role",
            "Agent",
            "--room",
            "teen20",
            "--room",
            "lucky7",
            "--no-upgrade",
        ]);
        let mut config = ProbeConfig {
            rooms: vec!["dt20".into()],
            ..ProbeConfig::default()
        };
        cli.apply(&mut config);

        assert_eq!(config.user_id, "ops-1");
        assert_eq!(config.user_role, UserRole::Agent);
        assert_eq!(config.rooms, vec!["teen20", "lucky7"]);
        assert!(!config.upgrade);
        assert_eq!(config.endpoint, ProbeConfig::default().endpoint);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(Cli::try_parse_from(["oddsdesk-probe", "--role", "punter"]).is_err());
    }

    #[test]
    fn token_flag_wins() {
        let cli = Cli::parse_from(["oddsdesk-probe", "--token", "tok-cli"]);
        let config = ProbeConfig {
            token_file: Some(PathBuf::from("/nonexistent/token.json")),
            ..ProbeConfig::default()
        };
        let tokens = cli.tokens(&config).unwrap();
        assert_eq!(tokens.bearer_token().as_deref(), Some("tok-cli"));
    }
}
