//! Typed server-pushed events.
//!
//! The backend pushes named events with a single JSON argument. Every name
//! the console understands maps to one [`EventKind`] and a typed payload;
//! anything else decodes to [`Inbound::Unknown`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{EVENT_ADMIN_LOGGED_IN, EVENT_FORCE_LOGOUT, EVENT_SERVER_PING};
use crate::messages::Heartbeat;

/// Kinds of domain events a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    CasinoOdds,
    CasinoResult,
    SportsOdds,
    ScoreUpdate,
    BetPlaced,
    BalanceUpdate,
    Notification,
    Pong,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::CasinoOdds,
        EventKind::CasinoResult,
        EventKind::SportsOdds,
        EventKind::ScoreUpdate,
        EventKind::BetPlaced,
        EventKind::BalanceUpdate,
        EventKind::Notification,
        EventKind::Pong,
    ];

    /// Event name on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::CasinoOdds => "casinoOdds",
            EventKind::CasinoResult => "casinoResult",
            EventKind::SportsOdds => "sportsOdds",
            EventKind::ScoreUpdate => "scoreUpdate",
            EventKind::BetPlaced => "betPlaced",
            EventKind::BalanceUpdate => "balanceUpdate",
            EventKind::Notification => "notification",
            EventKind::Pong => "pong",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Update scoped to a casino room (one live table).
///
/// `data` is the game-specific odds grid or result, left opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFeed {
    pub room: String,
    #[serde(default)]
    pub data: Value,
}

/// Update scoped to a sports match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFeed {
    pub match_id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetPlaced {
    pub bet_id: String,
    pub user_id: String,
    pub stake: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    pub user_id: String,
    pub balance: f64,
    #[serde(default)]
    pub exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// The identity authenticated a new session elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceLogout {
    pub message: Option<String>,
}

impl ForceLogout {
    /// Reads the signal from any payload shape.
    ///
    /// The signal must never be lost to a payload the struct does not
    /// match: a bare string becomes the message, anything else is dropped.
    pub fn from_payload(payload: Value) -> Self {
        if let Value::String(message) = payload {
            return Self {
                message: Some(message),
            };
        }
        parse(payload).unwrap_or_default()
    }
}

/// Another admin logged in to the console.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerLogin {
    pub user_id: String,
    pub user_name: Option<String>,
    pub ip: Option<String>,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A domain event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    CasinoOdds(RoomFeed),
    CasinoResult(RoomFeed),
    SportsOdds(MatchFeed),
    ScoreUpdate(MatchFeed),
    BetPlaced(BetPlaced),
    BalanceUpdate(BalanceUpdate),
    Notification(Notification),
    Pong(Heartbeat),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::CasinoOdds(_) => EventKind::CasinoOdds,
            ServerEvent::CasinoResult(_) => EventKind::CasinoResult,
            ServerEvent::SportsOdds(_) => EventKind::SportsOdds,
            ServerEvent::ScoreUpdate(_) => EventKind::ScoreUpdate,
            ServerEvent::BetPlaced(_) => EventKind::BetPlaced,
            ServerEvent::BalanceUpdate(_) => EventKind::BalanceUpdate,
            ServerEvent::Notification(_) => EventKind::Notification,
            ServerEvent::Pong(_) => EventKind::Pong,
        }
    }

    /// Decodes the payload of a known event kind.
    pub fn decode(kind: EventKind, payload: Value) -> Result<Self, serde_json::Error> {
        let event = match kind {
            EventKind::CasinoOdds => ServerEvent::CasinoOdds(parse(payload)?),
            EventKind::CasinoResult => ServerEvent::CasinoResult(parse(payload)?),
            EventKind::SportsOdds => ServerEvent::SportsOdds(parse(payload)?),
            EventKind::ScoreUpdate => ServerEvent::ScoreUpdate(parse(payload)?),
            EventKind::BetPlaced => ServerEvent::BetPlaced(parse(payload)?),
            EventKind::BalanceUpdate => ServerEvent::BalanceUpdate(parse(payload)?),
            EventKind::Notification => ServerEvent::Notification(parse(payload)?),
            EventKind::Pong => ServerEvent::Pong(parse(payload)?),
        };
        Ok(event)
    }
}

/// Everything the backend can push, including session control signals.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    ForceLogout(ForceLogout),
    PeerLogin(PeerLogin),
    ServerPing(Heartbeat),
    Unknown(String),
}

impl Inbound {
    /// Decodes a named event and its first argument.
    pub fn decode(name: &str, payload: Value) -> Result<Self, serde_json::Error> {
        match name {
            EVENT_FORCE_LOGOUT => Ok(Inbound::ForceLogout(ForceLogout::from_payload(payload))),
            EVENT_ADMIN_LOGGED_IN => Ok(Inbound::PeerLogin(parse(payload)?)),
            EVENT_SERVER_PING => Ok(Inbound::ServerPing(server_ping(payload))),
            other => match EventKind::from_wire(other) {
                Some(kind) => Ok(Inbound::Event(ServerEvent::decode(kind, payload)?)),
                None => Ok(Inbound::Unknown(other.to_string())),
            },
        }
    }
}

/// Reads a server ping: `{"timestamp": n}`, a bare number, or anything else
/// as an empty heartbeat.
fn server_ping(payload: Value) -> Heartbeat {
    if let Some(timestamp) = payload.as_i64() {
        return Heartbeat { timestamp };
    }
    parse(payload).unwrap_or_default()
}

/// Parses a payload, treating a missing argument as an empty object.
fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
    match payload {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        other => serde_json::from_value(other),
    }
}
