//! Real-time session manager for the oddsdesk admin console.
//!
//! Owns the push channel to the backend: authentication, reconnection with
//! linear backoff, heartbeat, typed event listeners and room subscriptions
//! that survive reconnects.

mod driver;
pub mod error;
pub mod listeners;
pub mod manager;
pub mod observer;
mod pumps;
pub(crate) mod reconnection;
mod rooms;
pub mod token;
pub mod transport;
pub mod types;

pub use error::RealtimeError;
pub use listeners::Listener;
pub use manager::{
    ConnectResult, ConnectionManager, ForcedLogoutHandler, PeerLoginHandler, PendingConnect,
};
pub use observer::{EventObserver, TracingObserver};
pub use token::{TokenError, TokenSource, TokenStore};
pub use transport::{Connector, DisconnectReason, SocketIoConnector, TransportOptions};
pub use types::{
    ConnectionEvent, ConnectionState, ConnectionStatus, RealtimeConfig, ReconnectConfig,
    SessionEnd, SessionUser,
};
