pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod messages;
pub mod socket;
pub mod types;

// Re-export primary types for convenience.
pub use constants::ClientEvent;
pub use engine::{EnginePacket, Handshake};
pub use error::PacketError;
pub use events::{EventKind, Inbound, ServerEvent};
pub use socket::SocketPacket;
pub use types::UserRole;
