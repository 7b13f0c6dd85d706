//! Background tasks that move packets for a live session.

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;
