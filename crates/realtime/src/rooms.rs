//! Room subscription bookkeeping.
//!
//! `desired` is what the caller asked for and survives every disconnect.
//! `announced` mirrors what the current transport has been told and is
//! reset whenever the transport goes away.

use std::collections::{BTreeSet, HashSet};

use crate::error::RealtimeError;

/// Trims and lower-cases a room name. Empty names are rejected.
pub(crate) fn canonicalize(name: &str) -> Result<String, RealtimeError> {
    let room = name.trim().to_lowercase();
    if room.is_empty() {
        return Err(RealtimeError::InvalidRoom(name.to_string()));
    }
    Ok(room)
}

#[derive(Debug, Default)]
pub(crate) struct RoomSubscriptions {
    desired: BTreeSet<String>,
    announced: HashSet<String>,
}

impl RoomSubscriptions {
    /// Adds a room. Returns `false` if it was already desired.
    pub(crate) fn join(&mut self, room: &str) -> bool {
        self.desired.insert(room.to_string())
    }

    /// Removes a room from both sets. Returns `false` if it was not desired.
    pub(crate) fn leave(&mut self, room: &str) -> bool {
        self.announced.remove(room);
        self.desired.remove(room)
    }

    pub(crate) fn mark_announced(&mut self, room: &str) {
        if self.desired.contains(room) {
            self.announced.insert(room.to_string());
        }
    }

    /// Desired rooms not yet announced on the current transport, in order.
    pub(crate) fn pending(&self) -> Vec<String> {
        self.desired
            .iter()
            .filter(|room| !self.announced.contains(*room))
            .cloned()
            .collect()
    }

    /// Forgets what the transport was told; the desired set is kept.
    pub(crate) fn reset_announced(&mut self) {
        self.announced.clear();
    }

    pub(crate) fn desired(&self) -> Vec<String> {
        self.desired.iter().cloned().collect()
    }

    pub(crate) fn announced_len(&self) -> usize {
        self.announced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        assert_eq!(canonicalize("  Teen20 ").unwrap(), "teen20");
        assert_eq!(canonicalize("DT20").unwrap(), "dt20");
        assert!(matches!(canonicalize("   "), Err(RealtimeError::InvalidRoom(_))));
        assert!(canonicalize("").is_err());
    }

    #[test]
    fn offline_changes_converge_to_final_set() {
        let mut rooms = RoomSubscriptions::default();
        rooms.join("teen20");
        rooms.join("dt20");
        rooms.join("lucky7");
        rooms.leave("dt20");
        rooms.join("teen20");
        rooms.join("dt20");
        rooms.leave("lucky7");

        assert_eq!(rooms.pending(), vec!["dt20", "teen20"]);
        assert_eq!(rooms.desired(), rooms.pending());
    }

    #[test]
    fn announced_rooms_are_not_pending() {
        let mut rooms = RoomSubscriptions::default();
        rooms.join("teen20");
        rooms.join("dt20");
        rooms.mark_announced("teen20");
        assert_eq!(rooms.pending(), vec!["dt20"]);

        rooms.reset_announced();
        assert_eq!(rooms.pending(), vec!["dt20", "teen20"]);
        assert_eq!(rooms.announced_len(), 0);
    }

    #[test]
    fn only_desired_rooms_can_be_announced() {
        let mut rooms = RoomSubscriptions::default();
        rooms.mark_announced("ghost");
        assert_eq!(rooms.announced_len(), 0);

        rooms.join("teen20");
        rooms.mark_announced("teen20");
        assert!(rooms.leave("teen20"));
        assert_eq!(rooms.announced_len(), 0);
        assert!(!rooms.leave("teen20"));
    }
}
