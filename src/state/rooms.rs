//! Room membership for call signaling.
//!
//! A room is whoever explicitly joined it; the relay does not cap
//! membership at two, and signaling goes to every member except the
//! origin. Nothing is buffered: relaying into a room you are alone in
//! drops the message, by contract.

use std::collections::HashMap;

use crate::delivery::SessionHandle;

#[derive(Debug, Clone)]
pub struct RoomMember {
    pub session: SessionHandle,
    pub user_type: Option<String>,
}

#[derive(Default)]
pub struct RoomDirectory {
    rooms: HashMap<String, Vec<RoomMember>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the session to the room, returning the members that were
    /// already there (so the caller can notify them). Re-joining updates
    /// the participant label instead of duplicating the membership.
    pub fn join(
        &mut self,
        room_id: &str,
        session: SessionHandle,
        user_type: Option<String>,
    ) -> Vec<SessionHandle> {
        let members = self.rooms.entry(room_id.to_string()).or_default();
        let existing: Vec<SessionHandle> = members
            .iter()
            .filter(|m| m.session.conn_id() != session.conn_id())
            .map(|m| m.session.clone())
            .collect();
        match members
            .iter_mut()
            .find(|m| m.session.conn_id() == session.conn_id())
        {
            Some(member) => member.user_type = user_type,
            None => members.push(RoomMember { session, user_type }),
        }
        existing
    }

    /// Every member of the room except the given connection.
    pub fn others(&self, room_id: &str, conn_id: &str) -> Vec<SessionHandle> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.session.conn_id() != conn_id)
                    .map(|m| m.session.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes the session from the room; empty rooms are dropped.
    pub fn leave(&mut self, room_id: &str, conn_id: &str) {
        if let Some(members) = self.rooms.get_mut(room_id) {
            members.retain(|m| m.session.conn_id() != conn_id);
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }

    /// Rooms this connection is currently a member of (disconnect sweep).
    pub fn rooms_of(&self, conn_id: &str) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|(_, members)| {
                members.iter().any(|m| m.session.conn_id() == conn_id)
            })
            .map(|(room_id, _)| room_id.clone())
            .collect()
    }
}
