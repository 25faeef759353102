//! Named groups of connections.
//!
//! The registry keeps both directions of membership consistent: a room lists
//! its members, and each connection lists the rooms it joined. Both sides are
//! updated under the registry lock. Rooms are created on first join and
//! removed when their last member leaves.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionId};
use crate::message::Message;

/// Room name to member map, owned by one engine instance.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, HashMap<ConnectionId, Connection>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to `room`, creating the room if needed. Idempotent.
    ///
    /// Ignored once `conn` has started teardown. The check runs under the
    /// registry lock, so a join either lands before teardown's `leave_all`
    /// (and is undone by it) or is refused.
    pub fn join(&self, conn: &Connection, room: &str) {
        let mut rooms = self.rooms.lock();
        if conn.is_finalized() {
            trace!(connection_id = %conn.id(), room, "Join refused, connection closed");
            return;
        }
        let members = rooms.entry(room.to_string()).or_default();
        if members.insert(conn.id(), conn.clone()).is_none() {
            conn.room_set().lock().insert(room.to_string());
            trace!(connection_id = %conn.id(), room, members = members.len(), "Joined room");
        }
    }

    /// Remove `conn` from `room`, deleting the room if it empties.
    ///
    /// Idempotent in every state: after teardown the connection is in no
    /// room, so this never creates or keeps a room.
    pub fn leave(&self, conn: &Connection, room: &str) {
        let mut rooms = self.rooms.lock();
        Self::remove_member(&mut rooms, conn.id(), room);
        conn.room_set().lock().remove(room);
    }

    /// Remove `conn` from every room it joined.
    pub fn leave_all(&self, conn: &Connection) {
        let mut rooms = self.rooms.lock();
        let joined: Vec<String> = conn.room_set().lock().drain().collect();
        for room in &joined {
            Self::remove_member(&mut rooms, conn.id(), room);
        }
        if !joined.is_empty() {
            debug!(connection_id = %conn.id(), rooms = joined.len(), "Left all rooms");
        }
    }

    fn remove_member(
        rooms: &mut HashMap<String, HashMap<ConnectionId, Connection>>,
        id: ConnectionId,
        room: &str,
    ) {
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                rooms.remove(room);
                trace!(room, "Room removed");
            }
        }
    }

    /// Send `message` to every member of `room` except `exclude`.
    ///
    /// Unknown rooms are a no-op. Returns how many members the message was
    /// queued for; members that are closing or whose queue is full are
    /// skipped.
    pub fn broadcast(&self, room: &str, message: &Message, exclude: Option<ConnectionId>) -> usize {
        // Sends happen outside the lock.
        let members = self.members(room);
        let mut delivered = 0;
        for member in members.iter().filter(|c| Some(c.id()) != exclude) {
            match member.send(message.clone()) {
                Ok(status) if status.is_queued() => delivered += 1,
                Ok(_) => {}
                Err(e) => {
                    debug!(connection_id = %member.id(), room, error = %e, "Broadcast skipped member");
                }
            }
        }
        delivered
    }

    /// The current members of `room`.
    pub fn members(&self, room: &str) -> Vec<Connection> {
        self.rooms
            .lock()
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members in `room`.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.lock().get(room).map_or(0, HashMap::len)
    }

    /// Names of all non-empty rooms, sorted.
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Whether `room` exists.
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.lock().contains_key(room)
    }
}
