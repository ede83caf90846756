use std::collections::HashMap;

use crate::error::{SignalingError, SignalingResult};

/// Maximum number of sessions sharing a room.
pub const ROOM_CAPACITY: usize = 2;
pub const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, Clone, Default)]
pub struct Room {
    /// Join order; the first entry is the initiator.
    pub participants: Vec<String>,
}

impl Room {

    fn others(&self, session_id: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|id| id.as_str() != session_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// First occupant: the caller is the initiator.
    Created { room_id: String },
    /// Room already had someone in it.
    Joined { room_id: String, peers: Vec<String> },
    Full { room_id: String },
}

/// A session leaving a room, with whoever is still inside.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub room_id: String,
    pub remaining: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResult {
    pub outcome: JoinOutcome,
    /// Set when joining moved the session out of a different room.
    pub departure: Option<Departure>,
    /// The session was already in this room.
    pub rejoined: bool,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    membership: HashMap<String, String>,
}

pub fn normalize_room_id(raw: &str) -> SignalingResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_ROOM_ID_LEN {
        return Err(SignalingError::InvalidRoom(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, room_id: &str, session_id: &str) -> SignalingResult<JoinResult> {
        let room_id = normalize_room_id(room_id)?;

        if self.membership.get(session_id) == Some(&room_id) {
            // Rejoining the current room changes nothing.
            let peers = self.peers_of(session_id);
            let outcome = if peers.is_empty() {
                JoinOutcome::Created { room_id }
            } else {
                JoinOutcome::Joined { room_id, peers }
            };
            return Ok(JoinResult {
                outcome,
                departure: None,
                rejoined: true,
            });
        }

        if self
            .rooms
            .get(&room_id)
            .is_some_and(|room| room.participants.len() >= ROOM_CAPACITY)
        {
            return Ok(JoinResult {
                outcome: JoinOutcome::Full { room_id },
                departure: None,
                rejoined: false,
            });
        }

        let departure = self.leave(session_id);

        let room = self
            .rooms
            .entry(room_id.clone())
            .or_default();
        room.participants.push(session_id.to_string());
        let peers = room.others(session_id);
        self.membership
            .insert(session_id.to_string(), room_id.clone());

        let outcome = if peers.is_empty() {
            JoinOutcome::Created { room_id }
        } else {
            JoinOutcome::Joined { room_id, peers }
        };
        Ok(JoinResult {
            outcome,
            departure,
            rejoined: false,
        })
    }

    pub fn leave(&mut self, session_id: &str) -> Option<Departure> {
        let room_id = self.membership.remove(session_id)?;
        let room = self.rooms.get_mut(&room_id)?;
        room.participants.retain(|id| id != session_id);
        let remaining = room.participants.clone();
        if remaining.is_empty() {
            self.rooms.remove(&room_id);
        }
        Some(Departure { room_id, remaining })
    }

    pub fn room_of(&self, session_id: &str) -> Option<&str> {
        self.membership.get(session_id).map(String::as_str)
    }

    /// Everyone in the caller's room except the caller.
    pub fn peers_of(&self, session_id: &str) -> Vec<String> {
        self.room_of(session_id)
            .and_then(|room_id| self.rooms.get(room_id))
            .map(|room| room.others(session_id))
            .unwrap_or_default()
    }

    pub fn occupants(&self, room_id: &str) -> Option<&[String]> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants.as_slice())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
