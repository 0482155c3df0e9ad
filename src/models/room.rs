//! Therapy room model.
//!
//! Rooms host sessions. Each room has a capacity (concurrent sessions),
//! a set of supported session types, and the equipment installed in it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::SessionType;

/// A room that can host therapy sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TherapyRoom {
    /// Unique room identifier.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Concurrent sessions the room can hold (default: 1).
    pub capacity: u32,
    /// Session types the room is set up for.
    pub supported_session_types: BTreeSet<SessionType>,
    /// Equipment installed in the room.
    #[serde(default)]
    pub equipment: BTreeSet<String>,
    /// Inactive rooms take no bookings.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TherapyRoom {
    /// Creates an active single-occupancy room with no supported types.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            capacity: 1,
            supported_session_types: BTreeSet::new(),
            equipment: BTreeSet::new(),
            active: true,
        }
    }

    /// Sets the room name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the capacity.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Adds a supported session type.
    pub fn supporting(mut self, session_type: SessionType) -> Self {
        self.supported_session_types.insert(session_type);
        self
    }

    /// Adds installed equipment.
    pub fn with_equipment(mut self, item: impl Into<String>) -> Self {
        self.equipment.insert(item.into());
        self
    }

    /// Marks the room inactive.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether the room may host `session_type`.
    pub fn can_host(&self, session_type: &SessionType) -> bool {
        self.active && self.supported_session_types.contains(session_type)
    }

    /// Required items the room does not have.
    pub fn missing_equipment<'a>(&self, required: &'a BTreeSet<String>) -> Vec<&'a str> {
        required
            .iter()
            .filter(|item| !self.equipment.contains(*item))
            .map(String::as_str)
            .collect()
    }
}

/// Finds a room by id.
pub fn find_room<'a>(rooms: &'a [TherapyRoom], id: &str) -> Option<&'a TherapyRoom> {
    rooms.iter().find(|r| r.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_builder() {
        let r = TherapyRoom::new("R1")
            .with_name("Sensory Gym")
            .with_capacity(2)
            .supporting(SessionType::Occupational)
            .with_equipment("swing");

        assert_eq!(r.id, "R1");
        assert_eq!(r.capacity, 2);
        assert!(r.can_host(&SessionType::Occupational));
        assert!(!r.can_host(&SessionType::Speech));
    }

    #[test]
    fn test_inactive_room_hosts_nothing() {
        let r = TherapyRoom::new("R1").supporting(SessionType::Speech).inactive();
        assert!(!r.can_host(&SessionType::Speech));
    }

    #[test]
    fn test_missing_equipment() {
        let r = TherapyRoom::new("R1").with_equipment("mirror");
        let required: BTreeSet<String> = ["mirror".to_string(), "swing".to_string()].into();
        assert_eq!(r.missing_equipment(&required), vec!["swing"]);
    }
}
