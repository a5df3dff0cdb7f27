//! Server -> Client snapshot building.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{EntityId, Position, ProtocolError};

/// One visible entity inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl EntityState {
    #[inline]
    pub fn new(id: EntityId, position: Position) -> Self {
        Self {
            id,
            x: position.x,
            y: position.y,
            z: position.z,
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Per-client world snapshot, sent once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Server timestamp in epoch milliseconds.
    pub t: u64,
    /// Visible entities ordered by id.
    pub entities: Vec<EntityState>,
}

impl Snapshot {
    pub fn new(t: u64, mut entities: Vec<EntityState>) -> Self {
        entities.sort_unstable_by_key(|e| e.id);
        Self { t, entities }
    }

    /// Serialize to the JSON text frame sent to clients.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(ProtocolError::Encode)
    }

    /// Parse a snapshot frame (client side and tests).
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::MalformedEnvelope)
    }

    /// Find an entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entities[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_shape() {
        let snap = Snapshot::new(
            1000,
            vec![
                EntityState::new(3, Position::new(1.0, 2.0, 3.0)),
                EntityState::new(1, Position::ZERO),
            ],
        );
        let bytes = snap.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["t"], 1000);
        assert_eq!(value["entities"][0]["id"], 1);
        assert_eq!(value["entities"][1]["id"], 3);
        assert_eq!(value["entities"][1]["z"], 3.0);
    }

    #[test]
    fn test_snapshot_entity_lookup() {
        let snap = Snapshot::new(
            0,
            vec![
                EntityState::new(9, Position::X),
                EntityState::new(2, Position::Y),
            ],
        );
        assert_eq!(snap.entity(2).map(|e| e.position()), Some(Position::Y));
        assert!(snap.entity(5).is_none());
    }
}
