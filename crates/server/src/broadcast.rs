//! Per-client snapshot assembly and delivery (interest management).
//!
//! Collection runs under the world read lock and copies out only what each
//! client can see. Serialization and queue writes run afterwards without any
//! lock, and never wait: a full client queue loses that tick's snapshot.

use crate::spatial::SpatialGrid;
use crate::world::{Entity, WorldState};
use bytes::Bytes;
use protocol::{EntityId, EntityState, Position, Snapshot};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Snapshots enqueued.
    pub sent: usize,
    /// Snapshots dropped because the client queue was full.
    pub dropped: usize,
    /// Snapshots dropped because the receiving side is gone.
    pub closed: usize,
}

/// Visible entities for one client, ready to be serialized.
#[derive(Debug)]
pub(crate) struct PendingSnapshot {
    pub client: EntityId,
    pub queue: mpsc::Sender<Bytes>,
    pub visible: Vec<EntityState>,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    radius: f32,
}

impl Broadcaster {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    /// Gather each registered client's visible set from the current state.
    pub(crate) fn collect(&self, state: &WorldState) -> Vec<PendingSnapshot> {
        state
            .clients
            .iter()
            .filter_map(|(&client, slot)| {
                let center = slot.position?;
                Some(PendingSnapshot {
                    client,
                    queue: slot.queue.clone(),
                    visible: visible_entities(&state.index, &state.entities, center, self.radius),
                })
            })
            .collect()
    }

    /// Serialize and enqueue every pending snapshot without waiting.
    pub(crate) fn deliver(pending: Vec<PendingSnapshot>) -> BroadcastReport {
        let timestamp = now_millis();
        let mut report = BroadcastReport::default();

        for PendingSnapshot {
            client,
            queue,
            visible,
        } in pending
        {
            let bytes = match Snapshot::new(timestamp, visible).encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(client, error = %e, "Failed to encode snapshot");
                    report.dropped += 1;
                    continue;
                }
            };

            match queue.try_send(bytes) {
                Ok(()) => report.sent += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(client, "Client queue full, snapshot dropped");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    report.closed += 1;
                }
            }
        }

        report
    }
}

/// Entities within `radius` of `center` (3D distance), using the grid for
/// candidates on the X/Z plane.
pub fn visible_entities(
    index: &SpatialGrid,
    entities: &HashMap<EntityId, Entity>,
    center: Position,
    radius: f32,
) -> Vec<EntityState> {
    let radius_sq = radius * radius;
    index
        .query(center.x, center.z, radius)
        .into_iter()
        .filter_map(|id| entities.get(&id))
        .filter(|e| e.position.distance_squared(center) <= radius_sq)
        .map(|e| EntityState::new(e.id, e.position))
        .collect()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
