//! World state management.
//!
//! Owns every entity position, the user and client registrations, the mirror
//! table and the spatial index. The tick loop is the only caller of
//! [`World::step`]; connection tasks use the registration and input methods.

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::config::Config;
use crate::input::{Input, InputQueue};
use crate::mirror::{MirrorError, MirrorTable};
use crate::spatial::SpatialGrid;
use bytes::Bytes;
use glam::Vec3;
use protocol::{EntityId, Position};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};

/// Lower corner of the world box.
pub const WORLD_MIN: Vec3 = Vec3::new(-500.0, 0.0, -500.0);
/// Upper corner of the world box.
pub const WORLD_MAX: Vec3 = Vec3::new(500.0, 100.0, 500.0);

/// Identifier of the primary entity, always the first one created.
pub const PRIMARY_ENTITY: EntityId = 1;

/// A simulated body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// One coordinate pulled back into the world box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampEvent {
    pub entity: EntityId,
    pub axis: Axis,
    /// Coordinate before clamping.
    pub from: f32,
    /// Coordinate after clamping.
    pub to: f32,
}

/// Summary of a single [`World::step`].
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub inputs_applied: usize,
    pub inputs_ignored: usize,
    pub clamps: Vec<ClampEvent>,
    pub broadcast: BroadcastReport,
}

/// A registered client's output queue and last recorded position.
#[derive(Debug)]
pub(crate) struct ClientSlot {
    pub queue: mpsc::Sender<Bytes>,
    /// `None` until the client's entity exists.
    pub position: Option<Position>,
}

/// Fields guarded by the world lock.
#[derive(Debug)]
pub(crate) struct WorldState {
    pub entities: HashMap<EntityId, Entity>,
    pub users: HashMap<EntityId, String>,
    pub clients: HashMap<EntityId, ClientSlot>,
    pub mirrors: MirrorTable,
    pub index: SpatialGrid,
    pub tick: u64,
}

impl WorldState {
    /// Apply one input. Returns false if the input was ignored.
    fn apply_input(&mut self, input: &Input, dt: f32) -> bool {
        if !input.acceleration.is_finite() {
            return false;
        }
        let displacement = input.acceleration * dt;

        let Some(entity) = self.entities.get_mut(&input.target) else {
            return false;
        };
        entity.position += displacement;

        for link in self.mirrors.links_from(input.target) {
            if let Some(mirror) = self.entities.get_mut(&link.target) {
                mirror.position += displacement * link.scale;
            }
        }
        true
    }

    /// Clamp every entity into the world box, recording each adjustment.
    fn clamp_all(&mut self, events: &mut Vec<ClampEvent>) {
        for entity in self.entities.values_mut() {
            let id = entity.id;
            let p = &mut entity.position;
            for (axis, value, min, max) in [
                (Axis::X, &mut p.x, WORLD_MIN.x, WORLD_MAX.x),
                (Axis::Y, &mut p.y, WORLD_MIN.y, WORLD_MAX.y),
                (Axis::Z, &mut p.z, WORLD_MIN.z, WORLD_MAX.z),
            ] {
                if let Some(to) = clamp_axis(*value, min, max) {
                    trace!(entity = id, axis = ?axis, from = *value, to, "clamped to world bounds");
                    events.push(ClampEvent {
                        entity: id,
                        axis,
                        from: *value,
                        to,
                    });
                    *value = to;
                }
            }
        }
    }

    /// Rebuild the spatial index and refresh recorded client positions.
    fn reindex(&mut self) {
        self.index
            .rebuild(self.entities.values().map(|e| (e.id, e.position)));
        for (id, slot) in self.clients.iter_mut() {
            slot.position = self.entities.get(id).map(|e| e.position);
        }
    }
}

/// New value for an out-of-range coordinate, or `None` if it is in range.
/// NaN is treated as below range.
#[inline]
fn clamp_axis(value: f32, min: f32, max: f32) -> Option<f32> {
    if value > max {
        Some(max)
    } else if value >= min {
        None
    } else {
        Some(min)
    }
}

/// The authoritative world.
#[derive(Debug)]
pub struct World {
    state: RwLock<WorldState>,
    inputs: InputQueue,
    broadcaster: Broadcaster,
    next_id: AtomicU64,
    client_queue_capacity: usize,
    stats_interval: u64,
}

impl World {
    /// Create a world holding the primary entity and, when enabled, one mirror
    /// entity per configured coefficient.
    pub fn new(config: &Config) -> Self {
        let mut state = WorldState {
            entities: HashMap::with_capacity(256),
            users: HashMap::new(),
            clients: HashMap::new(),
            mirrors: MirrorTable::new(config.mirrors.enabled),
            index: SpatialGrid::new(config.interest.effective_cell_size()),
            tick: 0,
        };

        let next_id = AtomicU64::new(PRIMARY_ENTITY);
        let spawn = |state: &mut WorldState| {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            state.entities.insert(
                id,
                Entity {
                    id,
                    position: Position::ZERO,
                },
            );
            id
        };

        let primary = spawn(&mut state);
        debug_assert_eq!(primary, PRIMARY_ENTITY);

        if config.mirrors.enabled {
            for &scale in &config.mirrors.coefficients {
                let mirror = spawn(&mut state);
                if let Err(e) = state.mirrors.link(primary, mirror, scale) {
                    warn!(mirror, "Mirror not linked: {}", e);
                }
            }
        }
        state.reindex();

        info!(
            entities = state.entities.len(),
            mirrors = state.mirrors.len(),
            cell_size = state.index.cell_size(),
            "World initialized"
        );

        Self {
            state: RwLock::new(state),
            inputs: InputQueue::new(config.simulation.input_queue_capacity),
            broadcaster: Broadcaster::new(config.interest.visibility_radius),
            next_id,
            client_queue_capacity: config.simulation.client_queue_capacity.max(1),
            stats_interval: config.simulation.stats_interval_ticks,
        }
    }

    /// Identifier of the primary entity.
    #[inline]
    pub fn primary(&self) -> EntityId {
        PRIMARY_ENTITY
    }

    /// Allocate a new entity at the origin.
    pub async fn create_entity(&self) -> EntityId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;
        state.entities.insert(
            id,
            Entity {
                id,
                position: Position::ZERO,
            },
        );
        id
    }

    pub async fn has_entity(&self, id: EntityId) -> bool {
        self.state.read().await.entities.contains_key(&id)
    }

    pub async fn position(&self, id: EntityId) -> Option<Position> {
        self.state.read().await.entities.get(&id).map(|e| e.position)
    }

    pub async fn entity_count(&self) -> usize {
        self.state.read().await.entities.len()
    }

    /// All entities, ordered by id.
    pub async fn entities(&self) -> Vec<Entity> {
        let state = self.state.read().await;
        let mut entities: Vec<Entity> = state.entities.values().copied().collect();
        entities.sort_unstable_by_key(|e| e.id);
        entities
    }

    /// Associate an external identity with an entity. Ignored for unknown ids.
    pub async fn bind_user(&self, id: EntityId, user: impl Into<String>) -> bool {
        let mut state = self.state.write().await;
        if !state.entities.contains_key(&id) {
            debug!(entity = id, "bind_user on unknown entity ignored");
            return false;
        }
        state.users.insert(id, user.into());
        true
    }

    /// Remove the identity binding. No-op if there is none.
    pub async fn unbind_user(&self, id: EntityId) {
        self.state.write().await.users.remove(&id);
    }

    pub async fn user_of(&self, id: EntityId) -> Option<String> {
        self.state.read().await.users.get(&id).cloned()
    }

    /// Create an output queue sized for snapshot delivery.
    pub fn client_channel(&self) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(self.client_queue_capacity)
    }

    /// Register (or replace) the output queue for an entity.
    pub async fn register_client(&self, id: EntityId, queue: mpsc::Sender<Bytes>) {
        let mut state = self.state.write().await;
        let position = state.entities.get(&id).map(|e| e.position);
        state.clients.insert(id, ClientSlot { queue, position });
    }

    /// Remove the output queue for an entity. The entity itself stays.
    pub async fn unregister_client(&self, id: EntityId) {
        self.state.write().await.clients.remove(&id);
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    /// Link `target` to mirror `source`'s inputs scaled by `scale`.
    pub async fn link_mirror(
        &self,
        source: EntityId,
        target: EntityId,
        scale: f32,
    ) -> Result<(), MirrorError> {
        let mut state = self.state.write().await;
        for id in [source, target] {
            if !state.entities.contains_key(&id) {
                return Err(MirrorError::UnknownEntity(id));
            }
        }
        if target == PRIMARY_ENTITY {
            return Err(MirrorError::PrimaryTarget(target));
        }
        state.mirrors.link(source, target, scale)
    }

    pub async fn unlink_mirror(&self, target: EntityId) {
        self.state.write().await.mirrors.unlink(target);
    }

    pub async fn mirror_coefficient(&self, id: EntityId) -> Option<f32> {
        self.state.read().await.mirrors.coefficient(id)
    }

    pub async fn is_mirror(&self, id: EntityId) -> bool {
        self.state.read().await.mirrors.contains(id)
    }

    pub async fn mirror_count(&self) -> usize {
        self.state.read().await.mirrors.len()
    }

    pub async fn set_mirrors_enabled(&self, enabled: bool) {
        self.state.write().await.mirrors.set_enabled(enabled);
    }

    /// Queue an input for the next tick, waiting while the queue is full.
    pub async fn submit_input(&self, input: Input) {
        self.inputs.push(input).await;
    }

    pub fn pending_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of completed ticks.
    pub async fn tick_count(&self) -> u64 {
        self.state.read().await.tick
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// Must not be called concurrently with itself.
    pub async fn step(&self, dt: f32) -> TickReport {
        let batch = self.inputs.drain().await;
        let mut report = TickReport::default();

        {
            let mut state = self.state.write().await;
            state.tick += 1;
            report.tick = state.tick;

            for input in &batch {
                if state.apply_input(input, dt) {
                    report.inputs_applied += 1;
                } else {
                    report.inputs_ignored += 1;
                }
            }

            state.clamp_all(&mut report.clamps);
            state.reindex();
        } // Write lock released here

        report.broadcast = self.broadcast().await;

        if self.stats_interval > 0 && report.tick % self.stats_interval == 0 {
            let state = self.state.read().await;
            debug!(
                tick = report.tick,
                entities = state.entities.len(),
                clients = state.clients.len(),
                inputs = report.inputs_applied,
                ignored = report.inputs_ignored,
                clamps = report.clamps.len(),
                sent = report.broadcast.sent,
                dropped = report.broadcast.dropped,
                "tick stats"
            );
        }

        report
    }

    /// Build and enqueue one snapshot per registered client from the current
    /// state. Serialization and queue writes happen after the read lock is
    /// released.
    pub async fn broadcast(&self) -> BroadcastReport {
        let pending = {
            let state = self.state.read().await;
            self.broadcaster.collect(&state)
        }; // Read lock released here
        Broadcaster::deliver(pending)
    }
}
