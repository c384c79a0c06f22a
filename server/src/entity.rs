//! Entity state store (C4): the authoritative position/velocity/rotation of
//! players and NPCs, plus the indices that bind each entity to a celestial
//! body and to an AOI.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use math::{Quat, Vec3};
use protocol::{AoiId, BodyId, EntityId, EntityKind as WireEntityKind, EntityState, PeerId};

use crate::celestial::BodyRef;
use crate::config::Settings;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player,
    Npc,
}

impl From<EntityKind> for WireEntityKind {
    fn from(k: EntityKind) -> Self {
        match k {
            EntityKind::Player => WireEntityKind::Player,
            EntityKind::Npc => WireEntityKind::Npc,
        }
    }
}

/// Transport-facing metadata a player entity carries on top of plain
/// kinematics (§3).
#[derive(Debug, Clone)]
pub struct PlayerMeta {
    pub peer_id: PeerId,
    pub peer_address: SocketAddr,
    pub connected: bool,
    pub auth_token_fingerprint: u64,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub nearest_body_id: Option<BodyId>,
    pub aoi_id: Option<AoiId>,
    pub last_update_time: f64,
    pub last_input_sequence: u32,
    pub player: Option<PlayerMeta>,
}

/// A validated kinematic update, already decoded off the wire by the
/// transport's `ClientStateUpdate` handling.
#[derive(Debug, Clone, Copy)]
pub struct ClientUpdate {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub input_sequence: u32,
}

/// The outcome of an `apply_client_update` call, distinguishing an
/// admission-layer rejection from a value accepted but flagged for an
/// asynchronous audit (§4.7's synchronous-bounds mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted,
    Clamped,
}

pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
    by_aoi: HashMap<AoiId, HashSet<EntityId>>,
    unassigned: HashSet<EntityId>,
    by_body: HashMap<BodyId, HashSet<EntityId>>,
    by_peer: HashMap<PeerId, EntityId>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            by_aoi: HashMap::new(),
            unassigned: HashSet::new(),
            by_body: HashMap::new(),
            by_peer: HashMap::new(),
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Rebinds `id` into `nearest_body_id`'s `by_body` bucket. Used by the
    /// NPC autopilot, which writes entity kinematics directly rather than
    /// through `apply_client_update`.
    pub fn set_nearest_body(&mut self, id: EntityId, nearest_body_id: Option<BodyId>) {
        self.rebind_body(id, nearest_body_id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_for_peer(&self, peer_id: PeerId) -> Option<EntityId> {
        self.by_peer.get(&peer_id).copied()
    }

    /// Spawns a fresh player entity bound to `peer_id`, as done during
    /// handshake acceptance (§4.3). Validation is identical to
    /// `apply_client_update`'s admission checks (§4.4).
    pub fn spawn_player(
        &mut self,
        peer_id: PeerId,
        peer_address: SocketAddr,
        auth_token_fingerprint: u64,
        position: Vec3,
        velocity: Vec3,
        rotation: Quat,
        now: f64,
        settings: &Settings,
    ) -> Result<EntityId, CoreError> {
        if velocity.length() > settings.v_max {
            return Err(CoreError::SanityViolation {
                peer_id,
                reason: format!(
                    "initial velocity {} exceeds v_max {}",
                    velocity.length(),
                    settings.v_max
                ),
            });
        }
        let id = EntityId::new_random();
        let entity = Entity {
            id,
            kind: EntityKind::Player,
            position,
            velocity,
            rotation,
            nearest_body_id: None,
            aoi_id: None,
            last_update_time: now,
            last_input_sequence: 0,
            player: Some(PlayerMeta {
                peer_id,
                peer_address,
                connected: true,
                auth_token_fingerprint,
            }),
        };
        self.insert(entity);
        self.by_peer.insert(peer_id, id);
        Ok(id)
    }

    /// Admin-initiated NPC creation (§4.4); identical validation to a
    /// player spawn, minus the transport metadata.
    pub fn spawn_npc(
        &mut self,
        position: Vec3,
        velocity: Vec3,
        rotation: Quat,
        now: f64,
        settings: &Settings,
    ) -> Result<EntityId, CoreError> {
        if velocity.length() > settings.v_max {
            return Err(CoreError::ConfigError(format!(
                "npc initial velocity {} exceeds v_max {}",
                velocity.length(),
                settings.v_max
            )));
        }
        let id = EntityId::new_random();
        let entity = Entity {
            id,
            kind: EntityKind::Npc,
            position,
            velocity,
            rotation,
            nearest_body_id: None,
            aoi_id: None,
            last_update_time: now,
            last_input_sequence: 0,
            player: None,
        };
        self.insert(entity);
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.remove(&id) else {
            return false;
        };
        if let Some(aoi_id) = entity.aoi_id {
            self.by_aoi.entry(aoi_id).or_default().remove(&id);
        } else {
            self.unassigned.remove(&id);
        }
        if let Some(body_id) = entity.nearest_body_id {
            self.by_body.entry(body_id).or_default().remove(&id);
        }
        if let Some(player) = &entity.player {
            self.by_peer.remove(&player.peer_id);
        }
        true
    }

    fn insert(&mut self, entity: Entity) {
        self.unassigned.insert(entity.id);
        self.entities.insert(entity.id, entity);
    }

    /// Validates and applies a client-submitted kinematic update (§4.4):
    /// `|velocity| <= v_max`, the reported displacement is consistent with
    /// `v_max` and elapsed time within `position_update_tolerance`, and
    /// `input_sequence` is strictly increasing. Also recomputes
    /// `nearest_body_id` (§3's "updated whenever position is written").
    ///
    /// A violation does not error out silently: callers get back the
    /// `CoreError::SanityViolation` so the sanity checker (C7) can log and
    /// count it toward the peer's disconnect threshold, per the §7 recovery
    /// policy this function is a building block for, not a full policy of
    /// its own.
    pub fn apply_client_update(
        &mut self,
        peer_id: PeerId,
        update: ClientUpdate,
        now: f64,
        bodies: &[BodyRef],
        settings: &Settings,
    ) -> Result<UpdateOutcome, CoreError> {
        let entity_id = self
            .by_peer
            .get(&peer_id)
            .copied()
            .ok_or_else(|| CoreError::ProtocolViolation {
                peer_id,
                reason: "ClientStateUpdate before Accept".into(),
            })?;

        let (last_position, last_update_time, last_sequence) = {
            let e = self.entities.get(&entity_id).expect("by_peer is consistent");
            (e.position, e.last_update_time, e.last_input_sequence)
        };

        if update.input_sequence <= last_sequence && last_sequence != 0 {
            return Err(CoreError::ProtocolViolation {
                peer_id,
                reason: format!(
                    "input_sequence {} did not increase past {}",
                    update.input_sequence, last_sequence
                ),
            });
        }

        let mut outcome = UpdateOutcome::Accepted;
        let mut velocity = update.velocity;
        if velocity.length() > settings.v_max {
            outcome = UpdateOutcome::Clamped;
            velocity = velocity.normalize() * settings.v_max;
        }

        let dt_since_last = (now - last_update_time).max(0.0);
        let max_displacement = settings.v_max * dt_since_last * settings.position_update_tolerance;
        let displacement = update.position.distance(last_position);
        let position = if displacement > max_displacement && max_displacement > 0.0 {
            outcome = UpdateOutcome::Clamped;
            last_position.lerp(update.position, max_displacement / displacement)
        } else {
            update.position
        };

        let nearest_body_id = nearest_body(position, bodies);

        if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.position = position;
            entity.velocity = velocity;
            entity.rotation = update.rotation;
            entity.last_update_time = now;
            entity.last_input_sequence = update.input_sequence;
            self.rebind_body(entity_id, nearest_body_id);
        }

        Ok(outcome)
    }

    /// Moves `id` from its current `by_body` bucket to `nearest_body_id`'s,
    /// a no-op if unchanged.
    fn rebind_body(&mut self, id: EntityId, nearest_body_id: Option<BodyId>) {
        let previous = self.entities.get(&id).and_then(|e| e.nearest_body_id);
        if previous == nearest_body_id {
            return;
        }
        if let Some(old) = previous {
            self.by_body.entry(old).or_default().remove(&id);
        }
        if let Some(new_id) = nearest_body_id {
            self.by_body.entry(new_id).or_default().insert(id);
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.nearest_body_id = nearest_body_id;
        }
    }

    /// Called by the AOI partitioner (C6) once membership for this tick is
    /// decided; the entity store does not compute AOI assignment itself.
    pub fn set_aoi(&mut self, id: EntityId, aoi_id: Option<AoiId>) {
        let previous = self.entities.get(&id).and_then(|e| e.aoi_id);
        if previous == aoi_id {
            return;
        }
        match previous {
            Some(old) => {
                self.by_aoi.entry(old).or_default().remove(&id);
            }
            None => {
                self.unassigned.remove(&id);
            }
        }
        match aoi_id {
            Some(new_id) => {
                self.by_aoi.entry(new_id).or_default().insert(id);
            }
            None => {
                self.unassigned.insert(id);
            }
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.aoi_id = aoi_id;
        }
    }

    pub fn entities_in_aoi(&self, aoi_id: AoiId) -> impl Iterator<Item = &Entity> {
        self.by_aoi
            .get(&aoi_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.entities.get(id))
    }

    pub fn unassigned_entities(&self) -> impl Iterator<Item = &Entity> {
        self.unassigned.iter().filter_map(move |id| self.entities.get(id))
    }

    /// Pure read used by replication: a read-only, order-stable view of the
    /// named entities (§4.4).
    pub fn snapshot(&self, ids: &[EntityId]) -> Vec<EntityState> {
        ids.iter()
            .filter_map(|id| self.entities.get(id))
            .map(|e| EntityState {
                id: e.id,
                kind: e.kind.into(),
                position: e.position.into(),
                velocity: e.velocity.into(),
                rotation: e.rotation.into(),
                nearest_body_id: e.nearest_body_id.unwrap_or(BodyId(0)),
                aoi_event: protocol::AoiEvent::None,
            })
            .collect()
    }
}

/// Chooses, among `bodies`, the one minimizing `distance * per-type
/// coefficient` (§4.4). Returns `None` if `bodies` is empty.
pub fn nearest_body(position: Vec3, bodies: &[BodyRef]) -> Option<BodyId> {
    bodies
        .iter()
        .map(|b| (b.id, position.distance(b.position) * b.body_type.nearest_weight()))
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celestial::BodyType;

    fn settings() -> Settings {
        Settings::default()
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn duplicate_sequence_is_rejected_after_first_apply() {
        let mut store = EntityStore::new();
        let settings = settings();
        let peer = PeerId(1);
        store
            .spawn_player(peer, addr(), 0, Vec3::ZERO, Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();

        let update = ClientUpdate {
            position: Vec3::new(1.0, 0.0, 0.0),
            velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            input_sequence: 42,
        };
        store
            .apply_client_update(peer, update, 1.0, &[], &settings)
            .unwrap();
        let entity_id = store.entity_for_peer(peer).unwrap();
        assert_eq!(store.get(entity_id).unwrap().last_input_sequence, 42);

        let result = store.apply_client_update(peer, update, 1.0, &[], &settings);
        assert!(result.is_err());
        assert_eq!(store.get(entity_id).unwrap().last_input_sequence, 42);
    }

    #[test]
    fn excessive_velocity_is_clamped_not_rejected() {
        let mut store = EntityStore::new();
        let settings = settings();
        let peer = PeerId(1);
        store
            .spawn_player(peer, addr(), 0, Vec3::ZERO, Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();

        let update = ClientUpdate {
            position: Vec3::ZERO,
            velocity: Vec3::new(settings.v_max * 10.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            input_sequence: 1,
        };
        let outcome = store
            .apply_client_update(peer, update, 0.1, &[], &settings)
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Clamped);
        let entity_id = store.entity_for_peer(peer).unwrap();
        assert!(store.get(entity_id).unwrap().velocity.length() <= settings.v_max + 1e-6);
    }

    #[test]
    fn nearest_body_prefers_planet_over_closer_asteroid_by_weight() {
        let planet = BodyRef {
            id: BodyId(1),
            position: Vec3::new(100.0, 0.0, 0.0),
            body_type: BodyType::Planet,
        };
        let asteroid = BodyRef {
            id: BodyId(2),
            position: Vec3::new(95.0, 0.0, 0.0),
            body_type: BodyType::Asteroid,
        };
        let bodies = [planet, asteroid];
        // Probe point closer to the asteroid in raw distance (95 vs 100),
        // but planet*0.8=80 still beats asteroid*1.1=104.5, so the planet
        // wins the weighted comparison despite being farther away.
        let probe = Vec3::new(0.0, 0.0, 0.0);
        assert_eq!(nearest_body(probe, &bodies), Some(BodyId(1)));
    }
}
