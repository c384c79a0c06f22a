//! AOI partitioner (C6): assigns every live entity to at most one AOI each
//! tick and derives the per-AOI replication rate (§4.6).

use std::collections::HashMap;

use math::Vec3;
use protocol::{AoiEvent, AoiId, AoiSummary, EntityId};

use crate::celestial::CelestialSimulator;
use crate::config::Settings;
use crate::entity::{Entity, EntityStore};

/// A fixed-point sphere that entities are assigned into. `center` tracks a
/// celestial body's position when `follows` is set; otherwise it is static.
#[derive(Debug, Clone)]
pub struct Aoi {
    pub id: AoiId,
    pub name: String,
    pub center: Vec3,
    pub radius: f64,
    pub capacity: u32,
    /// Optional body this AOI's center tracks (e.g. "orbit of Earth"); `None`
    /// means a fixed point in space.
    pub follows: Option<protocol::BodyId>,
    pub player_count: u32,
    pub npc_count: u32,
    pub load: f32,
    pub update_hz: f32,
    members: Vec<EntityId>,
    last_due_tick: u64,
}

impl Aoi {
    fn load(&self) -> f32 {
        if self.capacity == 0 {
            return 1.0;
        }
        (self.player_count + self.npc_count) as f32 / self.capacity as f32
    }
}

/// Admin input for `add_aoi`/`update_aoi` (§6's admin surface, extrapolated
/// from the celestial simulator's `BodySpec` pattern since §6 does not spell
/// out an AOI admin schema beyond "AOI definitions" in the persisted
/// snapshot).
#[derive(Debug, Clone)]
pub struct AoiSpec {
    pub name: String,
    pub center: Vec3,
    pub radius: f64,
    pub capacity: u32,
    pub follows: Option<protocol::BodyId>,
}

pub struct AoiPartitioner {
    aois: HashMap<AoiId, Aoi>,
    next_id: u32,
    /// Enter/leave events queued by `reassign` for the AOI they belong to,
    /// drained the next time that AOI's snapshot is due (§4.6(c): "reported
    /// as explicit enter/leave events in the next snapshot").
    pending_events: HashMap<AoiId, Vec<(EntityId, AoiEvent)>>,
}

impl Default for AoiPartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl AoiPartitioner {
    pub fn new() -> Self {
        Self {
            aois: HashMap::new(),
            next_id: 1,
            pending_events: HashMap::new(),
        }
    }

    pub fn add_aoi(&mut self, spec: AoiSpec) -> AoiId {
        let id = AoiId(self.next_id);
        self.next_id += 1;
        self.aois.insert(
            id,
            Aoi {
                id,
                name: spec.name,
                center: spec.center,
                radius: spec.radius,
                capacity: spec.capacity,
                follows: spec.follows,
                player_count: 0,
                npc_count: 0,
                load: 0.0,
                update_hz: 0.0,
                members: Vec::new(),
                last_due_tick: 0,
            },
        );
        id
    }

    /// Like `add_aoi` but with an explicit id, used when restoring a
    /// persisted snapshot.
    pub fn add_aoi_with_id(&mut self, id: AoiId, spec: AoiSpec) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.aois.insert(
            id,
            Aoi {
                id,
                name: spec.name,
                center: spec.center,
                radius: spec.radius,
                capacity: spec.capacity,
                follows: spec.follows,
                player_count: 0,
                npc_count: 0,
                load: 0.0,
                update_hz: 0.0,
                members: Vec::new(),
                last_due_tick: 0,
            },
        );
    }

    pub fn remove_aoi(&mut self, id: AoiId) -> bool {
        self.aois.remove(&id).is_some()
    }

    pub fn get(&self, id: AoiId) -> Option<&Aoi> {
        self.aois.get(&id)
    }

    pub fn list(&self) -> Vec<&Aoi> {
        self.aois.values().collect()
    }

    /// Step 4 of the tick (§4.8): reassigns every live entity and recomputes
    /// load/rate for each AOI (§4.6 steps 1–3). `celestial` supplies current
    /// body positions for AOIs that `follow` a body.
    pub fn reassign(&mut self, store: &mut EntityStore, celestial: &CelestialSimulator, settings: &Settings) {
        for aoi in self.aois.values_mut() {
            if let Some(body_id) = aoi.follows {
                if let Some(body) = celestial.get(body_id) {
                    aoi.center = body.position;
                }
            }
            aoi.members.clear();
            aoi.player_count = 0;
            aoi.npc_count = 0;
        }

        // Stable tie-break by AOI id (§4.6): iterate AOIs in id order when
        // comparing candidates for a given entity.
        let mut ordered_ids: Vec<AoiId> = self.aois.keys().copied().collect();
        ordered_ids.sort_by_key(|id| id.0);

        let entity_ids: Vec<EntityId> = store.iter().map(|e| e.id).collect();
        for entity_id in entity_ids {
            let Some(entity) = store.get(entity_id) else { continue };
            let assignment = self.assign_one(entity, &ordered_ids);
            let previous = entity.aoi_id;
            let kind = entity.kind;
            store.set_aoi(entity_id, assignment);

            if previous != assignment {
                if let Some(old_id) = previous {
                    self.pending_events
                        .entry(old_id)
                        .or_default()
                        .push((entity_id, AoiEvent::Leave));
                }
                if let Some(new_id) = assignment {
                    self.pending_events
                        .entry(new_id)
                        .or_default()
                        .push((entity_id, AoiEvent::Enter));
                }
            }

            if let Some(aoi_id) = assignment {
                if let Some(aoi) = self.aois.get_mut(&aoi_id) {
                    aoi.members.push(entity_id);
                    match kind {
                        crate::entity::EntityKind::Player => aoi.player_count += 1,
                        crate::entity::EntityKind::Npc => aoi.npc_count += 1,
                    }
                }
            }
        }

        for aoi in self.aois.values_mut() {
            aoi.load = aoi.load();
            aoi.update_hz = clamp_update_hz(
                settings.update_hz,
                settings.min_update_hz,
                settings.aoi_load_factor,
                aoi.load,
            ) as f32;
        }
    }

    /// §4.6 step 1: minimize `distance/radius`; assign if the ratio is `<=
    /// 1` and the AOI has room, else the nearest not-at-capacity AOI within
    /// `2R`, else unassigned.
    fn assign_one(&self, entity: &Entity, ordered_ids: &[AoiId]) -> Option<AoiId> {
        let mut best_primary: Option<(AoiId, f64)> = None;
        let mut best_fallback: Option<(AoiId, f64)> = None;

        for &id in ordered_ids {
            let aoi = self.aois.get(&id).expect("ordered_ids drawn from self.aois");
            if aoi.radius <= 0.0 {
                continue;
            }
            let distance = entity.position.distance(aoi.center);
            let ratio = distance / aoi.radius;
            let has_room = aoi.members.len() < aoi.capacity as usize;

            if ratio <= 1.0 && has_room {
                match best_primary {
                    Some((_, best_ratio)) if best_ratio <= ratio => {}
                    _ => best_primary = Some((id, ratio)),
                }
            } else if distance <= 2.0 * aoi.radius && has_room {
                match best_fallback {
                    Some((_, best_distance)) if best_distance <= distance => {}
                    _ => best_fallback = Some((id, distance)),
                }
            }
        }

        best_primary.or(best_fallback).map(|(id, _)| id)
    }

    /// Whether AOI `id`'s phase-staggered schedule is due this tick (§4.8
    /// step 5), given its own `update_hz` and the scheduler's `tick_hz`.
    /// Staggering spreads AOIs with the same rate across different tick
    /// offsets by hashing the AOI id, so they don't all snapshot in lockstep.
    pub fn is_due(&mut self, id: AoiId, tick_hz: f64, tick_index: u64) -> bool {
        let Some(aoi) = self.aois.get_mut(&id) else { return false };
        if aoi.update_hz <= 0.0 {
            return false;
        }
        let period_ticks = (tick_hz / aoi.update_hz as f64).max(1.0).round() as u64;
        let phase = (id.0 as u64) % period_ticks.max(1);
        let due = tick_index >= aoi.last_due_tick + period_ticks || tick_index == phase;
        if due {
            aoi.last_due_tick = tick_index;
        }
        due
    }

    /// §4.6 step 4: the view set for entity `E` in AOI `A` is every entity
    /// in `A` (minus `E`), plus every celestial body, plus every AOI's
    /// summary row — the bodies/summaries part is produced by the caller
    /// from the celestial simulator and `self.snapshot()` respectively; this
    /// returns just the AOI-local membership.
    pub fn members_of(&self, id: AoiId) -> &[EntityId] {
        self.aois.get(&id).map(|a| a.members.as_slice()).unwrap_or(&[])
    }

    /// Drains the enter/leave events queued for AOI `id` since the last time
    /// its snapshot went out. Called once per due AOI by the broadcast step.
    pub fn take_pending_events(&mut self, id: AoiId) -> Vec<(EntityId, AoiEvent)> {
        self.pending_events.remove(&id).unwrap_or_default()
    }

    pub fn unassigned_count(&self, store: &EntityStore) -> usize {
        store.unassigned_entities().count()
    }

    pub fn snapshot(&self, current_aoi_id: Option<AoiId>) -> (Vec<AoiSummary>, Option<AoiId>) {
        let mut summaries: Vec<AoiSummary> = self
            .aois
            .values()
            .map(|a| AoiSummary {
                id: a.id,
                name: a.name.clone(),
                center: a.center.into(),
                radius: a.radius as f32,
                capacity: a.capacity,
                player_count: a.player_count,
                npc_count: a.npc_count,
                load: a.load,
                update_hz: a.update_hz,
            })
            .collect();
        summaries.sort_by_key(|s| s.id.0);
        (summaries, current_aoi_id)
    }
}

/// §4.6 step 3: `update_hz = clamp(base_hz * (1 - load*k_load), min_hz,
/// base_hz)`.
fn clamp_update_hz(base_hz: f64, min_hz: f64, k_load: f64, load: f32) -> f64 {
    let raw = base_hz * (1.0 - load as f64 * k_load);
    raw.clamp(min_hz, base_hz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use math::Quat;

    fn settings() -> Settings {
        Settings::default()
    }

    fn addr() -> std::net::SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    #[test]
    fn entity_within_radius_joins_nearest_aoi() {
        let mut partitioner = AoiPartitioner::new();
        let near = partitioner.add_aoi(AoiSpec {
            name: "near".into(),
            center: Vec3::ZERO,
            radius: 100.0,
            capacity: 10,
            follows: None,
        });
        let far = partitioner.add_aoi(AoiSpec {
            name: "far".into(),
            center: Vec3::new(1_000.0, 0.0, 0.0),
            radius: 100.0,
            capacity: 10,
            follows: None,
        });

        let mut store = EntityStore::new();
        let settings = settings();
        let peer = protocol::PeerId(7);
        let entity_id = store
            .spawn_player(peer, addr(), 0, Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();

        let celestial = CelestialSimulator::new();
        partitioner.reassign(&mut store, &celestial, &settings);

        assert_eq!(store.get(entity_id).unwrap().aoi_id, Some(near));
        assert!(partitioner.members_of(far).is_empty());
        assert_eq!(partitioner.members_of(near), &[entity_id]);
    }

    #[test]
    fn entity_beyond_two_radii_is_unassigned() {
        let mut partitioner = AoiPartitioner::new();
        partitioner.add_aoi(AoiSpec {
            name: "only".into(),
            center: Vec3::ZERO,
            radius: 10.0,
            capacity: 10,
            follows: None,
        });

        let mut store = EntityStore::new();
        let settings = settings();
        let peer = protocol::PeerId(7);
        let entity_id = store
            .spawn_player(peer, addr(), 0, Vec3::new(1_000.0, 0.0, 0.0), Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();

        let celestial = CelestialSimulator::new();
        partitioner.reassign(&mut store, &celestial, &settings);

        assert_eq!(store.get(entity_id).unwrap().aoi_id, None);
    }

    #[test]
    fn full_capacity_aoi_overflows_to_fallback() {
        let mut partitioner = AoiPartitioner::new();
        let primary = partitioner.add_aoi(AoiSpec {
            name: "primary".into(),
            center: Vec3::ZERO,
            radius: 50.0,
            capacity: 1,
            follows: None,
        });
        let overflow = partitioner.add_aoi(AoiSpec {
            name: "overflow".into(),
            center: Vec3::new(60.0, 0.0, 0.0),
            radius: 50.0,
            capacity: 10,
            follows: None,
        });

        let mut store = EntityStore::new();
        let settings = settings();
        let first = store
            .spawn_player(
                protocol::PeerId(1),
                addr(),
                0,
                Vec3::new(5.0, 0.0, 0.0),
                Vec3::ZERO,
                Quat::IDENTITY,
                0.0,
                &settings,
            )
            .unwrap();
        let second = store
            .spawn_player(
                protocol::PeerId(2),
                addr(),
                0,
                Vec3::new(6.0, 0.0, 0.0),
                Vec3::ZERO,
                Quat::IDENTITY,
                0.0,
                &settings,
            )
            .unwrap();

        let celestial = CelestialSimulator::new();
        partitioner.reassign(&mut store, &celestial, &settings);

        let first_aoi = store.get(first).unwrap().aoi_id;
        let second_aoi = store.get(second).unwrap().aoi_id;
        assert_eq!([first_aoi, second_aoi].iter().filter(|a| **a == Some(primary)).count(), 1);
        assert!([first_aoi, second_aoi].contains(&Some(overflow)));
    }

    #[test]
    fn update_hz_drops_as_load_increases() {
        let low = clamp_update_hz(20.0, 4.0, 0.75, 0.0);
        let high = clamp_update_hz(20.0, 4.0, 0.75, 1.0);
        assert!(high < low);
        assert!(high >= 4.0);
    }
}
