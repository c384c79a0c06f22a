//! Celestial simulator (C5): owns the body forest and advances every
//! non-root body's orbital position each tick via the Kepler primitives in
//! `math`.

use std::collections::HashMap;

use math::{propagate, OrbitalElements, Vec3};
use protocol::{BodyId, CelestialBodyState};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyType {
    Star,
    Planet,
    Moon,
    Asteroid,
    Comet,
    Station,
}

impl BodyType {
    /// The per-type coefficient C4's nearest-body search weights raw
    /// distance by (§4.4): smaller values win ties against larger bodies,
    /// matching the "planets > moons > stations > asteroids" ranking.
    /// Star and comet are not ranked by name in §4.4; a star is placed
    /// ahead of a planet (it is the dominant gravity well of most systems)
    /// and a comet alongside an asteroid (both are minor bodies).
    pub fn nearest_weight(self) -> f64 {
        match self {
            BodyType::Star => 0.7,
            BodyType::Planet => 0.8,
            BodyType::Moon => 0.9,
            BodyType::Station => 1.0,
            BodyType::Asteroid | BodyType::Comet => 1.1,
        }
    }
}

/// Immutable orbital definition of a body (§3). `elements` is `None` only
/// for the root, which is pinned at the origin with zero velocity; every
/// other body's `elements` is `Some` — this is the "parent relation is a
/// forest with exactly one root... a body's `a,e` are 0 iff it is root"
/// invariant, expressed in the type rather than as a runtime check.
#[derive(Debug, Clone)]
pub struct CelestialBody {
    pub id: BodyId,
    pub name: String,
    pub body_type: BodyType,
    pub mass: f64,
    pub radius: f64,
    pub elements: Option<OrbitalElements>,
    pub parent_id: Option<BodyId>,
    pub color: [u8; 3],
    pub position: Vec3,
    pub velocity: Vec3,
    pub orbit_progress: f64,
}

/// A celestial body, as needed by the entity store's nearest-body search
/// (§4.4) — deliberately not the full `CelestialBody` so C4 cannot mutate
/// C5's table.
#[derive(Debug, Clone, Copy)]
pub struct BodyRef {
    pub id: BodyId,
    pub position: Vec3,
    pub body_type: BodyType,
}

/// A body definition as given to `add_body`/`update_body` (§6's admin
/// surface); `id` is assigned by the simulator on insert.
#[derive(Debug, Clone)]
pub struct BodySpec {
    pub name: String,
    pub body_type: BodyType,
    pub mass: f64,
    pub radius: f64,
    pub elements: Option<OrbitalElements>,
    pub parent_id: Option<BodyId>,
    pub color: [u8; 3],
}

enum PendingMutation {
    Add { id: BodyId, spec: BodySpec },
    Update { id: BodyId, spec: BodySpec },
    Delete { id: BodyId },
}

pub struct CelestialSimulator {
    bodies: HashMap<BodyId, CelestialBody>,
    /// Bodies ordered parent-before-child, recomputed whenever the tree
    /// shape changes, so `advance` can propagate children using their
    /// parent's already-updated position.
    topological_order: Vec<BodyId>,
    root_id: Option<BodyId>,
    next_id: u32,
    sim_time: f64,
    frozen: bool,
    pending: Vec<PendingMutation>,
}

impl Default for CelestialSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CelestialSimulator {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            topological_order: Vec::new(),
            root_id: None,
            next_id: 1,
            sim_time: 0.0,
            frozen: false,
            pending: Vec::new(),
        }
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    /// Toggled atomically at tick boundaries (§4.5): stops `sim_time` from
    /// advancing so positions hold at whatever they last were, used to give
    /// new players a stable world.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn set_sim_speed(&mut self, _sim_speed: f64) {
        // sim_speed itself lives in Settings and is passed into `advance`;
        // this hook exists so the admin surface has a single place to call
        // regardless of where the authoritative value is stored.
    }

    /// Inserts a body immediately, bypassing the admin mutation queue. Used
    /// only at boot, before the tick loop starts, to load seed data (§3:
    /// "created at boot from seed data").
    pub fn seed_body(&mut self, spec: BodySpec) -> Result<BodyId, CoreError> {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.insert_validated(id, spec)?;
        Ok(id)
    }

    /// Like `seed_body` but with an explicit id, used when restoring a
    /// persisted snapshot so body ids survive a save/load cycle (`parent_id`
    /// references in the snapshot point at these exact ids).
    pub fn seed_body_with_id(&mut self, id: BodyId, spec: BodySpec) -> Result<(), CoreError> {
        self.next_id = self.next_id.max(id.0 + 1);
        self.insert_validated(id, spec)
    }

    fn insert_validated(&mut self, id: BodyId, spec: BodySpec) -> Result<(), CoreError> {
        let is_root = spec.parent_id.is_none();
        if is_root {
            if self.root_id.is_some() {
                return Err(CoreError::ConfigError(
                    "a root body already exists; the forest may have exactly one root".into(),
                ));
            }
            if spec.elements.is_some() {
                return Err(CoreError::ConfigError(
                    "root body must have a=e=0 (elements=None)".into(),
                ));
            }
        } else {
            if spec.elements.is_none() {
                return Err(CoreError::ConfigError(
                    "non-root body must carry orbital elements".into(),
                ));
            }
            let parent_id = spec.parent_id.unwrap();
            if !self.bodies.contains_key(&parent_id) {
                return Err(CoreError::ConfigError(format!(
                    "parent body {parent_id:?} does not exist"
                )));
            }
            if let Some(elements) = &spec.elements {
                elements
                    .validate()
                    .map_err(|e| CoreError::ConfigError(e.to_string()))?;
            }
        }

        let body = CelestialBody {
            id,
            name: spec.name,
            body_type: spec.body_type,
            mass: spec.mass,
            radius: spec.radius,
            elements: spec.elements,
            parent_id: spec.parent_id,
            color: spec.color,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orbit_progress: 0.0,
        };
        if is_root {
            self.root_id = Some(id);
        }
        self.bodies.insert(id, body);
        self.rebuild_topological_order();
        Ok(())
    }

    fn rebuild_topological_order(&mut self) {
        let mut order = Vec::with_capacity(self.bodies.len());
        if let Some(root) = self.root_id {
            let mut frontier = vec![root];
            while let Some(id) = frontier.pop() {
                order.push(id);
                for (candidate_id, body) in &self.bodies {
                    if body.parent_id == Some(id) {
                        frontier.push(*candidate_id);
                    }
                }
            }
        }
        self.topological_order = order;
    }

    pub fn queue_add(&mut self, spec: BodySpec) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.pending.push(PendingMutation::Add { id, spec });
        id
    }

    pub fn queue_update(&mut self, id: BodyId, spec: BodySpec) {
        self.pending.push(PendingMutation::Update { id, spec });
    }

    /// Rejected at apply time if `id` has any children, preserving the
    /// "delete that would orphan children is rejected" invariant (§3).
    pub fn queue_delete(&mut self, id: BodyId) {
        self.pending.push(PendingMutation::Delete { id });
    }

    /// Applies every queued admin mutation. Called at tick boundaries only
    /// (§4.5 step 2), never mid-propagation, so within a tick every body
    /// sees a consistent forest.
    pub fn apply_pending(&mut self) -> Vec<CoreError> {
        let mutations = std::mem::take(&mut self.pending);
        let mut errors = Vec::new();
        for mutation in mutations {
            let result = match mutation {
                PendingMutation::Add { id, spec } => self.insert_validated(id, spec),
                PendingMutation::Update { id, spec } => self.apply_update(id, spec),
                PendingMutation::Delete { id } => self.apply_delete(id),
            };
            if let Err(e) = result {
                errors.push(e);
            }
        }
        errors
    }

    fn apply_update(&mut self, id: BodyId, spec: BodySpec) -> Result<(), CoreError> {
        let existing = self
            .bodies
            .get(&id)
            .ok_or_else(|| CoreError::ConfigError(format!("body {id:?} does not exist")))?;
        let was_root = existing.parent_id.is_none();
        let becomes_root = spec.parent_id.is_none();
        if was_root != becomes_root {
            return Err(CoreError::ConfigError(
                "update_body cannot move a body into or out of the root position".into(),
            ));
        }
        if let Some(elements) = &spec.elements {
            elements
                .validate()
                .map_err(|e| CoreError::ConfigError(e.to_string()))?;
        }
        let body = self.bodies.get_mut(&id).expect("checked above");
        body.name = spec.name;
        body.body_type = spec.body_type;
        body.mass = spec.mass;
        body.radius = spec.radius;
        body.elements = spec.elements;
        body.color = spec.color;
        Ok(())
    }

    fn apply_delete(&mut self, id: BodyId) -> Result<(), CoreError> {
        let has_children = self.bodies.values().any(|b| b.parent_id == Some(id));
        if has_children {
            return Err(CoreError::ConfigError(format!(
                "cannot delete body {id:?}: it has children"
            )));
        }
        if self.root_id == Some(id) {
            return Err(CoreError::ConfigError(
                "cannot delete the root body".into(),
            ));
        }
        self.bodies.remove(&id);
        self.rebuild_topological_order();
        Ok(())
    }

    /// Advances `sim_time` and recomputes every body's position/velocity
    /// (§4.5). No-op on `sim_time` when frozen, but the method is still
    /// called every tick so callers don't need a frozen-check of their own.
    pub fn advance(&mut self, dt: f64, sim_speed: f64) {
        if !self.frozen {
            self.sim_time += dt * sim_speed;
        }

        for id in self.topological_order.clone() {
            let Some(body) = self.bodies.get(&id) else { continue };
            let Some(elements) = body.elements else {
                // Root: fixed at the origin with zero velocity (§4.5).
                if let Some(root) = self.bodies.get_mut(&id) {
                    root.position = Vec3::ZERO;
                    root.velocity = Vec3::ZERO;
                    root.orbit_progress = 0.0;
                }
                continue;
            };
            let Some(parent_id) = body.parent_id else { continue };
            let parent_mass = self.bodies.get(&parent_id).map(|p| p.mass).unwrap_or(1.0);
            let parent_position = self
                .bodies
                .get(&parent_id)
                .map(|p| p.position)
                .unwrap_or(Vec3::ZERO);

            match propagate(&elements, parent_mass, self.sim_time) {
                Ok(state) => {
                    if let Some(body) = self.bodies.get_mut(&id) {
                        body.position = parent_position + state.position;
                        body.velocity = state.velocity;
                        body.orbit_progress = state.orbit_progress;
                    }
                }
                Err(_) => {
                    // Admission validates elements; this only happens if a
                    // mutation slipped past `insert_validated`/`apply_update`.
                    tracing::error!(body_id = ?id, "body has unpropagatable orbital elements");
                }
            }
        }
    }

    pub fn get(&self, id: BodyId) -> Option<&CelestialBody> {
        self.bodies.get(&id)
    }

    pub fn list_bodies(&self) -> Vec<&CelestialBody> {
        self.bodies.values().collect()
    }

    /// Parent-before-child order, suitable for persistence: replaying these
    /// bodies through `seed_body` in this order never hits a missing-parent
    /// rejection.
    pub fn bodies_in_topological_order(&self) -> Vec<&CelestialBody> {
        self.topological_order
            .iter()
            .filter_map(|id| self.bodies.get(id))
            .collect()
    }

    pub fn body_refs(&self) -> Vec<BodyRef> {
        self.bodies
            .values()
            .map(|b| BodyRef {
                id: b.id,
                position: b.position,
                body_type: b.body_type,
            })
            .collect()
    }

    /// A read-only snapshot for replication (§4.8 step 5), consistent
    /// because the body table is frozen between tick steps 2 and 6 (§5).
    pub fn snapshot(&self) -> Vec<CelestialBodyState> {
        self.bodies
            .values()
            .map(|b| CelestialBodyState {
                id: b.id,
                position: b.position.into(),
                velocity: b.velocity.into(),
                orbit_progress: b.orbit_progress as f32,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use math::OrbitalElements;

    fn sun_and_earth() -> CelestialSimulator {
        let mut sim = CelestialSimulator::new();
        let sun = sim
            .seed_body(BodySpec {
                name: "Sol".into(),
                body_type: BodyType::Star,
                mass: 1.989e30,
                radius: 6.96e8,
                elements: None,
                parent_id: None,
                color: [255, 220, 120],
            })
            .unwrap();
        sim.seed_body(BodySpec {
            name: "Earth".into(),
            body_type: BodyType::Planet,
            mass: 5.972e24,
            radius: 6.371e6,
            elements: Some(OrbitalElements {
                semi_major_axis: 1.5e11,
                eccentricity: 0.0167,
                inclination: 0.0,
                raan: 0.0,
                arg_periapsis: 0.0,
                mean_anomaly_epoch: 0.0,
            }),
            parent_id: Some(sun),
            color: [100, 150, 255],
        })
        .unwrap();
        sim
    }

    #[test]
    fn root_never_moves() {
        let mut sim = sun_and_earth();
        for _ in 0..1000 {
            sim.advance(1.0, 1.0);
        }
        let root_id = sim.root_id.unwrap();
        let root = sim.get(root_id).unwrap();
        assert_eq!(root.position, Vec3::ZERO);
        assert_eq!(root.velocity, Vec3::ZERO);
    }

    #[test]
    fn frozen_mode_holds_position_exactly() {
        let mut sim = sun_and_earth();
        for _ in 0..100 {
            sim.advance(1.0, 1.0);
        }
        sim.set_frozen(true);
        let snapshot_before = sim.snapshot();
        for _ in 0..50 {
            sim.advance(1.0, 1.0);
        }
        let snapshot_after = sim.snapshot();
        assert_eq!(snapshot_before, snapshot_after);
    }

    #[test]
    fn delete_with_children_is_rejected() {
        let mut sim = sun_and_earth();
        let sun_id = sim.root_id.unwrap();
        sim.queue_delete(sun_id);
        let errors = sim.apply_pending();
        assert_eq!(errors.len(), 1);
        assert!(sim.get(sun_id).is_some());
    }

    #[test]
    fn second_root_is_rejected() {
        let mut sim = sun_and_earth();
        let err = sim.seed_body(BodySpec {
            name: "Rogue".into(),
            body_type: BodyType::Star,
            mass: 1.0,
            radius: 1.0,
            elements: None,
            parent_id: None,
            color: [0, 0, 0],
        });
        assert!(err.is_err());
    }
}
