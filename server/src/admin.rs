//! Admin surface (§6): pure function entry points consumed by an external
//! admin HTTP shim (not part of this core). Every mutating call stages a
//! change onto a mutation queue rather than touching runtime state
//! directly, so the tick scheduler remains the sole writer (§5, §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use protocol::{AoiId, BodyId, EntityId, EntityState};

use crate::aoi::{Aoi, AoiPartitioner, AoiSpec};
use crate::celestial::{BodySpec, CelestialBody, CelestialSimulator};
use crate::config::Settings;
use crate::entity::{Entity, EntityStore};
use crate::error::CoreError;

pub fn list_bodies(celestial: &CelestialSimulator) -> Vec<CelestialBody> {
    celestial.list_bodies().into_iter().cloned().collect()
}

pub fn add_body(celestial: &mut CelestialSimulator, spec: BodySpec) -> BodyId {
    celestial.queue_add(spec)
}

pub fn update_body(celestial: &mut CelestialSimulator, id: BodyId, spec: BodySpec) {
    celestial.queue_update(id, spec)
}

pub fn delete_body(celestial: &mut CelestialSimulator, id: BodyId) {
    celestial.queue_delete(id)
}

pub fn set_sim_speed(settings: &mut Settings, sim_speed: f64) -> Result<(), CoreError> {
    if sim_speed <= 0.0 {
        return Err(CoreError::ConfigError("sim_speed must be positive".into()));
    }
    settings.sim_speed = sim_speed;
    Ok(())
}

pub fn set_frozen(celestial: &mut CelestialSimulator, frozen: bool) {
    celestial.set_frozen(frozen);
}

pub fn list_entities(store: &EntityStore) -> Vec<Entity> {
    store.iter().cloned().collect()
}

pub fn list_aois(aois: &AoiPartitioner) -> Vec<Aoi> {
    aois.list().into_iter().cloned().collect()
}

pub fn get_settings(settings: &Settings) -> Settings {
    settings.clone()
}

pub fn set_settings(current: &mut Settings, next: Settings) -> Result<(), CoreError> {
    next.validate().map_err(CoreError::ConfigError)?;
    *current = next;
    Ok(())
}

pub fn add_aoi(aois: &mut AoiPartitioner, spec: AoiSpec) -> AoiId {
    aois.add_aoi(spec)
}

pub fn snapshot_entities(store: &EntityStore, ids: &[EntityId]) -> Vec<EntityState> {
    store.snapshot(ids)
}

/// A cooperative shutdown flag: set by `emergency_stop` or a signal handler,
/// checked by the tick loop at the top of every iteration (§5's "Top-level
/// shutdown drains the send queue... then closes"). Backed by an `Arc` so a
/// `signal_hook` registration can share the same bool the tick loop polls.
pub struct ShutdownFlag(Arc<AtomicBool>);

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// The shared handle a `signal_hook::flag::register` call needs.
    pub fn shared(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

pub fn emergency_stop(flag: &ShutdownFlag) {
    flag.set();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_settings_rejects_invalid_replacement() {
        let mut current = Settings::default();
        let mut next = Settings::default();
        next.tick_hz = 0.0;
        let err = set_settings(&mut current, next);
        assert!(err.is_err());
        assert_eq!(current, Settings::default());
    }

    #[test]
    fn emergency_stop_sets_the_flag() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        emergency_stop(&flag);
        assert!(flag.is_set());
    }
}
