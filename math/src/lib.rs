//! Math kernel (C1): vectors, quaternions, and the Kepler propagation
//! primitives shared by the celestial simulator and the entity store.
//!
//! This crate intentionally has no dependency on the wire format or any
//! other component: it is pure numeric code, kept separate so it can be
//! exercised and benchmarked in isolation.

mod kepler;
mod quat;
mod vec3;

pub use kepler::{
    propagate, solve_eccentric_anomaly, KeplerError, OrbitalElements, PropagatedState, G,
};
pub use quat::Quat;
pub use vec3::Vec3;
