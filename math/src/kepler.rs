use crate::quat::Quat;
use crate::vec3::Vec3;
use std::f64::consts::TAU;
use thiserror::Error;

/// Gravitational constant, m^3 kg^-1 s^-2.
pub const G: f64 = 6.674_30e-11;

const NEWTON_TOLERANCE: f64 = 1e-10;
const NEWTON_MAX_ITERATIONS: u32 = 16;

#[derive(Debug, Error, PartialEq)]
pub enum KeplerError {
    /// `e >= 1`: the Kepler solver in this form only handles closed
    /// (elliptical) orbits. Parabolic/hyperbolic trajectories are rejected
    /// at admission rather than numerically approximated (§4.1).
    #[error("orbit is not elliptical: eccentricity {0} is not in [0, 1)")]
    NotElliptical(f64),
    #[error("semi-major axis must be positive, got {0}")]
    NonPositiveSemiMajorAxis(f64),
    #[error("central mass must be positive, got {0}")]
    NonPositiveCentralMass(f64),
}

/// The six classical (osculating) Kepler elements of an elliptical orbit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitalElements {
    /// Semi-major axis, meters.
    pub semi_major_axis: f64,
    /// Eccentricity, `[0, 1)`.
    pub eccentricity: f64,
    /// Inclination, radians.
    pub inclination: f64,
    /// Longitude of ascending node (`Ω`), radians.
    pub raan: f64,
    /// Argument of periapsis (`ω`), radians.
    pub arg_periapsis: f64,
    /// Mean anomaly at epoch (`M₀`), radians.
    pub mean_anomaly_epoch: f64,
}

impl OrbitalElements {
    pub fn validate(&self) -> Result<(), KeplerError> {
        if self.eccentricity < 0.0 || self.eccentricity >= 1.0 {
            return Err(KeplerError::NotElliptical(self.eccentricity));
        }
        if self.semi_major_axis <= 0.0 {
            return Err(KeplerError::NonPositiveSemiMajorAxis(self.semi_major_axis));
        }
        Ok(())
    }

    /// Mean motion `n = sqrt(mu / a^3)`, radians/second.
    pub fn mean_motion(&self, mu: f64) -> f64 {
        (mu / self.semi_major_axis.powi(3)).sqrt()
    }

    /// Orbital period, seconds.
    pub fn period(&self, mu: f64) -> f64 {
        TAU / self.mean_motion(mu)
    }
}

/// The propagated state of a body at a single instant: world-frame position
/// and velocity, plus the fraction of the current orbit completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagatedState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// `(M mod 2*pi) / (2*pi)`, reported to clients for interpolation.
    pub orbit_progress: f64,
}

/// Solve Kepler's equation `M = E - e*sin(E)` for the eccentric anomaly `E`
/// by Newton-Raphson, starting from `E0 = M` and stopping when `|delta_E| <
/// 1e-10` or after 16 iterations (§4.1).
///
/// Converges in a single iteration for circular orbits (`e = 0`), since the
/// residual `M - (E - e*sin(E))` is then identically zero at `E0 = M`.
pub fn solve_eccentric_anomaly(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let m = mean_anomaly.rem_euclid(TAU);
    let mut e = m;
    for _ in 0..NEWTON_MAX_ITERATIONS {
        let f = e - eccentricity * e.sin() - m;
        let f_prime = 1.0 - eccentricity * e.cos();
        let delta = f / f_prime;
        e -= delta;
        if delta.abs() < NEWTON_TOLERANCE {
            break;
        }
    }
    e
}

/// Propagate `elements` orbiting a body of mass `parent_mass` (kg) to
/// elapsed time `t` (seconds since epoch) in the parent's local frame.
///
/// Position in the orbital plane is `(a(cos E - e), a*sqrt(1-e^2)*sin E, 0)`,
/// rotated into the parent frame by the 3-1-3 composition of `(Ω, i, ω)`.
/// Velocity is the closed-form derivative with respect to `E`.
pub fn propagate(
    elements: &OrbitalElements,
    parent_mass: f64,
    t: f64,
) -> Result<PropagatedState, KeplerError> {
    elements.validate()?;
    if parent_mass <= 0.0 {
        return Err(KeplerError::NonPositiveCentralMass(parent_mass));
    }

    let mu = G * parent_mass;
    let a = elements.semi_major_axis;
    let e = elements.eccentricity;
    let n = elements.mean_motion(mu);

    let mean_anomaly = elements.mean_anomaly_epoch + n * t;
    let eccentric_anomaly = solve_eccentric_anomaly(mean_anomaly, e);
    let (sin_ea, cos_ea) = eccentric_anomaly.sin_cos();
    let b = a * (1.0 - e * e).sqrt();

    let plane_position = Vec3::new(a * (cos_ea - e), b * sin_ea, 0.0);

    // d(E)/dt = n / (1 - e*cos E); velocity follows by the chain rule.
    let e_dot = n / (1.0 - e * cos_ea);
    let plane_velocity = Vec3::new(-a * sin_ea * e_dot, b * cos_ea * e_dot, 0.0);

    let rotation = Quat::from_orbital_313(elements.raan, elements.inclination, elements.arg_periapsis);

    let orbit_progress = mean_anomaly.rem_euclid(TAU) / TAU;

    Ok(PropagatedState {
        position: rotation.rotate_vec3(plane_position),
        velocity: rotation.rotate_vec3(plane_velocity),
        orbit_progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_orbit_converges_in_one_iteration() {
        let m = 1.2345;
        let e = solve_eccentric_anomaly(m, 0.0);
        assert!((e - m).abs() < 1e-12);
    }

    #[test]
    fn newton_raphson_residual_within_tolerance() {
        let m = 2.7;
        let ecc = 0.6;
        let e = solve_eccentric_anomaly(m, ecc);
        let residual = (m - (e - ecc * e.sin())).abs();
        assert!(residual < 1e-9, "residual = {residual}");
    }

    #[test]
    fn quarter_period_earth_like_orbit_matches_closed_form() {
        // Earth-like orbit around a solar mass, elements from scenario 2 of
        // the testable properties: a = 1.5e11, e = 0.0167, all angles zero.
        let elements = OrbitalElements {
            semi_major_axis: 1.5e11,
            eccentricity: 0.0167,
            inclination: 0.0,
            raan: 0.0,
            arg_periapsis: 0.0,
            mean_anomaly_epoch: 0.0,
        };
        let parent_mass = 1.989e30;
        let period = elements.period(G * parent_mass);
        let t_quarter = period / 4.0;

        let state = propagate(&elements, parent_mass, t_quarter).unwrap();
        let b = elements.semi_major_axis * (1.0 - elements.eccentricity * elements.eccentricity).sqrt();

        assert!(state.position.x.abs() / elements.semi_major_axis < 1e-3);
        assert!((state.position.y - b).abs() / b < 1e-3);
    }

    #[test]
    fn radius_stays_within_apsides() {
        let elements = OrbitalElements {
            semi_major_axis: 2.0e10,
            eccentricity: 0.3,
            inclination: 0.4,
            raan: 0.2,
            arg_periapsis: 1.1,
            mean_anomaly_epoch: 0.0,
        };
        let parent_mass = 5.0e29;
        let period = elements.period(G * parent_mass);
        let periapsis = elements.semi_major_axis * (1.0 - elements.eccentricity);
        let apoapsis = elements.semi_major_axis * (1.0 + elements.eccentricity);

        let mut t = 0.0;
        while t < period {
            let state = propagate(&elements, parent_mass, t).unwrap();
            let r = state.position.length();
            assert!(r >= periapsis * (1.0 - 1e-6) && r <= apoapsis * (1.0 + 1e-6));
            t += period / 200.0;
        }
    }

    #[test]
    fn hyperbolic_eccentricity_is_rejected() {
        let elements = OrbitalElements {
            semi_major_axis: 1.0,
            eccentricity: 1.2,
            inclination: 0.0,
            raan: 0.0,
            arg_periapsis: 0.0,
            mean_anomaly_epoch: 0.0,
        };
        let err = propagate(&elements, 1.0, 0.0).unwrap_err();
        assert_eq!(err, KeplerError::NotElliptical(1.2));
    }
}
