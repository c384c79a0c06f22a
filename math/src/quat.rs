use crate::vec3::Vec3;

/// Unit quaternion, `w + xi + yj + zk`, used for entity rotation and for the
/// 3-1-3 Euler composition that orients a Kepler orbit in space (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quat {
    pub const IDENTITY: Self = Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let len = axis.length();
        if len <= f64::EPSILON {
            return Self::IDENTITY;
        }
        let n = axis / len;
        let half = 0.5 * angle;
        let (s, c) = half.sin_cos();
        Self::new(c, n.x * s, n.y * s, n.z * s)
    }

    /// Rotation by `angle` about the world +Z axis, used for `Ω` and `ω`.
    pub fn from_rotation_z(angle: f64) -> Self {
        let half = 0.5 * angle;
        let (s, c) = half.sin_cos();
        Self::new(c, 0.0, 0.0, s)
    }

    /// Rotation by `angle` about the world +X axis, used for inclination `i`.
    pub fn from_rotation_x(angle: f64) -> Self {
        let half = 0.5 * angle;
        let (s, c) = half.sin_cos();
        Self::new(c, s, 0.0, 0.0)
    }

    /// The standard 3-1-3 Euler composition `Rz(Ω) * Rx(i) * Rz(ω)` that
    /// carries a position computed in the orbital plane into the parent's
    /// reference frame (§4.1).
    pub fn from_orbital_313(raan: f64, inclination: f64, arg_periapsis: f64) -> Self {
        Self::from_rotation_z(raan) * Self::from_rotation_x(inclination) * Self::from_rotation_z(arg_periapsis)
    }

    pub fn normalize(self) -> Self {
        let n2 = self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z;
        if n2 <= 0.0 {
            return Self::IDENTITY;
        }
        let inv = n2.sqrt().recip();
        Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv)
    }

    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn rotate_vec3(self, v: Vec3) -> Vec3 {
        let qv = Quat::new(0.0, v.x, v.y, v.z);
        let r = self * qv * self.conjugate();
        Vec3::new(r.x, r.y, r.z)
    }

    pub fn as_f32_array(self) -> [f32; 4] {
        [self.w as f32, self.x as f32, self.y as f32, self.z as f32]
    }

    pub fn from_f32_array(a: [f32; 4]) -> Self {
        Self::new(a[0] as f64, a[1] as f64, a[2] as f64, a[3] as f64)
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::ops::Mul for Quat {
    type Output = Self;

    fn mul(self, o: Self) -> Self {
        Self::new(
            self.w * o.w - self.x * o.x - self.y * o.y - self.z * o.z,
            self.w * o.x + self.x * o.w + self.y * o.z - self.z * o.y,
            self.w * o.y - self.x * o.z + self.y * o.w + self.z * o.x,
            self.w * o.z + self.x * o.y - self.y * o.x + self.z * o.w,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn quarter_turn_about_z_maps_x_to_y() {
        let q = Quat::from_rotation_z(FRAC_PI_2);
        let r = q.rotate_vec3(Vec3::new(1.0, 0.0, 0.0));
        assert!((r - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn identity_orbital_frame_is_noop() {
        let q = Quat::from_orbital_313(0.0, 0.0, 0.0).normalize();
        let r = q.rotate_vec3(Vec3::new(3.0, 4.0, 0.0));
        assert!((r - Vec3::new(3.0, 4.0, 0.0)).length() < 1e-9);
    }
}
