use bytes::{Bytes, BytesMut};
use math::{Quat, Vec3};

use crate::codec::{Decode, Encode};
use crate::error::CodecError;

/// Wire representation of a 3D vector: 3x `f32`, little-endian (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3f(pub [f32; 3]);

impl From<Vec3> for Vec3f {
    fn from(v: Vec3) -> Self {
        Self(v.as_f32_array())
    }
}

impl From<Vec3f> for Vec3 {
    fn from(v: Vec3f) -> Self {
        Vec3::from_f32_array(v.0)
    }
}

impl Encode for Vec3f {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        for c in self.0 {
            c.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for Vec3f {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self([f32::decode(buf)?, f32::decode(buf)?, f32::decode(buf)?]))
    }
}

/// Wire representation of a quaternion: 4x `f32`, little-endian (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quatf(pub [f32; 4]);

impl Default for Quatf {
    fn default() -> Self {
        Self([1.0, 0.0, 0.0, 0.0])
    }
}

impl From<Quat> for Quatf {
    fn from(q: Quat) -> Self {
        Self(q.as_f32_array())
    }
}

impl From<Quatf> for Quat {
    fn from(q: Quatf) -> Self {
        Quat::from_f32_array(q.0)
    }
}

impl Encode for Quatf {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        for c in self.0 {
            c.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for Quatf {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self([
            f32::decode(buf)?,
            f32::decode(buf)?,
            f32::decode(buf)?,
            f32::decode(buf)?,
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn vec3f_roundtrip() {
        let v = Vec3f([1.0, -2.5, 3.25]);
        let mut buf = BytesMut::new();
        v.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(Vec3f::decode(&mut bytes).unwrap(), v);
    }
}
