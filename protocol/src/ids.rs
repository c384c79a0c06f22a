use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::codec::{Decode, Encode};
use crate::error::CodecError;

/// Opaque 128-bit entity identifier (§3). Backed by a UUID so the server can
/// mint fresh ids with `EntityId::new_random()` without a central counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u128);

impl EntityId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().as_u128())
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

impl Encode for EntityId {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u128_le(self.0);
        Ok(())
    }
}

impl Decode for EntityId {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        if buf.remaining() < 16 {
            return Err(CodecError::ShortInput);
        }
        Ok(Self(buf.get_u128_le()))
    }
}

/// Per-connected-peer identifier, also a 128-bit token (§3, §6 header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u128);

impl PeerId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().as_u128())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

impl Encode for PeerId {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u128_le(self.0);
        Ok(())
    }
}

impl Decode for PeerId {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        if buf.remaining() < 16 {
            return Err(CodecError::ShortInput);
        }
        Ok(Self(buf.get_u128_le()))
    }
}

/// Stable integer id for a celestial body (§3). Small and dense enough to
/// index directly into the body table's backing `Vec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

impl Encode for BodyId {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.0.encode(buf)
    }
}

impl Decode for BodyId {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self(u32::decode(buf)?))
    }
}

/// Stable integer id for an AOI (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AoiId(pub u32);

impl Encode for AoiId {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.0.encode(buf)
    }
}

impl Decode for AoiId {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self(u32::decode(buf)?))
    }
}
