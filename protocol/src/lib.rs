//! Wire codec (C2): a framed, allocation-bounded binary protocol shared by
//! every message in §6.
//!
//! The codec is total: decoding never panics, and every failure mode is a
//! `CodecError` value. Encoding fails only on oversize frames. No partial
//! decode is ever observable to a caller.

pub const PROTOCOL_VERSION: u16 = 1;

mod codec;
mod error;
mod frame;
mod header;
mod ids;
mod message;
mod wire;

pub use codec::{Decode, Encode};
pub use error::{CodecError, MAX_FRAME_BYTES};
pub use frame::{decode_frame, encode_frame, Frame};
pub use header::FrameHeader;
pub use ids::{AoiId, BodyId, EntityId, PeerId};
pub use message::{
    AoiEvent, AoiSummary, CelestialBodyState, CheckKind, EntityKind, EntityState, Payload,
};
pub use wire::{Quatf, Vec3f};
