use bytes::{Bytes, BytesMut};

use crate::codec::{Decode, Encode};
use crate::error::CodecError;
use crate::ids::PeerId;

/// The header every frame carries, regardless of message type (§6):
/// `type(u16) | sequence(u32) | timestamp_ms(u64) | peer_id(u128)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u16,
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub peer_id: PeerId,
}

impl Encode for FrameHeader {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.message_type.encode(buf)?;
        self.sequence.encode(buf)?;
        self.timestamp_ms.encode(buf)?;
        self.peer_id.encode(buf)
    }
}

impl Decode for FrameHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            message_type: u16::decode(buf)?,
            sequence: u32::decode(buf)?,
            timestamp_ms: u64::decode(buf)?,
            peer_id: PeerId::decode(buf)?,
        })
    }
}
