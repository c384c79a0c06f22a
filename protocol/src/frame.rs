use bytes::{Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::codec::{finish_encode, Decode, Encode};
use crate::error::CodecError;
use crate::header::FrameHeader;
use crate::message::Payload;

/// A complete wire frame: header plus payload (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Payload,
}

/// Encode `frame` to bytes, optionally composing zlib compression after the
/// header+payload encoding (§9's "compose-after-encode hooks"; the
/// compression algorithm itself is this crate's choice, left unspecified by
/// the source). Fails with `Oversize` if the result — after compression, if
/// enabled — still exceeds [`crate::error::MAX_FRAME_BYTES`].
pub fn encode_frame(frame: &Frame, compress: bool) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    frame.header.encode(&mut buf)?;
    frame.payload.encode(&mut buf)?;

    if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(&buf)
            .map_err(|_| CodecError::Oversize(buf.len()))?;
        let compressed = encoder
            .finish()
            .map_err(|_| CodecError::Oversize(buf.len()))?;
        if compressed.len() > crate::error::MAX_FRAME_BYTES {
            Err(CodecError::Oversize(compressed.len()))
        } else {
            Ok(Bytes::from(compressed))
        }
    } else {
        finish_encode(buf)
    }
}

/// Decode a frame from `bytes`, undoing compression first if `decompressed`
/// is requested. `MalformedFrame` (as `CodecError`) on short input, unknown
/// type, or length overrun; no partial decode is ever observable (§4.2).
pub fn decode_frame(bytes: &[u8], compressed: bool) -> Result<Frame, CodecError> {
    let owned;
    let raw: &[u8] = if compressed {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|_| CodecError::ShortInput)?;
        owned = out;
        &owned
    } else {
        bytes
    };

    let mut cursor = Bytes::copy_from_slice(raw);
    let header = FrameHeader::decode(&mut cursor)?;
    let payload = Payload::decode(header.message_type, &mut cursor)?;
    Ok(Frame { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PeerId;

    fn sample_frame() -> Frame {
        Frame {
            header: FrameHeader {
                message_type: 2,
                sequence: 7,
                timestamp_ms: 12345,
                peer_id: PeerId(42),
            },
            payload: Payload::Ping { ping_id: 99 },
        }
    }

    #[test]
    fn roundtrip_uncompressed() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame, false).unwrap();
        let decoded = decode_frame(&bytes, false).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn roundtrip_compressed() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame, true).unwrap();
        let decoded = decode_frame(&bytes, true).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn unknown_type_is_malformed() {
        let mut buf = BytesMut::new();
        FrameHeader {
            message_type: 9999,
            sequence: 0,
            timestamp_ms: 0,
            peer_id: PeerId(0),
        }
        .encode(&mut buf)
        .unwrap();
        let bytes = buf.freeze();
        assert!(matches!(
            decode_frame(&bytes, false),
            Err(CodecError::UnknownMessageType(9999))
        ));
    }

    #[test]
    fn short_input_is_malformed() {
        let bytes = [0u8; 3];
        assert!(matches!(
            decode_frame(&bytes, false),
            Err(CodecError::ShortInput)
        ));
    }
}
