use thiserror::Error;

/// Failures from the codec layer. The codec is total: every one of these is
/// a value, never a panic, and decoding never reads past the declared frame
/// boundary (§4.2).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame ended before the expected field could be read")]
    ShortInput,
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),
    #[error("declared length {declared} exceeds remaining buffer of {remaining} bytes")]
    LengthOverrun { declared: usize, remaining: usize },
    #[error("encoded frame of {0} bytes exceeds the maximum of 1400 bytes")]
    Oversize(usize),
    #[error("string payload was not valid utf-8")]
    InvalidUtf8,
}

/// Wire frames, after any compression, must fit in a single UDP datagram
/// with headroom for IP/UDP headers (§4.2).
pub const MAX_FRAME_BYTES: usize = 1400;
