use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Anything that can be written into a frame buffer in the wire format's
/// little-endian, fixed-width encoding (§4.2).
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError>;
}

/// Anything that can be read back out of a frame buffer. Decoding never
/// panics and never reads past `buf`'s declared length; a truncated buffer
/// yields `CodecError::ShortInput` rather than undefined behavior.
pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError>;
}

fn require(buf: &Bytes, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::ShortInput)
    } else {
        Ok(())
    }
}

macro_rules! impl_primitive {
    ($ty:ty, $put:ident, $get:ident, $size:expr) => {
        impl Encode for $ty {
            fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
                buf.$put(*self);
                Ok(())
            }
        }

        impl Decode for $ty {
            fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
                require(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

impl_primitive!(u8, put_u8, get_u8, 1);
impl_primitive!(u16, put_u16_le, get_u16_le, 2);
impl_primitive!(u32, put_u32_le, get_u32_le, 4);
impl_primitive!(u64, put_u64_le, get_u64_le, 8);
impl_primitive!(u128, put_u128_le, get_u128_le, 16);
impl_primitive!(f32, put_f32_le, get_f32_le, 4);
impl_primitive!(f64, put_f64_le, get_f64_le, 8);

impl Encode for bool {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        require(buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

/// Strings are a `u16` byte length followed by UTF-8 bytes (§4.2).
impl Encode for str {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = self.as_bytes();
        (bytes.len() as u16).encode(buf)?;
        buf.extend_from_slice(bytes);
        Ok(())
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.as_str().encode(buf)
    }
}

impl Decode for String {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let len = u16::decode(buf)? as usize;
        require(buf, len)?;
        let raw = buf.copy_to_bytes(len);
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

/// `Option<T>` is a `u8` presence tag (`0` or `1`) followed by `T` if present.
impl<T: Encode> Encode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            Some(v) => {
                1u8.encode(buf)?;
                v.encode(buf)
            }
            None => 0u8.encode(buf),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        match u8::decode(buf)? {
            0 => Ok(None),
            _ => Ok(Some(T::decode(buf)?)),
        }
    }
}

/// `Vec<T>` is a `u16` element count followed by each element in order. The
/// count bounds allocation: a declared count whose minimum encoding
/// (`count * 1` byte) would overrun the remaining buffer is rejected before
/// any allocation happens.
impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        (self.len() as u16).encode(buf)?;
        for item in self {
            item.encode(buf)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let count = u16::decode(buf)? as usize;
        if buf.remaining() < count {
            return Err(CodecError::LengthOverrun {
                declared: count,
                remaining: buf.remaining(),
            });
        }
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(T::decode(buf)?);
        }
        Ok(out)
    }
}

pub(crate) fn finish_encode(buf: BytesMut) -> Result<Bytes, CodecError> {
    if buf.len() > crate::error::MAX_FRAME_BYTES {
        return Err(CodecError::Oversize(buf.len()));
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip() {
        let mut buf = BytesMut::new();
        42u32.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(u32::decode(&mut bytes).unwrap(), 42);
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        "hello".to_string().encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(String::decode(&mut bytes).unwrap(), "hello");
    }

    #[test]
    fn short_input_is_malformed_not_panic() {
        let mut bytes = Bytes::from_static(&[1, 2]);
        assert_eq!(u32::decode(&mut bytes), Err(CodecError::ShortInput));
    }

    #[test]
    fn vec_length_overrun_is_rejected_before_allocating() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(60000);
        let mut bytes = buf.freeze();
        let result = Vec::<u32>::decode(&mut bytes);
        assert!(matches!(result, Err(CodecError::LengthOverrun { .. })));
    }
}
