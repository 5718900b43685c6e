// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

/// Error for any failed decoding operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer did not contain enough bytes for the requested read
    UnexpectedEof(usize),
    /// More bytes were present than the decoded value allows
    UnexpectedBytes(usize),
    /// The encoding was well-formed but violated an invariant of the value
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecoderError::UnexpectedEof(len) => write!(f, "unexpected eof: {len}"),
            DecoderError::UnexpectedBytes(len) => write!(f, "unexpected bytes: {len}"),
            DecoderError::InvariantViolation(msg) => write!(f, "{msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}

pub type DecoderBufferResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;

/// A value which can be decoded from a [`DecoderBuffer`]
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// A value whose decoding is parameterized on an externally-decoded value,
/// e.g. a frame body parameterized on its tag
pub trait DecoderParameterizedValue<'a>: Sized {
    type Parameter;

    fn decode_parameterized(
        parameter: Self::Parameter,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self>;
}

/// DecoderBuffer is a panic-free byte cursor for decoding untrusted input.
///
/// Every read consumes from the front and returns the remaining buffer;
/// failed reads return an error and consume nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Move out the buffer's slice. This should be used with caution, as it
    /// removes any panic protection this struct provides.
    #[inline]
    pub fn into_less_safe_slice(self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn ensure_len(&self, len: usize) -> Result<(), DecoderError> {
        if self.bytes.len() < len {
            Err(DecoderError::UnexpectedEof(len))
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn ensure_empty(self) -> Result<(), DecoderError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(DecoderError::UnexpectedBytes(self.bytes.len()))
        }
    }

    /// Read the byte at `index` without consuming anything
    #[inline]
    pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(DecoderError::UnexpectedEof(index + 1))
    }

    #[inline]
    pub fn skip(self, len: usize) -> Result<DecoderBuffer<'a>, DecoderError> {
        self.ensure_len(len)?;
        Ok(Self::new(&self.bytes[len..]))
    }

    /// Split off a slice of `count` bytes from the front of the buffer
    #[inline]
    pub fn decode_slice(self, count: usize) -> DecoderBufferResult<'a, DecoderBuffer<'a>> {
        self.ensure_len(count)?;
        let (slice, remaining) = self.bytes.split_at(count);
        Ok((Self::new(slice), Self::new(remaining)))
    }

    #[inline]
    pub fn decode<T: DecoderValue<'a>>(self) -> DecoderBufferResult<'a, T> {
        T::decode(self)
    }

    #[inline]
    pub fn decode_parameterized<T: DecoderParameterizedValue<'a>>(
        self,
        parameter: T::Parameter,
    ) -> DecoderBufferResult<'a, T> {
        T::decode_parameterized(parameter, self)
    }

    /// Decode a slice prefixed by a length of type `Len`
    #[inline]
    pub fn decode_slice_with_len_prefix<Len>(self) -> DecoderBufferResult<'a, DecoderBuffer<'a>>
    where
        Len: DecoderValue<'a> + TryInto<usize>,
    {
        let (len, buffer) = self.decode::<Len>()?;
        let len = len
            .try_into()
            .map_err(|_| DecoderError::InvariantViolation("length prefix too large"))?;
        buffer.decode_slice(len)
    }

    /// Decode a value of type `T` prefixed by a length of type `Len`
    #[inline]
    pub fn decode_with_len_prefix<Len, T>(self) -> DecoderBufferResult<'a, T>
    where
        Len: DecoderValue<'a> + TryInto<usize>,
        T: DecoderValue<'a>,
    {
        let (slice, buffer) = self.decode_slice_with_len_prefix::<Len>()?;
        let (value, remaining) = slice.decode::<T>()?;
        remaining.ensure_empty()?;
        Ok((value, buffer))
    }
}

impl<'a> From<&'a [u8]> for DecoderBuffer<'a> {
    #[inline]
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a> DecoderValue<'a> for DecoderBuffer<'a> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let len = buffer.len();
        buffer.decode_slice(len)
    }
}

impl<'a> DecoderValue<'a> for &'a [u8] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let len = buffer.len();
        let (slice, buffer) = buffer.decode_slice(len)?;
        Ok((slice.into_less_safe_slice(), buffer))
    }
}

impl<'a> DecoderValue<'a> for u8 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let value = buffer.peek_byte(0)?;
        let buffer = buffer.skip(1)?;
        Ok((value, buffer))
    }
}

macro_rules! decoder_value_network_endian {
    ($ty:ty, $read:ident, $size:expr) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice($size)?;
                let value = NetworkEndian::$read(slice.into_less_safe_slice());
                Ok((value, buffer))
            }
        }
    };
}

decoder_value_network_endian!(u16, read_u16, 2);
decoder_value_network_endian!(u32, read_u32, 4);
decoder_value_network_endian!(u64, read_u64, 8);

/// An unsigned 24-bit big-endian integer
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct U24(u32);

impl U24 {
    pub const MAX: Self = Self((1 << 24) - 1);

    #[inline]
    pub fn new(value: u32) -> Option<Self> {
        if value <= Self::MAX.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    #[inline]
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

impl<'a> DecoderValue<'a> for U24 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice(3)?;
        let value = NetworkEndian::read_u24(slice.into_less_safe_slice());
        Ok((U24(value), buffer))
    }
}

impl<const LEN: usize> DecoderValue<'_> for [u8; LEN] {
    #[inline]
    fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (slice, buffer) = buffer.decode_slice(LEN)?;
        let mut value = [0u8; LEN];
        value.copy_from_slice(slice.into_less_safe_slice());
        Ok((value, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_test() {
        let data = [0, 1, 2, 3, 4, 5, 6];
        let buffer = DecoderBuffer::new(&data);

        let (value, buffer) = buffer.decode::<u8>().unwrap();
        assert_eq!(value, 0);

        let (value, buffer) = buffer.decode::<u16>().unwrap();
        assert_eq!(value, 258);

        let (value, buffer) = buffer.decode::<u32>().unwrap();
        assert_eq!(value, 50_595_078);

        assert!(buffer.is_empty());
    }

    #[test]
    fn u24_test() {
        let data = [1, 2, 3];
        let buffer = DecoderBuffer::new(&data);
        let (value, buffer) = buffer.decode::<U24>().unwrap();
        assert_eq!(value.into_u32(), 0x010203);
        assert!(buffer.is_empty());
    }

    #[test]
    fn eof_consumes_nothing_test() {
        let data = [1u8];
        let buffer = DecoderBuffer::new(&data);
        assert_eq!(
            buffer.decode::<u16>().unwrap_err(),
            DecoderError::UnexpectedEof(2)
        );
        // the original buffer is still usable
        let (value, _) = buffer.decode::<u8>().unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn len_prefix_test() {
        let data = [5, 0, 1, 2, 3, 4];
        let buffer = DecoderBuffer::new(&data);
        let (slice, buffer) = buffer.decode_slice_with_len_prefix::<u8>().unwrap();
        assert_eq!(slice.into_less_safe_slice(), &[0u8, 1, 2, 3, 4][..]);
        assert!(buffer.is_empty());
    }
}
