// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# QUIC packets and frames commonly use a variable-length encoding for
//# non-negative integer values.  This encoding ensures that smaller
//# integer values need fewer bytes to encode.

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# This means that integers are encoded on 1, 2, 4, or 8 bytes and can
//# encode 6-, 14-, 30-, or 62-bit values, respectively.

pub const MAX_VARINT_VALUE: u64 = 4_611_686_018_427_387_903;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

impl std::error::Error for VarIntError {}

/// A QUIC variable-length integer in the range `0..=2^62 - 1`
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarInt(u64);

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(v: u64) -> Result<Self, VarIntError> {
        if v > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(v))
    }

    /// Returns a `VarInt` without validating the value is less than VarInt::MAX
    ///
    /// # Safety
    ///
    /// Callers need to ensure the value is less than or equal to VarInt::MAX
    #[inline]
    pub const unsafe fn new_unchecked(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        Self(v as u64)
    }

    #[inline]
    pub const fn from_u16(v: u16) -> Self {
        Self(v as u64)
    }

    #[inline]
    pub const fn from_u32(v: u32) -> Self {
        Self(v as u64)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The number of bytes the shortest wire encoding of this value uses
    //= https://www.rfc-editor.org/rfc/rfc9000#section-16
    //# The QUIC variable-length integer encoding reserves the two most
    //# significant bits of the first byte to encode the base 2 logarithm of
    //# the integer encoding length in bytes.
    #[inline]
    pub const fn encoding_len(self) -> usize {
        match self.0 {
            0..=63 => 1,
            64..=16_383 => 2,
            16_384..=1_073_741_823 => 4,
            _ => 8,
        }
    }

    #[inline]
    pub fn checked_add(self, value: Self) -> Option<Self> {
        Self::new(self.0.checked_add(value.0)?).ok()
    }

    #[inline]
    pub fn checked_add_usize(self, value: usize) -> Option<Self> {
        let value = Self::try_from(value).ok()?;
        self.checked_add(value)
    }

    #[inline]
    #[must_use]
    pub fn saturating_add(self, value: Self) -> Self {
        Self::new(self.0.saturating_add(value.0)).unwrap_or(Self::MAX)
    }

    #[inline]
    pub fn checked_sub(self, value: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(value.0)?))
    }

    #[inline]
    #[must_use]
    pub fn saturating_sub(self, value: Self) -> Self {
        Self(self.0.saturating_sub(value.0))
    }

    #[inline]
    pub fn checked_mul(self, value: Self) -> Option<Self> {
        Self::new(self.0.checked_mul(value.0)?).ok()
    }

    #[inline]
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    #[inline]
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }
}

impl EncoderValue for VarInt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let len = self.encoding_len();
        let two_bit = (len.trailing_zeros() as u64) << (len * 8 - 2);
        let value = (two_bit | self.0) << (64 - len * 8);
        encoder.write_sized(len, |buf| {
            buf.copy_from_slice(&value.to_be_bytes()[..len.min(buf.len())]);
        });
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.encoding_len()
    }

    #[inline]
    fn encoding_size_for_encoder<E: Encoder>(&self, _encoder: &E) -> usize {
        self.encoding_len()
    }
}

impl<'a> DecoderValue<'a> for VarInt {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let header = buffer.peek_byte(0)?;

        Ok(match (header >> 6) & 0b11 {
            0b00 => {
                let value = header & 0b0011_1111;
                let buffer = buffer.skip(1)?;
                (Self(value.into()), buffer)
            }
            0b01 => {
                let (value, buffer) = buffer.decode::<u16>()?;
                (Self((value & ((1 << 14) - 1)).into()), buffer)
            }
            0b10 => {
                let (value, buffer) = buffer.decode::<u32>()?;
                (Self((value & ((1 << 30) - 1)).into()), buffer)
            }
            _ => {
                let (value, buffer) = buffer.decode::<u64>()?;
                (Self(value & ((1 << 62) - 1)), buffer)
            }
        })
    }
}

impl AsRef<u64> for VarInt {
    #[inline]
    fn as_ref(&self) -> &u64 {
        &self.0
    }
}

impl core::ops::Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

macro_rules! impl_from_lesser {
    ($ty:ty) => {
        impl From<$ty> for VarInt {
            #[inline]
            fn from(value: $ty) -> Self {
                Self(value.into())
            }
        }
    };
}

impl_from_lesser!(u8);
impl_from_lesser!(u16);
impl_from_lesser!(u32);

impl From<VarInt> for u64 {
    #[inline]
    fn from(v: VarInt) -> u64 {
        v.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = <usize as TryFrom<u64>>::Error;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        value.0.try_into()
    }
}

impl core::ops::Add for VarInt {
    type Output = Self;

    #[inline]
    #[track_caller]
    fn add(self, rhs: Self) -> Self {
        if cfg!(debug_assertions) {
            self.checked_add(rhs).expect("VarInt overflow occurred")
        } else {
            Self(self.0 + rhs.0)
        }
    }
}

impl core::ops::AddAssign<Self> for VarInt {
    #[inline]
    #[track_caller]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl core::ops::Add<usize> for VarInt {
    type Output = Self;

    #[inline]
    #[track_caller]
    fn add(self, rhs: usize) -> Self {
        self + VarInt::try_from(rhs).expect("VarInt overflow occurred")
    }
}

impl core::ops::AddAssign<usize> for VarInt {
    #[inline]
    #[track_caller]
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl core::ops::Sub for VarInt {
    type Output = Self;

    #[inline]
    #[track_caller]
    fn sub(self, rhs: Self) -> Self {
        // Bounds check is inherited from u64
        Self(self.0 - rhs.0)
    }
}

impl core::ops::SubAssign<Self> for VarInt {
    #[inline]
    #[track_caller]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl PartialEq<u64> for VarInt {
    #[inline]
    fn eq(&self, other: &u64) -> bool {
        self.0.eq(other)
    }
}

impl PartialOrd<u64> for VarInt {
    #[inline]
    fn partial_cmp(&self, other: &u64) -> Option<core::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;
    use quiver_codec::EncoderBuffer;

    fn encode(value: VarInt) -> Vec<u8> {
        let mut storage = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&value);
        let len = encoder.len();
        storage[..len].to_vec()
    }

    fn decode(bytes: &[u8]) -> (VarInt, usize) {
        let buffer = DecoderBuffer::new(bytes);
        let (value, remaining) = buffer.decode::<VarInt>().unwrap();
        (value, bytes.len() - remaining.len())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
    //= type=test
    //# For example, the eight-byte sequence 0xc2197c5eff14e88c decodes to
    //# the decimal value 151,288,809,941,952,652
    #[test]
    fn rfc_example_test() {
        let bytes = hex_literal::hex!("c2197c5eff14e88c");
        let (value, len) = decode(&bytes);
        assert_eq!(value, 151_288_809_941_952_652u64);
        assert_eq!(len, 8);

        let bytes = hex_literal::hex!("9d7f3e7d");
        let (value, len) = decode(&bytes);
        assert_eq!(value, 494_878_333u64);
        assert_eq!(len, 4);

        let bytes = hex_literal::hex!("7bbd");
        let (value, len) = decode(&bytes);
        assert_eq!(value, 15_293u64);
        assert_eq!(len, 2);

        let bytes = hex_literal::hex!("25");
        let (value, len) = decode(&bytes);
        assert_eq!(value, 37u64);
        assert_eq!(len, 1);
    }

    #[test]
    fn boundary_encodings_test() {
        for (value, expected) in [
            (0u64, vec![0x00u8]),
            (63, vec![0x3f]),
            (64, vec![0x40, 0x40]),
            (16_383, vec![0x7f, 0xff]),
            (16_384, vec![0x80, 0x00, 0x40, 0x00]),
            (1_073_741_823, vec![0xbf, 0xff, 0xff, 0xff]),
            (
                1_073_741_824,
                vec![0xc0, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00],
            ),
        ] {
            let value = VarInt::new(value).unwrap();
            let bytes = encode(value);
            assert_eq!(bytes, expected, "encoding mismatch for {value}");
            let (decoded, len) = decode(&bytes);
            assert_eq!(decoded, value);
            assert_eq!(len, bytes.len());
        }
    }

    #[test]
    fn round_trip_test() {
        check!().with_type::<u64>().cloned().for_each(|value| {
            let value = value & MAX_VARINT_VALUE;
            let value = VarInt::new(value).unwrap();
            let bytes = encode(value);
            assert_eq!(bytes.len(), value.encoding_len());
            let (decoded, len) = decode(&bytes);
            assert_eq!(decoded, value);
            assert_eq!(len, bytes.len());
        });
    }

    #[test]
    fn out_of_range_test() {
        assert!(VarInt::new(MAX_VARINT_VALUE).is_ok());
        assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
    }
}
