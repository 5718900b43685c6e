// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};
use subtle::ConstantTimeEq;

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# A stateless reset is provided as an option of last resort for an
//# endpoint that does not have access to the state of a connection.

/// The length in bytes of a stateless reset token
pub const TOKEN_LEN: usize = 16;

/// A 16-byte token bound to a connection ID, used to validate stateless
/// reset packets.
///
/// Equality is evaluated in constant time: the comparison runs over
/// attacker-controlled datagram tails.
#[derive(Clone, Copy, Debug, Eq)]
pub struct Token([u8; TOKEN_LEN]);

impl Token {
    /// A token identifying an endpoint which did not negotiate one
    pub const ZEROED: Self = Self([0; TOKEN_LEN]);

    #[inline]
    pub const fn new(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl PartialEq for Token {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl core::hash::Hash for Token {
    #[inline]
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<[u8; TOKEN_LEN]> for Token {
    #[inline]
    fn from(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Token {
    type Error = quiver_codec::DecoderError;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; TOKEN_LEN] = slice
            .try_into()
            .map_err(|_| quiver_codec::DecoderError::InvariantViolation("invalid token length"))?;
        Ok(Self(bytes))
    }
}

impl EncoderValue for Token {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.0);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        TOKEN_LEN
    }
}

impl<'a> DecoderValue<'a> for Token {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (bytes, buffer) = buffer.decode::<[u8; TOKEN_LEN]>()?;
        Ok((Self(bytes), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_test() {
        let a = Token::new([1; TOKEN_LEN]);
        let b = Token::new([1; TOKEN_LEN]);
        let c = Token::new([2; TOKEN_LEN]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
