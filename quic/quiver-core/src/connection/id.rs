// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use quiver_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-5.1
//# Each connection possesses a set of connection identifiers, or
//# connection IDs, each of which can identify the connection.
//# Connection IDs are independently selected by endpoints; each endpoint
//# selects the connection IDs that its peer uses.

/// The maximum length of a connection ID in QUIC version 1
pub const MAX_LEN: usize = 20;

/// The minimum length of locally-issued connection IDs.
///
/// Zero-length peer CIDs are accepted on the wire; IDs issued by this
/// endpoint always carry at least one byte so the demuxer can route.
pub const MIN_LOCAL_LEN: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error(&'static str);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for Error {}

/// A connection ID: 0 to 20 opaque bytes, stored inline
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ConnectionId {
    bytes: [u8; MAX_LEN],
    len: u8,
}

impl ConnectionId {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_LEN],
        len: 0,
    };

    #[inline]
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, Error> {
        if slice.len() > MAX_LEN {
            return Err(Error("connection id exceeds 20 bytes"));
        }
        let mut bytes = [0; MAX_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConnectionId(")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl AsRef<[u8]> for ConnectionId {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl TryFrom<&[u8]> for ConnectionId {
    type Error = Error;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from_slice(slice)
    }
}

impl EncoderValue for ConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self.as_bytes());
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len()
    }
}

/// Decodes a connection ID prefixed with a one-byte length, as used in
/// long packet headers and NEW_CONNECTION_ID frames
impl<'a> DecoderValue<'a> for ConnectionId {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
        let id = Self::try_from_slice(slice.into_less_safe_slice())
            .map_err(|_| quiver_codec::DecoderError::InvariantViolation("invalid connection id"))?;
        Ok((id, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_test() {
        assert!(ConnectionId::try_from_slice(&[0u8; 21]).is_err());
        let id = ConnectionId::try_from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(id.as_bytes(), &[1, 2, 3]);
        assert_eq!(ConnectionId::EMPTY.len(), 0);
    }

    #[test]
    fn length_prefixed_decode_test() {
        let bytes = [3u8, 0xaa, 0xbb, 0xcc, 0xff];
        let (id, remaining) = DecoderBuffer::new(&bytes).decode::<ConnectionId>().unwrap();
        assert_eq!(id.as_bytes(), &[0xaa, 0xbb, 0xcc]);
        assert_eq!(remaining.len(), 1);
    }
}
