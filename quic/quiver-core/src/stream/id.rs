// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{endpoint, varint::VarInt};
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
//# The least significant bit (0x01) of the stream ID identifies the
//# initiator of the stream.  Client-initiated streams have even-numbered
//# stream IDs (with the bit set to 0), and server-initiated streams have
//# odd-numbered stream IDs (with the bit set to 1).

//= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
//# The second least significant bit (0x02) of the stream ID
//# distinguishes between bidirectional streams (with the bit set to 0)
//# and unidirectional streams (with the bit set to 1).

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StreamType {
    Bidirectional,
    Unidirectional,
}

impl StreamType {
    pub const ALL: [Self; 2] = [Self::Bidirectional, Self::Unidirectional];

    #[inline]
    pub fn is_bidirectional(self) -> bool {
        matches!(self, Self::Bidirectional)
    }
}

/// A 62-bit stream identifier.
///
/// The low two bits carry the initiator and directionality; the rest is
/// a per-(initiator, type) counter.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct StreamId(VarInt);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "StreamId({}, {:?}, {:?})",
            self.0,
            self.initiator(),
            self.stream_type()
        )
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl StreamId {
    /// The first stream ID for the given initiator and type
    #[inline]
    pub fn initial(initiator: endpoint::Type, stream_type: StreamType) -> Self {
        let mut id = 0u8;
        if initiator.is_server() {
            id |= 0b01;
        }
        if !stream_type.is_bidirectional() {
            id |= 0b10;
        }
        Self(VarInt::from_u8(id))
    }

    /// The `n`th (zero-based) stream ID for the given initiator and type,
    /// or `None` once the ID space is exhausted
    #[inline]
    pub fn nth(initiator: endpoint::Type, stream_type: StreamType, n: u64) -> Option<Self> {
        let base = Self::initial(initiator, stream_type);
        let offset = n.checked_mul(4)?;
        Some(Self(base.0.checked_add(VarInt::new(offset).ok()?)?))
    }

    /// This stream's zero-based index within its (initiator, type) space
    #[inline]
    pub fn sequence_number(self) -> u64 {
        self.0.as_u64() >> 2
    }

    #[inline]
    pub fn from_varint(value: VarInt) -> Self {
        Self(value)
    }

    #[inline]
    pub fn as_varint(self) -> VarInt {
        self.0
    }

    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        if self.0.as_u64() & 0b01 == 0 {
            endpoint::Type::Client
        } else {
            endpoint::Type::Server
        }
    }

    #[inline]
    pub fn stream_type(self) -> StreamType {
        if self.0.as_u64() & 0b10 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    #[inline]
    pub fn is_bidirectional(self) -> bool {
        self.stream_type().is_bidirectional()
    }

    /// `true` if `local_endpoint` may send data on this stream
    #[inline]
    pub fn is_sendable(self, local_endpoint: endpoint::Type) -> bool {
        self.is_bidirectional() || self.initiator() == local_endpoint
    }

    /// `true` if `local_endpoint` may receive data on this stream
    #[inline]
    pub fn is_receivable(self, local_endpoint: endpoint::Type) -> bool {
        self.is_bidirectional() || self.initiator() != local_endpoint
    }
}

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.as_varint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint::Type::{Client, Server};

    #[test]
    fn bit_layout_test() {
        assert_eq!(
            StreamId::initial(Client, StreamType::Bidirectional).as_varint(),
            VarInt::from_u8(0)
        );
        assert_eq!(
            StreamId::initial(Server, StreamType::Bidirectional).as_varint(),
            VarInt::from_u8(1)
        );
        assert_eq!(
            StreamId::initial(Client, StreamType::Unidirectional).as_varint(),
            VarInt::from_u8(2)
        );
        assert_eq!(
            StreamId::initial(Server, StreamType::Unidirectional).as_varint(),
            VarInt::from_u8(3)
        );
    }

    #[test]
    fn nth_test() {
        let id = StreamId::nth(Client, StreamType::Bidirectional, 3).unwrap();
        assert_eq!(id.as_varint(), VarInt::from_u8(12));
        assert_eq!(id.sequence_number(), 3);
        assert_eq!(id.initiator(), Client);

        // the id space is bounded
        assert!(StreamId::nth(Client, StreamType::Bidirectional, u64::MAX).is_none());
    }

    #[test]
    fn directionality_test() {
        let uni = StreamId::initial(Client, StreamType::Unidirectional);
        assert!(uni.is_sendable(Client));
        assert!(!uni.is_sendable(Server));
        assert!(uni.is_receivable(Server));
        assert!(!uni.is_receivable(Client));

        let bidi = StreamId::initial(Server, StreamType::Bidirectional);
        assert!(bidi.is_sendable(Client));
        assert!(bidi.is_sendable(Server));
    }
}
