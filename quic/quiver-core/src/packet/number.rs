// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use core::fmt;
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue, U24,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# Packet numbers are divided into three spaces in QUIC:
//#
//# Initial space:  All Initial packets (Section 17.2.2) are in this
//#    space.
//#
//# Handshake space:  All Handshake packets (Section 17.2.4) are in this
//#    space.
//#
//# Application data space:  All 0-RTT (Section 17.2.3) and 1-RTT
//#    (Section 17.3) packets are in this space.

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

impl PacketNumberSpace {
    pub const ALL: [Self; 3] = [Self::Initial, Self::Handshake, Self::ApplicationData];

    #[inline]
    pub fn new_packet_number(self, value: VarInt) -> PacketNumber {
        PacketNumber {
            space: self,
            value,
        }
    }

    #[inline]
    pub fn is_application_data(self) -> bool {
        matches!(self, Self::ApplicationData)
    }
}

/// A full 62-bit packet number, tagged with its space.
///
/// Packet numbers from different spaces never compare against each other;
/// the arithmetic here assumes (and debug-asserts) a single space.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PacketNumber {
    space: PacketNumberSpace,
    value: VarInt,
}

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PacketNumber({:?}, {})", self.space, self.value)
    }
}

impl PartialOrd for PacketNumber {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PacketNumber {
    #[inline]
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        debug_assert_eq!(self.space, other.space, "packet number space mismatch");
        self.value.cmp(&other.value)
    }
}

impl PacketNumber {
    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.value.as_u64()
    }

    #[inline]
    pub fn as_varint(self) -> VarInt {
        self.value
    }

    /// The next packet number in the space, unless the space is exhausted
    #[inline]
    pub fn next(self) -> Option<Self> {
        Some(Self {
            space: self.space,
            value: self.value.checked_add(VarInt::from_u8(1))?,
        })
    }

    #[inline]
    pub fn checked_distance(self, rhs: Self) -> Option<u64> {
        debug_assert_eq!(self.space, rhs.space, "packet number space mismatch");
        self.as_u64().checked_sub(rhs.as_u64())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# the sender MUST use a packet number size able to represent more than
    //# twice as large a range as the difference between the largest
    //# acknowledged packet and the packet number being sent.
    #[inline]
    pub fn truncate(self, largest_acknowledged: Self) -> Option<TruncatedPacketNumber> {
        let delta = self.checked_distance(largest_acknowledged)?;
        let len = PacketNumberLen::for_distance(delta)?;
        Some(TruncatedPacketNumber {
            space: self.space,
            value: self.as_u64() & len.mask(),
            len,
        })
    }
}

/// The wire length of a truncated packet number: 1 to 4 bytes
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct PacketNumberLen(u8);

impl PacketNumberLen {
    pub const MAX: Self = Self(4);

    /// Reads the length out of the low two bits of an unprotected first
    /// packet byte
    #[inline]
    pub fn from_packet_tag(tag: u8) -> Self {
        Self((tag & 0b11) + 1)
    }

    /// The smallest length whose window covers `distance` twice over
    #[inline]
    fn for_distance(distance: u64) -> Option<Self> {
        for len in 1..=4u8 {
            if distance < 1u64 << (len as u32 * 8 - 1) {
                return Some(Self(len));
            }
        }
        None
    }

    #[inline]
    pub fn bytesize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn bitsize(self) -> u32 {
        self.0 as u32 * 8
    }

    #[inline]
    fn mask(self) -> u64 {
        (1u64 << self.bitsize()) - 1
    }

    /// The value encoded into the low two bits of the first packet byte
    #[inline]
    pub fn into_packet_tag_mask(self) -> u8 {
        self.0 - 1
    }
}

/// A packet number as it appears on the wire, before expansion
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TruncatedPacketNumber {
    space: PacketNumberSpace,
    value: u64,
    len: PacketNumberLen,
}

impl TruncatedPacketNumber {
    #[inline]
    pub fn new(space: PacketNumberSpace, value: u64, len: PacketNumberLen) -> Self {
        debug_assert!(value <= len.mask());
        Self {
            space,
            value: value & len.mask(),
            len,
        }
    }

    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn len(self) -> PacketNumberLen {
        self.len
    }

    #[inline]
    pub fn into_u64(self) -> u64 {
        self.value
    }

    /// Decodes `len` bytes of big-endian packet number
    #[inline]
    pub fn decode(
        space: PacketNumberSpace,
        len: PacketNumberLen,
        buffer: DecoderBuffer,
    ) -> DecoderBufferResult<Self> {
        let (value, buffer) = match len.bytesize() {
            1 => {
                let (value, buffer) = buffer.decode::<u8>()?;
                (value as u64, buffer)
            }
            2 => {
                let (value, buffer) = buffer.decode::<u16>()?;
                (value as u64, buffer)
            }
            3 => {
                let (value, buffer) = buffer.decode::<U24>()?;
                (value.into_u32() as u64, buffer)
            }
            4 => {
                let (value, buffer) = buffer.decode::<u32>()?;
                (value as u64, buffer)
            }
            _ => return Err(DecoderError::InvariantViolation("invalid packet number len")),
        };
        Ok((Self { space, value, len }, buffer))
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //# candidate_pn = (expected_pn & ~pn_mask) | truncated_pn
    //# if candidate_pn <= expected_pn - pn_hwin and
    //#    candidate_pn < (1 << 62) - pn_win:
    //#    return candidate_pn + pn_win
    //# if candidate_pn > expected_pn + pn_hwin and
    //#    candidate_pn >= pn_win:
    //#    return candidate_pn - pn_win
    //# return candidate_pn
    #[inline]
    pub fn expand(self, largest: PacketNumber) -> PacketNumber {
        debug_assert_eq!(self.space, largest.space(), "packet number space mismatch");

        let expected = largest.as_u64() + 1;
        let win = 1u64 << self.len.bitsize();
        let hwin = win / 2;
        let mask = win - 1;

        let candidate = (expected & !mask) | self.value;

        let value = if expected.checked_sub(hwin).is_some_and(|low| candidate <= low)
            && candidate < (1u64 << 62) - win
        {
            candidate + win
        } else if candidate > expected + hwin && candidate >= win {
            candidate - win
        } else {
            candidate
        };

        let value = VarInt::new(value.min(VarInt::MAX.as_u64())).expect("value is clamped");
        self.space.new_packet_number(value)
    }
}

impl EncoderValue for TruncatedPacketNumber {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let len = self.len.bytesize();
        let bytes = self.value.to_be_bytes();
        encoder.write_slice(&bytes[8 - len..]);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len.bytesize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    fn new(value: u64) -> PacketNumber {
        PacketNumberSpace::Initial.new_packet_number(VarInt::new(value).unwrap())
    }

    #[test]
    fn truncate_example_test() {
        let largest = new(0xa82e_1b31);
        let packet_number = new(0xa82e_1b32);
        let truncated = packet_number.truncate(largest).unwrap();
        assert_eq!(truncated.len().bytesize(), 1);
        assert_eq!(truncated.into_u64(), 0x32);
        assert_eq!(truncated.expand(largest), packet_number);
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //= type=test
    //# For example, if the highest successfully
    //# authenticated packet had a packet number of 0xa82f30ea, then a packet
    //# containing a 16-bit value of 0x9b32 will be decoded as 0xa82f9b32.
    #[test]
    fn expand_example_test() {
        let largest = new(0xa82f_30ea);
        let truncated = TruncatedPacketNumber::new(
            PacketNumberSpace::Initial,
            0x9b32,
            PacketNumberLen(2),
        );
        assert_eq!(truncated.expand(largest), new(0xa82f_9b32));
    }

    #[test]
    fn round_trip_test() {
        check!()
            .with_type::<(u64, u64)>()
            .cloned()
            .for_each(|(largest, packet_number)| {
                let largest = largest & crate::varint::MAX_VARINT_VALUE;
                let packet_number = packet_number & crate::varint::MAX_VARINT_VALUE;
                let (largest, packet_number) = (new(largest), new(packet_number));

                if let Some(truncated) = packet_number.truncate(largest) {
                    assert_eq!(truncated.expand(largest), packet_number);
                }
            });
    }

    #[test]
    fn wire_round_trip_test() {
        let largest = new(0xff00);
        let packet_number = new(0xff34);
        let truncated = packet_number.truncate(largest).unwrap();

        let mut storage = [0u8; 4];
        let mut encoder = quiver_codec::EncoderBuffer::new(&mut storage);
        encoder.encode(&truncated);
        let len = encoder.len();
        assert_eq!(len, truncated.len().bytesize());

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (decoded, _) =
            TruncatedPacketNumber::decode(PacketNumberSpace::Initial, truncated.len(), buffer)
                .unwrap();
        assert_eq!(decoded.expand(largest), packet_number);
    }
}
