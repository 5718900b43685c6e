// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{ack::AckRanges, frame::Tag, inet::EcnCounts, varint::VarInt};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderParameterizedValue, Encoder,
    EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.

pub const ACK_TAG: Tag = 0x02;
/// The ECN variant additionally carries ECT(0)/ECT(1)/CE counts
pub const ACK_ECN_TAG: Tag = 0x03;

#[derive(Debug, PartialEq, Eq)]
pub struct Ack {
    /// Acknowledgment delay, already scaled by the sender's
    /// ack_delay_exponent
    pub ack_delay: VarInt,
    pub ranges: AckRanges,
    pub ecn_counts: Option<EcnCounts>,
}

impl Ack {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.ecn_counts.is_some() {
            ACK_ECN_TAG
        } else {
            ACK_TAG
        }
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> VarInt {
        debug_assert!(!self.ranges.is_empty());
        self.ranges
            .max_value()
            .and_then(|value| VarInt::new(value).ok())
            .unwrap_or_default()
    }
}

impl<'a> DecoderParameterizedValue<'a> for Ack {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
        let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
        let (range_count, buffer) = buffer.decode::<VarInt>()?;
        let (first_ack_range, buffer) = buffer.decode::<VarInt>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
        //# If any computed packet number is negative, an endpoint MUST generate
        //# a connection error of type FRAME_ENCODING_ERROR.
        let underflow = DecoderError::InvariantViolation("ack range underflow");

        let mut ranges = AckRanges::with_limit(usize::MAX);
        let mut smallest = largest_acknowledged
            .checked_sub(first_ack_range)
            .ok_or(underflow)?;
        ranges.insert_range(smallest.as_u64()..=largest_acknowledged.as_u64());

        let mut buffer = buffer;
        for _ in 0..range_count.as_u64() {
            let (gap, remaining) = buffer.decode::<VarInt>()?;
            let (range_len, remaining) = remaining.decode::<VarInt>()?;
            buffer = remaining;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# The value of the Gap field establishes the largest packet number
            //# value for the subsequent ACK Range using the following formula:
            //#
            //#    largest = previous_smallest - gap - 2
            let largest = smallest
                .checked_sub(gap)
                .and_then(|value| value.checked_sub(VarInt::from_u8(2)))
                .ok_or(underflow)?;
            smallest = largest.checked_sub(range_len).ok_or(underflow)?;
            ranges.insert_range(smallest.as_u64()..=largest.as_u64());
        }

        let (ecn_counts, buffer) = if tag == ACK_ECN_TAG {
            let (ect_0_count, buffer) = buffer.decode()?;
            let (ect_1_count, buffer) = buffer.decode()?;
            let (ce_count, buffer) = buffer.decode()?;
            (
                Some(EcnCounts {
                    ect_0_count,
                    ect_1_count,
                    ce_count,
                }),
                buffer,
            )
        } else {
            (None, buffer)
        };

        let frame = Ack {
            ack_delay,
            ranges,
            ecn_counts,
        };
        Ok((frame, buffer))
    }
}

impl EncoderValue for Ack {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        debug_assert!(!self.ranges.is_empty(), "ack frame requires at least one range");

        encoder.encode(&self.tag());

        let mut descending = self.ranges.iter_descending();
        let first = descending.next().unwrap_or(0..=0);
        let (mut prev_smallest, largest) = (*first.start(), *first.end());

        encoder.encode(&VarInt::new(largest).unwrap_or(VarInt::MAX));
        encoder.encode(&self.ack_delay);
        encoder.encode(
            &VarInt::try_from(self.ranges.interval_len().saturating_sub(1)).unwrap_or(VarInt::MAX),
        );
        // first ack range: packets before the largest in the same range
        encoder.encode(&VarInt::new(largest - prev_smallest).unwrap_or(VarInt::MAX));

        for range in descending {
            let (smallest, range_largest) = (*range.start(), *range.end());
            let gap = prev_smallest - range_largest - 2;
            encoder.encode(&VarInt::new(gap).unwrap_or(VarInt::MAX));
            encoder.encode(&VarInt::new(range_largest - smallest).unwrap_or(VarInt::MAX));
            prev_smallest = smallest;
        }

        if let Some(ecn_counts) = &self.ecn_counts {
            encoder.encode(&ecn_counts.ect_0_count);
            encoder.encode(&ecn_counts.ect_1_count);
            encoder.encode(&ecn_counts.ce_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_codec::EncoderBuffer;

    fn round_trip(frame: &Ack) -> Ack {
        let mut storage = vec![0u8; frame.encoding_size()];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (decoded, remaining) = buffer.decode::<crate::frame::Frame>().unwrap();
        assert!(remaining.is_empty());
        match decoded {
            crate::frame::Frame::Ack(ack) => ack,
            other => panic!("expected ack frame, got {other:?}"),
        }
    }

    #[test]
    fn single_packet_test() {
        // an ACK with an empty range list acknowledges one packet
        let bytes = [ACK_TAG, 42, 0, 0, 0];
        let buffer = DecoderBuffer::new(&bytes);
        let (frame, _) = buffer.decode::<crate::frame::Frame>().unwrap();
        match frame {
            crate::frame::Frame::Ack(ack) => {
                assert_eq!(ack.largest_acknowledged(), VarInt::from_u8(42));
                assert_eq!(ack.ranges.value_count(), 1);
            }
            other => panic!("expected ack frame, got {other:?}"),
        }
    }

    #[test]
    fn multi_range_round_trip_test() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(0..=3);
        ranges.insert_range(8..=10);
        ranges.insert_range(16..=16);

        let frame = Ack {
            ack_delay: VarInt::from_u8(9),
            ranges,
            ecn_counts: None,
        };
        let decoded = round_trip(&frame);
        assert_eq!(decoded, frame);
        assert_eq!(decoded.largest_acknowledged(), VarInt::from_u8(16));
    }

    #[test]
    fn ecn_round_trip_test() {
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ranges: core::iter::once(4..=7).collect(),
            ecn_counts: Some(EcnCounts {
                ect_0_count: VarInt::from_u8(3),
                ect_1_count: VarInt::ZERO,
                ce_count: VarInt::from_u8(1),
            }),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn underflow_test() {
        // largest = 1, first range = 2 would imply a negative packet number
        let bytes = [ACK_TAG, 1, 0, 0, 2];
        assert!(DecoderBuffer::new(&bytes)
            .decode::<crate::frame::Frame>()
            .is_err());

        // gap pushes the next range below zero
        let bytes = [ACK_TAG, 5, 0, 1, 0, 4, 0];
        assert!(DecoderBuffer::new(&bytes)
            .decode::<crate::frame::Frame>()
            .is_err());
    }
}
