// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{FitError, Tag},
    varint::VarInt,
};
use core::mem::size_of;
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderParameterizedValue, Encoder,
    EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# STREAM frames implicitly create a stream and carry stream data.  The
//# Type field in the STREAM frame takes the form 0b00001XXX (or the set
//# of values from 0x08 to 0x0f).

pub const STREAM_TAG_MIN: Tag = 0x08;
pub const STREAM_TAG_MAX: Tag = 0x0f;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The OFF bit (0x04) in the frame type is set to indicate that there
//#    is an Offset field present.
const OFF_BIT: Tag = 0x04;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The LEN bit (0x02) in the frame type is set to indicate that there
//#    is a Length field present.  If this bit is set to 0, the Length
//#    field is absent and the Stream Data field extends to the end of
//#    the packet.
const LEN_BIT: Tag = 0x02;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The FIN bit (0x01) indicates that the frame marks the end of the
//#    stream.
const FIN_BIT: Tag = 0x01;

#[derive(Debug, PartialEq, Eq)]
pub struct Stream<'a> {
    pub stream_id: VarInt,

    /// The byte offset of `data` within the stream
    pub offset: VarInt,

    /// If true, the frame extends to the end of the packet and omits its
    /// length field
    pub is_last_frame: bool,

    /// If true, the frame marks the end of the stream
    pub is_fin: bool,

    pub data: &'a [u8],
}

impl<'a> Stream<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = STREAM_TAG_MIN;

        if self.offset != 0u64 {
            tag |= OFF_BIT;
        }

        if !self.is_last_frame {
            tag |= LEN_BIT;
        }

        if self.is_fin {
            tag |= FIN_BIT;
        }

        tag
    }

    /// The first stream offset past the data in this frame
    #[inline]
    pub fn end_offset(&self) -> Option<VarInt> {
        self.offset.checked_add_usize(self.data.len())
    }

    /// Trims the frame so it fits into `capacity` bytes, updating
    /// `is_last_frame`. Returns the new data length.
    #[inline]
    pub fn try_fit(&mut self, capacity: usize) -> Result<usize, FitError> {
        let mut fixed_len = size_of::<Tag>();
        fixed_len += self.stream_id.encoding_size();

        if self.offset != 0u64 {
            fixed_len += self.offset.encoding_size();
        }

        let remaining_capacity = capacity.checked_sub(fixed_len).ok_or(FitError)?;

        let data_len = self.data.len().min(remaining_capacity);

        // data which exactly consumes the remaining capacity omits the
        // length prefix and closes the packet
        if data_len == remaining_capacity {
            self.is_last_frame = true;
            self.data = &self.data[..data_len];
            return Ok(data_len);
        }

        self.is_last_frame = false;
        let prefix_len = VarInt::try_from(data_len)
            .map_err(|_| FitError)?
            .encoding_size();
        let data_len = remaining_capacity
            .checked_sub(prefix_len)
            .ok_or(FitError)?
            .min(self.data.len());

        self.data = &self.data[..data_len];
        Ok(data_len)
    }
}

impl<'a> DecoderParameterizedValue<'a> for Stream<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let has_offset = tag & OFF_BIT == OFF_BIT;
        let is_last_frame = tag & LEN_BIT != LEN_BIT;
        let is_fin = tag & FIN_BIT == FIN_BIT;

        let (stream_id, buffer) = buffer.decode()?;

        let (offset, buffer) = if has_offset {
            buffer.decode()?
        } else {
            (VarInt::ZERO, buffer)
        };

        let (data, buffer) = if is_last_frame {
            let len = buffer.len();
            let (data, buffer) = buffer.decode_slice(len)?;
            (data, buffer)
        } else {
            buffer.decode_slice_with_len_prefix::<VarInt>()?
        };
        let data = data.into_less_safe_slice();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
        //# The largest offset delivered on a stream -- the sum of the offset and
        //# data length -- cannot exceed 2^62-1, as it is not possible to provide
        //# flow control credit for that data.  Receipt of a frame that exceeds
        //# this limit MUST be treated as a connection error of type
        //# FRAME_ENCODING_ERROR or FLOW_CONTROL_ERROR.
        offset
            .checked_add_usize(data.len())
            .ok_or(DecoderError::InvariantViolation("stream offset overflow"))?;

        let frame = Stream {
            stream_id,
            offset,
            is_last_frame,
            is_fin,
            data,
        };
        Ok((frame, buffer))
    }
}

impl EncoderValue for Stream<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.stream_id);

        if self.offset != 0u64 {
            encoder.encode(&self.offset);
        }

        if self.is_last_frame {
            encoder.encode(&self.data);
        } else {
            encoder.encode_with_len_prefix::<VarInt, _>(&self.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_fit_test() {
        let payload = [0u8; 64];
        let mut frame = Stream {
            stream_id: VarInt::from_u8(4),
            offset: VarInt::from_u16(300),
            is_last_frame: false,
            is_fin: false,
            data: &payload,
        };

        // tag (1) + stream id (1) + offset (2) = 4 fixed bytes; the
        // payload does not fill the capacity so a length prefix is kept
        frame.data = &payload[..15];
        assert_eq!(frame.try_fit(21), Ok(15));
        assert!(!frame.is_last_frame);
        assert_eq!(frame.encoding_size(), 20);

        // a payload larger than the capacity is trimmed to exactly fill it
        frame.data = &payload;
        assert_eq!(frame.try_fit(20), Ok(16));
        assert!(frame.is_last_frame);
        assert_eq!(frame.encoding_size(), 20);

        // exactly consuming the capacity drops the length prefix
        frame.data = &payload;
        assert_eq!(frame.try_fit(68), Ok(64));
        assert!(frame.is_last_frame);
        assert_eq!(frame.encoding_size(), 68);

        // no room for the header at all
        frame.data = &payload;
        assert_eq!(frame.try_fit(3), Err(FitError));
    }

    #[test]
    fn offset_overflow_test() {
        let mut storage = vec![0u8; 32];
        let frame = Stream {
            stream_id: VarInt::from_u8(0),
            offset: VarInt::MAX,
            is_last_frame: false,
            is_fin: false,
            data: &[1, 2, 3],
        };
        let mut encoder = quiver_codec::EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        assert!(DecoderBuffer::new(&storage[..len])
            .decode::<crate::frame::Frame>()
            .is_err());
    }
}
