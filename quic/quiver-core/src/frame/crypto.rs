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

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

pub const TAG: Tag = 0x06;

#[derive(Debug, PartialEq, Eq)]
pub struct Crypto<'a> {
    /// The byte offset in the per-level crypto stream
    pub offset: VarInt,
    pub data: &'a [u8],
}

impl<'a> Crypto<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        TAG
    }

    /// Trims `data` so the whole frame fits into `capacity` bytes,
    /// returning the new data length
    #[inline]
    pub fn try_fit(&mut self, capacity: usize) -> Result<usize, FitError> {
        let mut fixed_len = size_of::<Tag>();
        fixed_len += self.offset.encoding_size();

        let remaining = capacity.checked_sub(fixed_len).ok_or(FitError)?;

        // a length prefix is always present, so reserve the worst case
        // prefix before trimming
        let data_len = self.data.len().min(remaining);
        let prefix_len = VarInt::try_from(data_len).map_err(|_| FitError)?.encoding_size();
        let data_len = remaining.checked_sub(prefix_len).ok_or(FitError)?.min(self.data.len());

        self.data = &self.data[..data_len];
        Ok(data_len)
    }
}

impl<'a> DecoderParameterizedValue<'a> for Crypto<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(
        _tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        let (offset, buffer) = buffer.decode::<VarInt>()?;
        let (data, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        let data = data.into_less_safe_slice();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
        //# The stream does not have an explicit end, so CRYPTO frames do not
        //# have a FIN bit.  The largest offset delivered on a stream -- the sum
        //# of the offset and data length -- cannot exceed 2^62-1.
        offset
            .checked_add_usize(data.len())
            .ok_or(DecoderError::InvariantViolation("crypto offset overflow"))?;

        Ok((Crypto { offset, data }, buffer))
    }
}

impl EncoderValue for Crypto<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.encode(&self.offset);
        encoder.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_fit_test() {
        let payload = [0u8; 100];
        let mut frame = Crypto {
            offset: VarInt::from_u16(300),
            data: &payload,
        };

        // tag (1) + offset (2) + len prefix (1) leaves 16 bytes of data
        assert_eq!(frame.try_fit(20), Ok(16));
        assert_eq!(frame.encoding_size(), 20);

        frame.data = &payload;
        assert_eq!(frame.try_fit(2), Err(FitError));
    }
}
