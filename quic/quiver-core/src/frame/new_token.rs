// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderParameterizedValue, Encoder,
    EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
//# A server sends a NEW_TOKEN frame (type=0x07) to provide the client
//# with a token to send in the header of an Initial packet for a future
//# connection.

pub const TAG: Tag = 0x07;

#[derive(Debug, PartialEq, Eq)]
pub struct NewToken<'a> {
    pub token: &'a [u8],
}

impl NewToken<'_> {
    #[inline]
    pub fn tag(&self) -> Tag {
        TAG
    }
}

impl<'a> DecoderParameterizedValue<'a> for NewToken<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(
        _tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        let (token, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        let token = token.into_less_safe_slice();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
        //# A client MUST treat receipt of a NEW_TOKEN frame with an empty Token
        //# field as a connection error of type FRAME_ENCODING_ERROR.
        if token.is_empty() {
            return Err(DecoderError::InvariantViolation("empty token"));
        }

        Ok((NewToken { token }, buffer))
    }
}

impl EncoderValue for NewToken<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.encode_with_len_prefix::<VarInt, _>(&self.token);
    }
}
