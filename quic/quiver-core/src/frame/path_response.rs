// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::{path_challenge::DATA_LEN, Tag};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.18
//# A PATH_RESPONSE frame (type=0x1b) is sent in response to a
//# PATH_CHALLENGE frame.

pub const TAG: Tag = 0x1b;

#[derive(Debug, PartialEq, Eq)]
pub struct PathResponse {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.18
    //# If the content of a PATH_RESPONSE frame does not match the content of
    //# a PATH_CHALLENGE frame previously sent by the endpoint, the endpoint
    //# MAY generate a connection error of type PROTOCOL_VIOLATION.
    pub data: [u8; DATA_LEN],
}

impl PathResponse {
    #[inline]
    pub fn tag(&self) -> Tag {
        TAG
    }
}

impl<'a> DecoderParameterizedValue<'a> for PathResponse {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(
        _tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        let (data, buffer) = buffer.decode()?;
        Ok((PathResponse { data }, buffer))
    }
}

impl EncoderValue for PathResponse {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.write_slice(&self.data);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1 + DATA_LEN
    }
}
