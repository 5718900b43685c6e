// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# A PADDING frame (type=0x00) has no semantic value.  PADDING frames
//# can be used to increase the size of a packet.

pub const TAG: Tag = 0x00;

/// A run of one or more consecutive PADDING frames.
///
/// Each padding byte on the wire is its own frame; the decoder folds a
/// run into a single value to keep frame iteration cheap.
#[derive(Debug, PartialEq, Eq)]
pub struct Padding {
    pub length: usize,
}

impl Padding {
    #[inline]
    pub fn tag(&self) -> Tag {
        TAG
    }
}

impl<'a> DecoderParameterizedValue<'a> for Padding {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(
        _tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        // the tag byte itself was the first padding byte
        let mut length = 1;
        let mut buffer = buffer;
        while buffer.peek_byte(0) == Ok(TAG) {
            buffer = buffer.skip(1)?;
            length += 1;
        }
        Ok((Padding { length }, buffer))
    }
}

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_repeated(self.length, TAG);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.length
    }
}
