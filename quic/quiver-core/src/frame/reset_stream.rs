// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{application::ApplicationErrorCode, frame::Tag, varint::VarInt};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

pub const TAG: Tag = 0x04;

#[derive(Debug, PartialEq, Eq)]
pub struct ResetStream {
    pub stream_id: VarInt,
    pub application_error_code: ApplicationErrorCode,
    /// The final size of the stream in bytes
    pub final_size: VarInt,
}

impl ResetStream {
    #[inline]
    pub fn tag(&self) -> Tag {
        TAG
    }
}

impl<'a> DecoderParameterizedValue<'a> for ResetStream {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(
        _tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        let (stream_id, buffer) = buffer.decode()?;
        let (application_error_code, buffer) = buffer.decode()?;
        let (final_size, buffer) = buffer.decode()?;
        let frame = ResetStream {
            stream_id,
            application_error_code,
            final_size,
        };
        Ok((frame, buffer))
    }
}

impl EncoderValue for ResetStream {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.encode(&self.stream_id);
        encoder.encode(&self.application_error_code);
        encoder.encode(&self.final_size);
    }
}
