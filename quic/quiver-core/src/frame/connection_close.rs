// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{application::ApplicationErrorCode, frame::Tag, transport, varint::VarInt};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.

/// Signals a transport-level error
pub const TRANSPORT_TAG: Tag = 0x1c;
/// Signals an application-level close; forbidden in Initial and
/// Handshake packets
pub const APPLICATION_TAG: Tag = 0x1d;

#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    pub error_code: VarInt,
    /// The frame type which triggered the error; `None` for the
    /// application-close variant
    pub frame_type: Option<VarInt>,
    pub reason: &'a [u8],
}

impl<'a> ConnectionClose<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            TRANSPORT_TAG
        } else {
            APPLICATION_TAG
        }
    }

    #[inline]
    pub fn is_application_close(&self) -> bool {
        self.frame_type.is_none()
    }

    pub fn from_transport_error(error: transport::Error) -> Self {
        Self {
            error_code: error.code,
            frame_type: Some(error.frame_type.unwrap_or(VarInt::ZERO)),
            reason: error.reason.as_bytes(),
        }
    }

    pub fn from_application_close(code: ApplicationErrorCode, reason: &'a [u8]) -> Self {
        Self {
            error_code: code.into(),
            frame_type: None,
            reason,
        }
    }
}

impl<'a> DecoderParameterizedValue<'a> for ConnectionClose<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (error_code, buffer) = buffer.decode()?;

        let (frame_type, buffer) = if tag == TRANSPORT_TAG {
            let (frame_type, buffer) = buffer.decode()?;
            (Some(frame_type), buffer)
        } else {
            (None, buffer)
        };

        let (reason, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        let reason = reason.into_less_safe_slice();

        let frame = ConnectionClose {
            error_code,
            frame_type,
            reason,
        };
        Ok((frame, buffer))
    }
}

impl EncoderValue for ConnectionClose<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.error_code);
        if let Some(frame_type) = self.frame_type {
            encoder.encode(&frame_type);
        }
        encoder.encode_with_len_prefix::<VarInt, _>(&self.reason);
    }
}
