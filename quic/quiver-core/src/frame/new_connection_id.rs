// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::ConnectionId, frame::Tag, stateless_reset, varint::VarInt};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderParameterizedValue, Encoder,
    EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

pub const TAG: Tag = 0x18;

#[derive(Debug, PartialEq, Eq)]
pub struct NewConnectionId {
    /// The sequence number assigned to the connection ID by the sender
    pub sequence_number: VarInt,
    /// Connection IDs with sequence numbers below this value are retired
    pub retire_prior_to: VarInt,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: stateless_reset::Token,
}

impl NewConnectionId {
    #[inline]
    pub fn tag(&self) -> Tag {
        TAG
    }
}

impl<'a> DecoderParameterizedValue<'a> for NewConnectionId {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(
        _tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
        let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# Receipt of the same frame multiple times MUST NOT be treated as a
        //# connection error.  A receiver can use the sequence number supplied in
        //# the NEW_CONNECTION_ID frame to handle receiving the same
        //# NEW_CONNECTION_ID frame multiple times.
        if retire_prior_to > sequence_number {
            return Err(DecoderError::InvariantViolation(
                "retire_prior_to exceeds sequence_number",
            ));
        }

        let (connection_id, buffer) = buffer.decode::<ConnectionId>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# Connection ID:  A connection ID of the specified length.
        if connection_id.is_empty() {
            return Err(DecoderError::InvariantViolation("empty connection id"));
        }

        let (stateless_reset_token, buffer) = buffer.decode()?;

        let frame = NewConnectionId {
            sequence_number,
            retire_prior_to,
            connection_id,
            stateless_reset_token,
        };
        Ok((frame, buffer))
    }
}

impl EncoderValue for NewConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.encode(&self.sequence_number);
        encoder.encode(&self.retire_prior_to);
        encoder.encode(&(self.connection_id.len() as u8));
        encoder.encode(&self.connection_id);
        encoder.encode(&self.stateless_reset_token);
    }
}
