// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Codec and classification for every RFC 9000 frame type.

use core::fmt;
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

pub mod ack;
pub mod ack_elicitation;
pub mod connection_close;
pub mod crypto;
pub mod data_blocked;
pub mod handshake_done;
pub mod max_data;
pub mod max_stream_data;
pub mod max_streams;
pub mod new_connection_id;
pub mod new_token;
pub mod padding;
pub mod path_challenge;
pub mod path_response;
pub mod ping;
pub mod reset_stream;
pub mod retire_connection_id;
pub mod stop_sending;
pub mod stream;
pub mod stream_data_blocked;
pub mod streams_blocked;

pub use ack::Ack;
pub use ack_elicitation::AckElicitation;
pub use connection_close::ConnectionClose;
pub use crypto::Crypto;
pub use data_blocked::DataBlocked;
pub use handshake_done::HandshakeDone;
pub use max_data::MaxData;
pub use max_stream_data::MaxStreamData;
pub use max_streams::MaxStreams;
pub use new_connection_id::NewConnectionId;
pub use new_token::NewToken;
pub use padding::Padding;
pub use path_challenge::PathChallenge;
pub use path_response::PathResponse;
pub use ping::Ping;
pub use reset_stream::ResetStream;
pub use retire_connection_id::RetireConnectionId;
pub use stop_sending::StopSending;
pub use stream::Stream;
pub use stream_data_blocked::StreamDataBlocked;
pub use streams_blocked::StreamsBlocked;

pub(crate) type Tag = u8;

/// A frame did not fit in the remaining packet capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitError;

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "frame does not fit in the remaining capacity")
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
//# The payload of QUIC packets, after removing packet protection,
//# consists of a sequence of complete frames.

#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack),
    ResetStream(ResetStream),
    StopSending(StopSending),
    Crypto(Crypto<'a>),
    NewToken(NewToken<'a>),
    Stream(Stream<'a>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    MaxStreams(MaxStreams),
    DataBlocked(DataBlocked),
    StreamDataBlocked(StreamDataBlocked),
    StreamsBlocked(StreamsBlocked),
    NewConnectionId(NewConnectionId),
    RetireConnectionId(RetireConnectionId),
    PathChallenge(PathChallenge),
    PathResponse(PathResponse),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
}

macro_rules! with_frame {
    ($self:ident, $frame:pat => $body:expr) => {
        match $self {
            Frame::Padding($frame) => $body,
            Frame::Ping($frame) => $body,
            Frame::Ack($frame) => $body,
            Frame::ResetStream($frame) => $body,
            Frame::StopSending($frame) => $body,
            Frame::Crypto($frame) => $body,
            Frame::NewToken($frame) => $body,
            Frame::Stream($frame) => $body,
            Frame::MaxData($frame) => $body,
            Frame::MaxStreamData($frame) => $body,
            Frame::MaxStreams($frame) => $body,
            Frame::DataBlocked($frame) => $body,
            Frame::StreamDataBlocked($frame) => $body,
            Frame::StreamsBlocked($frame) => $body,
            Frame::NewConnectionId($frame) => $body,
            Frame::RetireConnectionId($frame) => $body,
            Frame::PathChallenge($frame) => $body,
            Frame::PathResponse($frame) => $body,
            Frame::ConnectionClose($frame) => $body,
            Frame::HandshakeDone($frame) => $body,
        }
    };
}

impl Frame<'_> {
    #[inline]
    pub fn tag(&self) -> Tag {
        with_frame!(self, frame => frame.tag())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2
    //# ... all other frames are ack-eliciting.
    #[inline]
    pub fn ack_elicitation(&self) -> AckElicitation {
        match self {
            Frame::Padding(_) | Frame::Ack(_) | Frame::ConnectionClose(_) => {
                AckElicitation::NonEliciting
            }
            _ => AckElicitation::Eliciting,
        }
    }

    /// `true` if the frame counts against the congestion window
    //= https://www.rfc-editor.org/rfc/rfc9002#section-2
    //# Packets that contain only ACK frames do not count toward bytes in
    //# flight and are not congestion controlled.
    #[inline]
    pub fn is_congestion_controlled(&self) -> bool {
        !matches!(self, Frame::Ack(_))
    }

    /// `true` if the frame may appear in packets which only probe a path
    //= https://www.rfc-editor.org/rfc/rfc9000#section-9.1
    //# PATH_CHALLENGE, PATH_RESPONSE, NEW_CONNECTION_ID, and PADDING
    //# frames are "probing frames", and all other frames are "non-probing
    //# frames".
    #[inline]
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            Frame::Padding(_)
                | Frame::PathChallenge(_)
                | Frame::PathResponse(_)
                | Frame::NewConnectionId(_)
        )
    }
}

impl<'a> DecoderValue<'a> for Frame<'a> {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let tag = buffer.peek_byte(0)?;
        let buffer = buffer.skip(core::mem::size_of::<Tag>())?;

        macro_rules! parameterized {
            ($variant:ident) => {{
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::$variant(frame), buffer))
            }};
        }

        match tag {
            padding::TAG => parameterized!(Padding),
            ping::TAG => parameterized!(Ping),
            ack::ACK_TAG | ack::ACK_ECN_TAG => parameterized!(Ack),
            reset_stream::TAG => parameterized!(ResetStream),
            stop_sending::TAG => parameterized!(StopSending),
            crypto::TAG => parameterized!(Crypto),
            new_token::TAG => parameterized!(NewToken),
            stream::STREAM_TAG_MIN..=stream::STREAM_TAG_MAX => parameterized!(Stream),
            max_data::TAG => parameterized!(MaxData),
            max_stream_data::TAG => parameterized!(MaxStreamData),
            max_streams::BIDI_TAG | max_streams::UNI_TAG => parameterized!(MaxStreams),
            data_blocked::TAG => parameterized!(DataBlocked),
            stream_data_blocked::TAG => parameterized!(StreamDataBlocked),
            streams_blocked::BIDI_TAG | streams_blocked::UNI_TAG => {
                parameterized!(StreamsBlocked)
            }
            new_connection_id::TAG => parameterized!(NewConnectionId),
            retire_connection_id::TAG => parameterized!(RetireConnectionId),
            path_challenge::TAG => parameterized!(PathChallenge),
            path_response::TAG => parameterized!(PathResponse),
            connection_close::TRANSPORT_TAG | connection_close::APPLICATION_TAG => {
                parameterized!(ConnectionClose)
            }
            handshake_done::TAG => parameterized!(HandshakeDone),
            //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
            //# An endpoint MUST treat the receipt of a frame of unknown type as a
            //# connection error of type FRAME_ENCODING_ERROR.
            _ => Err(DecoderError::InvariantViolation("unknown frame")),
        }
    }
}

impl EncoderValue for Frame<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        with_frame!(self, frame => frame.encode(encoder))
    }
}

macro_rules! impl_frame_conversion {
    ($ty:ident $(<$lt:lifetime>)?, $variant:ident) => {
        impl<'a> From<$ty $(<$lt>)?> for Frame<'a> {
            #[inline]
            fn from(frame: $ty $(<$lt>)?) -> Self {
                Frame::$variant(frame)
            }
        }
    };
}

impl_frame_conversion!(Padding, Padding);
impl_frame_conversion!(Ping, Ping);
impl_frame_conversion!(Ack, Ack);
impl_frame_conversion!(ResetStream, ResetStream);
impl_frame_conversion!(StopSending, StopSending);
impl_frame_conversion!(Crypto<'a>, Crypto);
impl_frame_conversion!(NewToken<'a>, NewToken);
impl_frame_conversion!(Stream<'a>, Stream);
impl_frame_conversion!(MaxData, MaxData);
impl_frame_conversion!(MaxStreamData, MaxStreamData);
impl_frame_conversion!(MaxStreams, MaxStreams);
impl_frame_conversion!(DataBlocked, DataBlocked);
impl_frame_conversion!(StreamDataBlocked, StreamDataBlocked);
impl_frame_conversion!(StreamsBlocked, StreamsBlocked);
impl_frame_conversion!(NewConnectionId, NewConnectionId);
impl_frame_conversion!(RetireConnectionId, RetireConnectionId);
impl_frame_conversion!(PathChallenge, PathChallenge);
impl_frame_conversion!(PathResponse, PathResponse);
impl_frame_conversion!(ConnectionClose<'a>, ConnectionClose);
impl_frame_conversion!(HandshakeDone, HandshakeDone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{stream::StreamType, varint::VarInt};
    use quiver_codec::EncoderBuffer;

    fn round_trip(frame: Frame) {
        let mut storage = vec![0u8; frame.encoding_size().max(64)];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (decoded, remaining) = buffer.decode::<Frame>().unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trip_test() {
        let token = [0xab; 8];
        let mut ack_ranges = crate::ack::AckRanges::new();
        ack_ranges.insert_range(1..=3);
        ack_ranges.insert_range(7..=10);

        let frames: Vec<Frame> = vec![
            Ping.into(),
            Ack {
                ack_delay: VarInt::from_u8(30),
                ranges: ack_ranges,
                ecn_counts: None,
            }
            .into(),
            ResetStream {
                stream_id: VarInt::from_u8(4),
                application_error_code: 7u32.into(),
                final_size: VarInt::from_u16(4040),
            }
            .into(),
            StopSending {
                stream_id: VarInt::from_u8(4),
                application_error_code: 1u32.into(),
            }
            .into(),
            Crypto {
                offset: VarInt::from_u16(1200),
                data: &[1, 2, 3],
            }
            .into(),
            NewToken { token: &[9; 16] }.into(),
            Stream {
                stream_id: VarInt::from_u8(0),
                offset: VarInt::from_u16(365),
                is_last_frame: false,
                is_fin: true,
                data: b"hello".as_slice(),
            }
            .into(),
            MaxData {
                maximum_data: VarInt::from_u32(100_000),
            }
            .into(),
            MaxStreamData {
                stream_id: VarInt::from_u8(8),
                maximum_stream_data: VarInt::from_u32(65_536),
            }
            .into(),
            MaxStreams {
                stream_type: StreamType::Unidirectional,
                maximum_streams: VarInt::from_u8(101),
            }
            .into(),
            DataBlocked {
                data_limit: VarInt::from_u32(100_000),
            }
            .into(),
            StreamDataBlocked {
                stream_id: VarInt::from_u8(8),
                stream_data_limit: VarInt::from_u32(65_536),
            }
            .into(),
            StreamsBlocked {
                stream_type: StreamType::Bidirectional,
                stream_limit: VarInt::from_u8(101),
            }
            .into(),
            NewConnectionId {
                sequence_number: VarInt::from_u8(3),
                retire_prior_to: VarInt::from_u8(1),
                connection_id: crate::connection::ConnectionId::try_from_slice(&[1, 2, 3, 4])
                    .unwrap(),
                stateless_reset_token: crate::stateless_reset::Token::new([0x42; 16]),
            }
            .into(),
            RetireConnectionId {
                sequence_number: VarInt::from_u8(2),
            }
            .into(),
            PathChallenge { data: token }.into(),
            PathResponse { data: token }.into(),
            ConnectionClose {
                error_code: VarInt::from_u8(0xa),
                frame_type: Some(VarInt::ZERO),
                reason: b"protocol violation".as_slice(),
            }
            .into(),
            HandshakeDone.into(),
        ];

        for frame in frames {
            round_trip(frame);
        }
    }

    #[test]
    fn classification_test() {
        let ack: Frame = Ack {
            ack_delay: VarInt::ZERO,
            ranges: core::iter::once(0..=0).collect(),
            ecn_counts: None,
        }
        .into();

        assert_eq!(ack.ack_elicitation(), AckElicitation::NonEliciting);
        assert!(!ack.is_congestion_controlled());
        assert!(!ack.is_probing());

        let padding: Frame = Padding { length: 10 }.into();
        assert_eq!(padding.ack_elicitation(), AckElicitation::NonEliciting);
        assert!(padding.is_probing());

        let ping: Frame = Ping.into();
        assert_eq!(ping.ack_elicitation(), AckElicitation::Eliciting);
        assert!(!ping.is_probing());

        let response: Frame = PathResponse { data: [0; 8] }.into();
        assert!(response.is_probing());
    }

    #[test]
    fn unknown_frame_test() {
        let bytes = [0x21u8, 0, 0];
        assert_eq!(
            DecoderBuffer::new(&bytes).decode::<Frame>().unwrap_err(),
            DecoderError::InvariantViolation("unknown frame")
        );
    }
}
