// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use core::fmt;
use quiver_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.2
//# The management of application error codes is left to application
//# protocols.

/// An application-defined error code carried in CONNECTION_CLOSE (0x1d),
/// RESET_STREAM, and STOP_SENDING frames.
///
/// The transport never interprets the value.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ApplicationErrorCode(VarInt);

impl ApplicationErrorCode {
    pub const UNKNOWN: Self = Self(VarInt::MAX);

    #[inline]
    pub const fn new(code: VarInt) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }
}

impl fmt::Display for ApplicationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<VarInt> for ApplicationErrorCode {
    #[inline]
    fn from(value: VarInt) -> Self {
        Self(value)
    }
}

impl From<ApplicationErrorCode> for VarInt {
    #[inline]
    fn from(value: ApplicationErrorCode) -> Self {
        value.0
    }
}

impl From<u32> for ApplicationErrorCode {
    #[inline]
    fn from(value: u32) -> Self {
        Self(VarInt::from_u32(value))
    }
}

impl EncoderValue for ApplicationErrorCode {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.0.encode(encoder);
    }
}

impl<'a> DecoderValue<'a> for ApplicationErrorCode {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (value, buffer) = buffer.decode()?;
        Ok((Self(value), buffer))
    }
}
