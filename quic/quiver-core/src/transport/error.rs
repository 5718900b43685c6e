// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{crypto::CryptoError, varint::VarInt};
use core::fmt;
use quiver_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// A transport-level error which terminates the connection.
///
/// Carries the RFC 9000 §20.1 code, the frame type which triggered the
/// error (when known), and a static reason phrase for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    pub const fn new(code: VarInt) -> Self {
        Self {
            code,
            frame_type: None,
            reason: "",
        }
    }

    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(description) = self.description() {
            write!(f, "{description}")?;
        } else {
            write!(f, "TransportError({})", self.code)?;
        }
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

macro_rules! errors {
    ($($(#[doc = $doc:literal])* $name:ident = $code:expr;)*) => {
        impl Error {
            $(
                $(#[doc = $doc])*
                pub const $name: Self = Self::new(VarInt::from_u8($code));
            )*

            /// The RFC name of the error code, if it is a defined code
            pub fn description(&self) -> Option<&'static str> {
                match self.code.as_u64() {
                    $(
                        $code => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }
    };
}

errors! {
    /// The connection is being closed abruptly in the absence of any error
    NO_ERROR = 0x0;
    /// The endpoint encountered an internal error and cannot continue
    INTERNAL_ERROR = 0x1;
    /// The server refused to accept a new connection
    CONNECTION_REFUSED = 0x2;
    /// Received more data than permitted in advertised data limits
    FLOW_CONTROL_ERROR = 0x3;
    /// Received a frame for a stream identifier that exceeded the
    /// advertised stream limit for the corresponding stream type
    STREAM_LIMIT_ERROR = 0x4;
    /// Received a frame for a stream that was not in a state that
    /// permitted that frame
    STREAM_STATE_ERROR = 0x5;
    /// Received data which contradicts an established final size
    FINAL_SIZE_ERROR = 0x6;
    /// Received a badly formatted frame
    FRAME_ENCODING_ERROR = 0x7;
    /// Received transport parameters that were badly formatted, absent
    /// when mandatory, forbidden for the sender, or otherwise in error
    TRANSPORT_PARAMETER_ERROR = 0x8;
    /// The peer exceeded the connection ID limit
    CONNECTION_ID_LIMIT_ERROR = 0x9;
    /// An error with protocol compliance that is not covered by more
    /// specific error codes
    PROTOCOL_VIOLATION = 0xa;
    /// Received an invalid Retry token in a client Initial
    INVALID_TOKEN = 0xb;
    /// The application or application protocol caused the connection to
    /// be closed
    APPLICATION_ERROR = 0xc;
    /// Received more data in CRYPTO frames than can be buffered
    CRYPTO_BUFFER_EXCEEDED = 0xd;
    /// Key update error
    KEY_UPDATE_ERROR = 0xe;
    /// The endpoint reached the confidentiality or integrity limit for
    /// the AEAD algorithm
    AEAD_LIMIT_REACHED = 0xf;
    /// No viable network path exists
    NO_VIABLE_PATH = 0x10;
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-4.8
//# A TLS alert is converted into a QUIC connection error.  The
//# AlertDescription value is added to 0x0100 to produce a QUIC error
//# code from the range reserved for CRYPTO_ERROR.
impl Error {
    pub const fn crypto_error(alert: u8) -> Self {
        Self::new(VarInt::from_u16(0x100 + alert as u16))
    }

    /// `true` if the code falls in the CRYPTO_ERROR range
    pub fn is_crypto_error(&self) -> bool {
        (0x100..=0x1ff).contains(&self.code.as_u64())
    }
}

impl From<CryptoError> for Error {
    fn from(error: CryptoError) -> Self {
        Self::crypto_error(error.code).with_reason(error.reason)
    }
}

impl From<DecoderError> for Error {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::InvariantViolation(reason) => {
                Self::FRAME_ENCODING_ERROR.with_reason(reason)
            }
            _ => Self::FRAME_ENCODING_ERROR.with_reason("malformed encoding"),
        }
    }
}

impl From<crate::varint::VarIntError> for Error {
    fn from(_: crate::varint::VarIntError) -> Self {
        Self::FRAME_ENCODING_ERROR.with_reason("varint range exceeded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_test() {
        assert_eq!(Error::FLOW_CONTROL_ERROR.description(), Some("FLOW_CONTROL_ERROR"));
        assert_eq!(Error::new(VarInt::from_u32(0x4242)).description(), None);
    }

    #[test]
    fn crypto_error_test() {
        // handshake_failure alert
        let error = Error::crypto_error(40);
        assert_eq!(error.code.as_u64(), 0x128);
        assert!(error.is_crypto_error());
        assert!(!Error::PROTOCOL_VIOLATION.is_crypto_error());
    }
}
