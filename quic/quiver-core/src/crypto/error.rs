// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use quiver_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc8446#section-6
//# enum { ... decode_error(50), decrypt_error(51), ...
//#        missing_extension(109), ... } AlertDescription;

pub const HANDSHAKE_FAILURE: u8 = 40;
pub const DECODE_ERROR: u8 = 50;
pub const DECRYPT_ERROR: u8 = 51;
pub const INTERNAL_ERROR: u8 = 80;
pub const MISSING_EXTENSION: u8 = 109;

/// A TLS-alert-shaped crypto error.
///
/// `code` is the TLS alert description; the transport maps it into the
/// CRYPTO_ERROR range (0x100 + code) when closing the connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct CryptoError {
    pub code: u8,
    pub reason: &'static str,
}

impl CryptoError {
    pub const fn new(code: u8) -> Self {
        Self { code, reason: "" }
    }

    pub const fn decrypt_error() -> Self {
        Self::new(DECRYPT_ERROR)
    }

    pub const fn decode_error() -> Self {
        Self::new(DECODE_ERROR)
    }

    pub const fn handshake_failure() -> Self {
        Self::new(HANDSHAKE_FAILURE)
    }

    pub const fn internal_error() -> Self {
        Self::new(INTERNAL_ERROR)
    }

    pub const fn missing_extension() -> Self {
        Self::new(MISSING_EXTENSION)
    }

    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CryptoError(alert {})", self.code)?;
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for CryptoError {}

impl From<DecoderError> for CryptoError {
    fn from(_: DecoderError) -> Self {
        Self::decode_error()
    }
}
