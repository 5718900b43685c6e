// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::crypto::{CryptoError, HeaderKey, HeaderProtectionMask};
use ring::aead::quic;

/// Header protection for one direction at one level.
///
/// The mask is derived by encrypting a 16-byte ciphertext sample with the
/// header protection key (AES-ECB for the AES suites, a ChaCha20 block
/// for ChaCha20-Poly1305); ring packages both behind `aead::quic`.
pub struct HeaderProtectionKey {
    key: quic::HeaderProtectionKey,
}

impl core::fmt::Debug for HeaderProtectionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("HeaderProtectionKey").finish_non_exhaustive()
    }
}

impl HeaderProtectionKey {
    pub(crate) fn new(
        algorithm: &'static quic::Algorithm,
        key: &[u8],
    ) -> Result<Self, CryptoError> {
        let key = quic::HeaderProtectionKey::new(algorithm, key)
            .map_err(|_| CryptoError::internal_error().with_reason("invalid hp key length"))?;
        Ok(Self { key })
    }
}

impl HeaderKey for HeaderProtectionKey {
    #[inline]
    fn protection_mask(&self, sample: &[u8]) -> HeaderProtectionMask {
        self.key.new_mask(sample).unwrap_or_default()
    }
}
