// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! ring-backed packet protection for the quiver QUIC endpoint.
//!
//! Implements the `quiver-core` crypto traits with AES-128-GCM,
//! AES-256-GCM, and ChaCha20-Poly1305 AEADs, the RFC 9001 key schedule,
//! Initial secrets, 1-RTT key update, and the Retry integrity tag.

pub mod cryptographer;
pub mod header;
pub mod initial;
pub mod key;
pub mod random;
pub mod retry;

pub use cryptographer::Cryptographer;
pub use header::HeaderProtectionKey;
pub use key::PacketKey;

use quiver_core::crypto::{label, tls::CipherSuite, CryptoError};
use ring::{aead, hkdf};
use zeroize::Zeroizing;

/// The AEAD and KDF algorithms selected by a TLS cipher suite
#[derive(Clone, Copy, Debug)]
pub struct Suite {
    pub(crate) aead: &'static aead::Algorithm,
    pub(crate) header: &'static aead::quic::Algorithm,
    pub(crate) hkdf: hkdf::Algorithm,
}

impl Suite {
    pub fn for_cipher_suite(cipher_suite: CipherSuite) -> Self {
        match cipher_suite {
            CipherSuite::TLS_AES_128_GCM_SHA256 => Self {
                aead: &aead::AES_128_GCM,
                header: &aead::quic::AES_128,
                hkdf: hkdf::HKDF_SHA256,
            },
            CipherSuite::TLS_AES_256_GCM_SHA384 => Self {
                aead: &aead::AES_256_GCM,
                header: &aead::quic::AES_256,
                hkdf: hkdf::HKDF_SHA384,
            },
            CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => Self {
                aead: &aead::CHACHA20_POLY1305,
                header: &aead::quic::CHACHA20,
                hkdf: hkdf::HKDF_SHA256,
            },
        }
    }

    #[inline]
    pub fn secret_len(&self) -> usize {
        self.hkdf.hmac_algorithm().digest_algorithm().output_len()
    }
}

/// Arbitrary-length output for `hkdf::Prk::expand`
struct OutputLen(usize);

impl hkdf::KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Expand-Label with an empty context
pub(crate) fn hkdf_expand_label(
    prk: &hkdf::Prk,
    hkdf_label: &[u8],
    output_len: usize,
    out: &mut [u8],
) -> Result<(), CryptoError> {
    debug_assert_eq!(output_len, out.len());
    prk.expand(&[hkdf_label], OutputLen(output_len))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| CryptoError::internal_error().with_reason("hkdf expand failed"))
}

fn expand_label_vec(
    prk: &hkdf::Prk,
    name: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut info = Vec::new();
    label::hkdf_label(output_len, name, &mut info);
    let mut out = Zeroizing::new(vec![0u8; output_len]);
    hkdf_expand_label(prk, &info, output_len, &mut out)?;
    Ok(out)
}

/// Derived sealing/opening material for one direction at one level
pub struct DirectionalKeys {
    pub packet: PacketKey,
    pub header: HeaderProtectionKey,
}

impl DirectionalKeys {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.1
    //# The current encryption level secret and the label "quic key" are
    //# input to the KDF to produce the AEAD key; the label "quic iv" is used
    //# to derive the Initialization Vector (IV); see Section 5.3.  The
    //# header protection key uses the "quic hp" label
    pub fn derive(suite: &Suite, secret: &[u8]) -> Result<Self, CryptoError> {
        let prk = hkdf::Prk::new_less_safe(suite.hkdf, secret);

        let key = expand_label_vec(&prk, label::QUIC_KEY, suite.aead.key_len())?;
        let iv = expand_label_vec(&prk, label::QUIC_IV, key::IV_LEN)?;
        let hp = expand_label_vec(&prk, label::QUIC_HP, suite.header.key_len())?;

        Ok(Self {
            packet: PacketKey::new(suite.aead, &key, &iv)?,
            header: HeaderProtectionKey::new(suite.header, &hp)?,
        })
    }
}

/// Derives the next-generation secret for a key update
//= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
//# The endpoint creates a new write secret from the existing write
//# secret as performed in Section 7.2 of [TLS13].  This uses the KDF
//# function provided by TLS with a label of "quic ku".
pub(crate) fn next_generation_secret(
    suite: &Suite,
    secret: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let prk = hkdf::Prk::new_less_safe(suite.hkdf, secret);
    expand_label_vec(&prk, label::QUIC_KU, suite.secret_len())
}
