// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::crypto::{CryptoError, Key};
use ring::aead;
use zeroize::Zeroize;

pub(crate) const IV_LEN: usize = 12;

/// An AEAD packet protection key for one direction.
///
/// Nonces are formed per RFC 9001 §5.3: the 62-bit packet number in
/// network byte order, left-padded to the IV length and XORed with the IV.
pub struct PacketKey {
    key: aead::LessSafeKey,
    iv: [u8; IV_LEN],
}

impl core::fmt::Debug for PacketKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        // never print key material
        f.debug_struct("PacketKey").finish_non_exhaustive()
    }
}

impl Drop for PacketKey {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl PacketKey {
    pub(crate) fn new(
        algorithm: &'static aead::Algorithm,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Self, CryptoError> {
        let key = aead::UnboundKey::new(algorithm, key)
            .map_err(|_| CryptoError::internal_error().with_reason("invalid aead key length"))?;
        let mut iv_bytes = [0u8; IV_LEN];
        iv_bytes.copy_from_slice(iv);
        Ok(Self {
            key: aead::LessSafeKey::new(key),
            iv: iv_bytes,
        })
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The nonce, N, is formed by combining the packet
    //# protection IV with the packet number.  The 62 bits of the
    //# reconstructed QUIC packet number in network byte order are left-
    //# padded with zeros to the size of the IV.  The exclusive OR of the
    //# padded packet number and the IV forms the AEAD nonce.
    #[inline]
    fn nonce(&self, packet_number: u64) -> aead::Nonce {
        let mut nonce = self.iv;
        for (nonce_byte, pn_byte) in nonce[IV_LEN - 8..]
            .iter_mut()
            .zip(packet_number.to_be_bytes())
        {
            *nonce_byte ^= pn_byte;
        }
        aead::Nonce::assume_unique_for_key(nonce)
    }
}

impl Key for PacketKey {
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, CryptoError> {
        let nonce = self.nonce(packet_number);
        let plaintext = self
            .key
            .open_in_place(nonce, aead::Aad::from(header), payload)
            .map_err(|_| CryptoError::decrypt_error())?;
        Ok(plaintext.len())
    }

    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), CryptoError> {
        let tag_len = self.tag_len();
        let plaintext_len = payload
            .len()
            .checked_sub(tag_len)
            .ok_or_else(|| CryptoError::internal_error().with_reason("missing tag space"))?;

        let nonce = self.nonce(packet_number);
        let (plaintext, tag_space) = payload.split_at_mut(plaintext_len);
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, aead::Aad::from(header), plaintext)
            .map_err(|_| CryptoError::internal_error().with_reason("seal failed"))?;
        tag_space.copy_from_slice(tag.as_ref());
        Ok(())
    }

    #[inline]
    fn tag_len(&self) -> usize {
        self.key.algorithm().tag_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Suite;
    use quiver_core::crypto::tls::CipherSuite;

    fn key_pair() -> PacketKey {
        let suite = Suite::for_cipher_suite(CipherSuite::TLS_AES_128_GCM_SHA256);
        PacketKey::new(suite.aead, &[0x42; 16], &[0x24; IV_LEN]).unwrap()
    }

    #[test]
    fn round_trip_test() {
        let key = key_pair();
        let header = [1u8, 2, 3];
        let mut payload = Vec::from(&b"protected bits"[..]);
        let plaintext_len = payload.len();
        payload.resize(plaintext_len + key.tag_len(), 0);

        key.encrypt(7, &header, &mut payload).unwrap();
        assert_ne!(&payload[..plaintext_len], b"protected bits");

        let len = key.decrypt(7, &header, &mut payload).unwrap();
        assert_eq!(len, plaintext_len);
        assert_eq!(&payload[..len], b"protected bits");
    }

    #[test]
    fn bit_flip_test() {
        let key = key_pair();
        let header = [0u8; 4];
        let mut payload = vec![0u8; 32 + key.tag_len()];
        key.encrypt(1, &header, &mut payload).unwrap();

        // each flipped ciphertext bit must fail authentication
        for index in [0, 13, 31] {
            let mut corrupted = payload.clone();
            corrupted[index] ^= 0x01;
            assert_eq!(
                key.decrypt(1, &header, &mut corrupted).unwrap_err(),
                CryptoError::decrypt_error()
            );
        }

        // a different packet number changes the nonce and must fail
        let mut reused = payload.clone();
        assert!(key.decrypt(2, &header, &mut reused).is_err());
    }
}
