// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::packet::retry::{RetryTagger, INTEGRITY_TAG_LEN, NONCE, SECRET_KEY};
use ring::aead;

/// Computes Retry integrity tags with the fixed RFC 9001 §5.8 key.
///
/// The tag is the AEAD output for an empty plaintext with the Retry
/// pseudo-packet as associated data.
pub struct RingRetryTagger {
    key: aead::LessSafeKey,
}

impl Default for RingRetryTagger {
    fn default() -> Self {
        let key = aead::UnboundKey::new(&aead::AES_128_GCM, &SECRET_KEY)
            .expect("retry key length is fixed");
        Self {
            key: aead::LessSafeKey::new(key),
        }
    }
}

impl RetryTagger for RingRetryTagger {
    fn tag(&self, pseudo_packet: &[u8]) -> [u8; INTEGRITY_TAG_LEN] {
        let nonce = aead::Nonce::assume_unique_for_key(NONCE);
        let mut empty: [u8; 0] = [];
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, aead::Aad::from(pseudo_packet), &mut empty)
            .expect("sealing an empty payload cannot fail");

        let mut out = [0u8; INTEGRITY_TAG_LEN];
        out.copy_from_slice(tag.as_ref());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use quiver_core::{connection::ConnectionId, packet::retry};

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.4
    //= type=test
    //# This shows a Retry packet that might be sent in response to the
    //# Initial packet in Appendix A.2.  The integrity check includes the
    //# client-chosen connection ID value of 0x8394c8f03e515708, but that
    //# value is not included in the final Retry packet:
    //#
    //# ff000000010008f067a5502a4262b574 6f6b656e04a265ba2eff4d829058fb3f
    //# 0f2496ba
    #[test]
    fn rfc_retry_vector_test() {
        let packet = hex!(
            "ff000000010008f067a5502a4262b574 6f6b656e04a265ba2eff4d829058fb3f 0f2496ba"
        );
        let odcid = ConnectionId::try_from_slice(&hex!("8394c8f03e515708")).unwrap();
        let tagger = RingRetryTagger::default();

        assert!(retry::validate(&odcid, &packet, &tagger));

        // flipping any bit invalidates the tag
        let mut corrupted = packet;
        corrupted[9] ^= 0x40;
        assert!(!retry::validate(&odcid, &corrupted, &tagger));
    }

    #[test]
    fn encode_validate_round_trip_test() {
        let odcid = ConnectionId::try_from_slice(&[0xaa; 8]).unwrap();
        let dcid = ConnectionId::try_from_slice(&[1; 4]).unwrap();
        let scid = ConnectionId::try_from_slice(&[2; 8]).unwrap();
        let tagger = RingRetryTagger::default();

        let mut storage = vec![0u8; 128];
        let mut encoder = quiver_codec::EncoderBuffer::new(&mut storage);
        retry::encode(
            &mut encoder,
            quiver_core::packet::VERSION_1,
            &dcid,
            &scid,
            &odcid,
            b"token",
            &tagger,
        );
        let len = quiver_codec::Encoder::len(&encoder);

        assert!(retry::validate(&odcid, &storage[..len], &tagger));
        // a different original DCID must not validate
        let other = ConnectionId::try_from_slice(&[0xbb; 8]).unwrap();
        assert!(!retry::validate(&other, &storage[..len], &tagger));
    }
}
