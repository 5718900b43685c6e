// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::ConnectionId, packet::LongType};
use hex_literal::hex;
use quiver_codec::{Encoder, EncoderBuffer};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# The Retry Integrity Tag is a 128-bit field that is computed as the
//# output of AEAD_AES_128_GCM [AEAD] used with the following inputs:

pub const INTEGRITY_TAG_LEN: usize = 16;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# *  The secret key, K, is 128 bits equal to
//#    0xbe0c690b9f66575a1d766b54e368c84e.
pub const SECRET_KEY: [u8; 16] = hex!("be0c690b9f66575a1d766b54e368c84e");

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# *  The nonce, N, is 96 bits equal to 0x461599d35d632bf2239825bb.
pub const NONCE: [u8; 12] = hex!("461599d35d632bf2239825bb");

/// Computes the AEAD key and nonce for a given integrity-tag
/// implementation. The tag itself is produced in `quiver-crypto`, which
/// owns the AEAD.
pub trait RetryTagger: Send {
    /// Seals the pseudo-packet, returning the 16-byte tag
    fn tag(&self, pseudo_packet: &[u8]) -> [u8; INTEGRITY_TAG_LEN];
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# Retry Pseudo-Packet {
//#   ODCID Length (8),
//#   Original Destination Connection ID (0..160),
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2) = 3,
//#   Unused (4),
//#   Version (32),
//#   ...
/// Builds the pseudo-packet over which the integrity tag is computed:
/// the original destination connection ID, length-prefixed, followed by
/// the Retry packet bytes up to (excluding) the tag.
pub fn pseudo_packet(original_destination_cid: &ConnectionId, retry_packet: &[u8]) -> Vec<u8> {
    let body = retry_packet
        .len()
        .checked_sub(INTEGRITY_TAG_LEN)
        .map(|end| &retry_packet[..end])
        .unwrap_or(retry_packet);

    let mut pseudo = Vec::with_capacity(1 + original_destination_cid.len() + body.len());
    pseudo.push(original_destination_cid.len() as u8);
    pseudo.extend_from_slice(original_destination_cid.as_bytes());
    pseudo.extend_from_slice(body);
    pseudo
}

/// Encodes a Retry packet including its integrity tag
pub fn encode(
    encoder: &mut EncoderBuffer,
    version: u32,
    destination_cid: &ConnectionId,
    source_cid: &ConnectionId,
    original_destination_cid: &ConnectionId,
    token: &[u8],
    tagger: &dyn RetryTagger,
) {
    debug_assert!(!token.is_empty());

    let start = encoder.len();
    let first =
        super::FORM_BIT | super::FIXED_BIT | LongType::Retry.into_tag_bits() | 0b0000;
    encoder.encode(&first);
    encoder.encode(&version);
    encoder.encode(&(destination_cid.len() as u8));
    encoder.encode(destination_cid);
    encoder.encode(&(source_cid.len() as u8));
    encoder.encode(source_cid);
    encoder.write_slice(token);

    let end = encoder.len();
    let pseudo = {
        let packet = &encoder.as_mut_slice()[start..end];
        pseudo_packet(original_destination_cid, packet)
    };
    encoder.set_position(end);
    let tag = tagger.tag(&pseudo);
    encoder.write_slice(&tag);
}

/// Validates the integrity tag of a received Retry packet
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# Clients MUST discard Retry packets that have a Retry Integrity Tag
//# that cannot be validated
pub fn validate(
    original_destination_cid: &ConnectionId,
    retry_packet: &[u8],
    tagger: &dyn RetryTagger,
) -> bool {
    if retry_packet.len() < INTEGRITY_TAG_LEN {
        return false;
    }
    let pseudo = pseudo_packet(original_destination_cid, retry_packet);
    let expected = tagger.tag(&pseudo);
    let actual = &retry_packet[retry_packet.len() - INTEGRITY_TAG_LEN..];

    use subtle::ConstantTimeEq;
    expected.ct_eq(actual).into()
}
