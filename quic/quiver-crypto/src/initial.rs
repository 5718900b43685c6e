// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{DirectionalKeys, Suite};
use quiver_core::crypto::{label, tls::CipherSuite, CryptoError};
use ring::hkdf;

/// The sealing and opening keys for the Initial encryption level.
///
/// Both sides derive identical material from the client's first
/// Destination Connection ID, so Initial packets are protected before any
/// TLS secrets exist.
pub struct InitialKeys {
    pub client: DirectionalKeys,
    pub server: DirectionalKeys,
}

impl InitialKeys {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
    //# initial_secret = HKDF-Extract(initial_salt,
    //#                               client_dst_connection_id)
    //#
    //# client_initial_secret = HKDF-Expand-Label(initial_secret,
    //#                                           "client in", "",
    //#                                           Hash.length)
    //# server_initial_secret = HKDF-Expand-Label(initial_secret,
    //#                                           "server in", "",
    //#                                           Hash.length)
    pub fn derive(client_destination_cid: &[u8]) -> Result<Self, CryptoError> {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
        //# Initial packets use AEAD_AES_128_GCM with keys derived from the
        //# Destination Connection ID field of the first Initial packet sent
        //# by the client
        let suite = Suite::for_cipher_suite(CipherSuite::TLS_AES_128_GCM_SHA256);

        let salt = hkdf::Salt::new(suite.hkdf, &label::INITIAL_SALT);
        let initial_secret = salt.extract(client_destination_cid);

        let client_secret = expand_initial(&initial_secret, label::CLIENT_IN, &suite)?;
        let server_secret = expand_initial(&initial_secret, label::SERVER_IN, &suite)?;

        Ok(Self {
            client: DirectionalKeys::derive(&suite, &client_secret)?,
            server: DirectionalKeys::derive(&suite, &server_secret)?,
        })
    }
}

fn expand_initial(
    prk: &hkdf::Prk,
    name: &[u8],
    suite: &Suite,
) -> Result<zeroize::Zeroizing<Vec<u8>>, CryptoError> {
    let mut info = Vec::new();
    label::hkdf_label(suite.secret_len(), name, &mut info);
    let mut out = zeroize::Zeroizing::new(vec![0u8; suite.secret_len()]);
    crate::hkdf_expand_label(prk, &info, suite.secret_len(), &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use quiver_core::{
        crypto::{HeaderKey, Key},
        packet::number::{PacketNumberLen, PacketNumberSpace, TruncatedPacketNumber},
        varint::VarInt,
    };

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //= type=test
    //# These packets use an 8-byte client-chosen Destination Connection ID
    //# of 0x8394c8f03e515708.
    const EXAMPLE_DCID: [u8; 8] = hex!("8394c8f03e515708");

    #[test]
    fn rfc_client_initial_protection_test() {
        let keys = InitialKeys::derive(&EXAMPLE_DCID).unwrap();

        //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.2
        //= type=test
        //# The unprotected header indicates a length of 1182 bytes: the 4-byte
        //# packet number, 1162 bytes of frames, and the 16-byte authentication
        //# tag.  The header includes the connection ID and a packet number of 2:
        //#
        //# c300000001088394c8f03e5157080000449e00000002
        let header = hex!("c300000001088394c8f03e5157080000449e00000002");

        // CRYPTO frame with the ClientHello, padded to 1162 bytes
        let mut payload = Vec::new();
        payload.extend_from_slice(&hex!(
            "060040f1010000ed0303ebf8fa56f129 39b9584a3896472ec40bb863cfd3e868"
        ));
        payload.resize(1162, 0);
        let plaintext = payload.clone();

        payload.resize(1162 + 16, 0);
        keys.client
            .packet
            .encrypt(2, &header, &mut payload)
            .unwrap();

        //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.2
        //= type=test
        //# The ciphertext begins with the following 64 bytes:
        //# d1b1c98dd7689fb8ec11d242b123dc9b
        assert_eq!(&payload[..16], &hex!("d1b1c98dd7689fb8ec11d242b123dc9b"));

        // the server opens it with the client-direction keys
        let len = keys.server.packet.decrypt(2, &header, &mut payload).unwrap();
        assert_eq!(&payload[..len], &plaintext[..]);
    }

    #[test]
    fn rfc_header_protection_sample_test() {
        let keys = InitialKeys::derive(&EXAMPLE_DCID).unwrap();

        //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.2
        //= type=test
        //# The header protection mask is computed from a sample of the
        //# ciphertext: sample = d1b1c98dd7689fb8ec11d242b123dc9b
        //# mask = HeaderProtection(hp, sample) = 437b9aec36
        let sample = hex!("d1b1c98dd7689fb8ec11d242b123dc9b");
        let mask = keys.client.header.protection_mask(&sample);
        assert_eq!(&mask, &hex!("437b9aec36"));
    }

    #[test]
    fn deterministic_derivation_test() {
        // both endpoints derive identical initial keys from the same DCID
        let a = InitialKeys::derive(&EXAMPLE_DCID).unwrap();
        let b = InitialKeys::derive(&EXAMPLE_DCID).unwrap();

        let header = [0xc0u8];
        let mut payload = vec![0u8; 8 + a.client.packet.tag_len()];
        a.client.packet.encrypt(0, &header, &mut payload).unwrap();
        b.server.packet.decrypt(0, &header, &mut payload).unwrap();
    }

    #[test]
    fn truncated_pn_helper_sanity_test() {
        // the RFC header above carries a 4-byte packet number of 2
        let space = PacketNumberSpace::Initial;
        let truncated = TruncatedPacketNumber::new(space, 2, PacketNumberLen::from_packet_tag(0x03));
        let zero = space.new_packet_number(VarInt::ZERO);
        assert_eq!(truncated.expand(zero).as_u64(), 2);
    }
}
