// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HKDF-Expand-Label plumbing shared by every key-derivation site.

use hex_literal::hex;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a

pub const INITIAL_SALT: [u8; 20] = hex!("38762cf7f55934b34d179ae6a4c80cadccbb7f0a");

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)

pub const CLIENT_IN: &[u8] = b"client in";
pub const SERVER_IN: &[u8] = b"server in";

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.1
//# The current encryption level secret and the label "quic key" are
//# input to the KDF to produce the AEAD key; the label "quic iv" is used
//# to derive the Initialization Vector (IV); see Section 5.3.  The
//# header protection key uses the "quic hp" label; see Section 5.4.

pub const QUIC_KEY: &[u8] = b"quic key";
pub const QUIC_IV: &[u8] = b"quic iv";
pub const QUIC_HP: &[u8] = b"quic hp";

//= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
//# The endpoint creates a new write secret from the existing write
//# secret as performed in Section 7.2 of [TLS13].  This uses the KDF
//# function provided by TLS with a label of "quic ku".

pub const QUIC_KU: &[u8] = b"quic ku";

/// Builds the serialized `HkdfLabel` structure for HKDF-Expand-Label
/// (RFC 8446 §7.1) with an empty context
pub fn hkdf_label(output_len: usize, label: &[u8], out: &mut Vec<u8>) {
    const TLS_PREFIX: &[u8] = b"tls13 ";
    let label_len = TLS_PREFIX.len() + label.len();
    debug_assert!(label_len <= u8::MAX as usize, "label is too long");

    out.extend_from_slice(&(output_len as u16).to_be_bytes());
    out.push(label_len as u8);
    out.extend_from_slice(TLS_PREFIX);
    out.extend_from_slice(label);
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_vec(len: usize, label: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        hkdf_label(len, label, &mut out);
        out
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //= type=test
    //# client in:  00200f746c73313320636c69656e7420696e00
    //# quic key:  00100e746c7331332071756963206b657900
    //# quic iv:  000c0d746c733133207175696320697600
    //# quic hp:  00100d746c733133207175696320687000
    #[test]
    fn rfc_vectors_test() {
        assert_eq!(
            label_vec(32, CLIENT_IN),
            hex!("00200f746c73313320636c69656e7420696e00")
        );
        assert_eq!(
            label_vec(32, SERVER_IN),
            hex!("00200f746c7331332073657276657220696e00")
        );
        assert_eq!(
            label_vec(16, QUIC_KEY),
            hex!("00100e746c7331332071756963206b657900")
        );
        assert_eq!(label_vec(12, QUIC_IV), hex!("000c0d746c733133207175696320697600"));
        assert_eq!(label_vec(16, QUIC_HP), hex!("00100d746c733133207175696320687000"));
    }
}
