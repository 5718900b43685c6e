// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::connection::ConnectionId;
use quiver_codec::{Encoder, EncoderBuffer};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# A server sends a Version Negotiation packet in response to each packet
//# that might initiate a new connection; see Section 5.2 for details.

/// Iterates the supported-version list of a Version Negotiation packet
pub fn supported_versions(packet: &[u8], versions_offset: usize) -> impl Iterator<Item = u32> + '_ {
    packet
        .get(versions_offset..)
        .unwrap_or_default()
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Encodes a Version Negotiation packet.
///
/// The connection IDs echo the triggering packet, swapped.
//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# The server MUST include the value from the Source Connection ID field
//# of the packet it receives in the Destination Connection ID field.
pub fn encode(
    encoder: &mut EncoderBuffer,
    destination_cid: &ConnectionId,
    source_cid: &ConnectionId,
    versions: &[u32],
    random_first_byte: u8,
) {
    // the form bit must be set; everything else in the first byte is
    // unused and SHOULD be unpredictable
    encoder.encode(&(random_first_byte | super::FORM_BIT));
    encoder.encode(&0u32);
    encoder.encode(&(destination_cid.len() as u8));
    encoder.encode(destination_cid);
    encoder.encode(&(source_cid.len() as u8));
    encoder.encode(source_cid);
    for version in versions {
        encoder.encode(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Header;

    #[test]
    fn round_trip_test() {
        let dcid = ConnectionId::try_from_slice(&[1; 4]).unwrap();
        let scid = ConnectionId::try_from_slice(&[2; 8]).unwrap();

        let mut storage = vec![0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encode(&mut encoder, &dcid, &scid, &[crate::packet::VERSION_1], 0x1b);
        let total = encoder.len();

        let (header, len) = Header::parse(&storage[..total], 0).unwrap();
        assert_eq!(len, total);
        match header {
            Header::VersionNegotiation {
                destination_cid,
                source_cid,
                versions_offset,
            } => {
                assert_eq!(destination_cid, dcid);
                assert_eq!(source_cid, scid);
                let versions: Vec<_> =
                    supported_versions(&storage[..total], versions_offset).collect();
                assert_eq!(versions, vec![crate::packet::VERSION_1]);
            }
            other => panic!("expected version negotiation, got {other:?}"),
        }
    }
}
