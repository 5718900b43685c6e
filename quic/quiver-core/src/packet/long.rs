// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    packet::{Header, LongType, FIXED_BIT},
    varint::VarInt,
};
use quiver_codec::{DecoderBuffer, DecoderError};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# Long Header Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2),
//#   Type-Specific Bits (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Type-Specific Payload (..),
//# }

pub(super) fn parse(datagram: &[u8]) -> Result<(Header, usize), DecoderError> {
    let buffer = DecoderBuffer::new(datagram);
    let (first, buffer) = buffer.decode::<u8>()?;
    let (version, buffer) = buffer.decode::<u32>()?;

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
    //# A Version Negotiation packet is inherently not version specific.
    //# ...  it will be identified as a Version Negotiation packet based on the
    //# Version field having a value of 0.
    if version == 0 {
        let (destination_cid, buffer) = buffer.decode::<ConnectionId>()?;
        let (source_cid, buffer) = buffer.decode::<ConnectionId>()?;
        let versions_offset = datagram.len() - buffer.len();
        let header = Header::VersionNegotiation {
            destination_cid,
            source_cid,
            versions_offset,
        };
        // a Version Negotiation packet consumes the whole datagram
        return Ok((header, datagram.len()));
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Fixed Bit:  The next bit (0x40) of byte 0 is set to 1, unless the
    //#    packet is a Version Negotiation packet.  Packets containing a zero
    //#    value for this bit are not valid packets in this version and MUST
    //#    be discarded.
    if first & FIXED_BIT != FIXED_BIT {
        return Err(DecoderError::InvariantViolation("fixed bit is zero"));
    }

    let long_type = LongType::from_tag(first);
    let (destination_cid, buffer) = buffer.decode::<ConnectionId>()?;
    let (source_cid, buffer) = buffer.decode::<ConnectionId>()?;

    match long_type {
        LongType::Initial => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.2
            //# Initial Packet {
            //#   ...
            //#   Token Length (i),
            //#   Token (..),
            //#   Length (i),
            //#   Packet Number (8..32),
            //#   Packet Payload (8..),
            //# }
            let (token_len, buffer) = buffer.decode::<VarInt>()?;
            let token_len = usize::try_from(token_len)
                .map_err(|_| DecoderError::InvariantViolation("token too long"))?;
            let token_start = datagram.len() - buffer.len();
            let buffer = buffer.skip(token_len)?;
            let token = token_start..token_start + token_len;

            let (pn_offset, packet_len) = finish(datagram, buffer)?;
            Ok((
                Header::Initial {
                    version,
                    destination_cid,
                    source_cid,
                    token,
                    pn_offset,
                },
                packet_len,
            ))
        }
        LongType::ZeroRtt => {
            let (pn_offset, packet_len) = finish(datagram, buffer)?;
            Ok((
                Header::ZeroRtt {
                    version,
                    destination_cid,
                    source_cid,
                    pn_offset,
                },
                packet_len,
            ))
        }
        LongType::Handshake => {
            let (pn_offset, packet_len) = finish(datagram, buffer)?;
            Ok((
                Header::Handshake {
                    version,
                    destination_cid,
                    source_cid,
                    pn_offset,
                },
                packet_len,
            ))
        }
        LongType::Retry => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
            //# Retry Packet {
            //#   ...
            //#   Retry Token (..),
            //#   Retry Integrity Tag (128),
            //# }
            let token_start = datagram.len() - buffer.len();
            let token_end = datagram
                .len()
                .checked_sub(super::retry::INTEGRITY_TAG_LEN)
                .filter(|end| *end >= token_start)
                .ok_or(DecoderError::InvariantViolation("retry packet too short"))?;
            Ok((
                Header::Retry {
                    version,
                    destination_cid,
                    source_cid,
                    token: token_start..token_end,
                },
                // a Retry consumes the whole datagram
                datagram.len(),
            ))
        }
    }
}

/// Reads the Length field and bounds the packet within the datagram,
/// returning the packet-number offset and the packet's total length
fn finish(datagram: &[u8], buffer: DecoderBuffer) -> Result<(usize, usize), DecoderError> {
    let (length, buffer) = buffer.decode::<VarInt>()?;
    let length =
        usize::try_from(length).map_err(|_| DecoderError::InvariantViolation("length too long"))?;
    let pn_offset = datagram.len() - buffer.len();

    // the length must cover at least a 1-byte packet number
    if length == 0 {
        return Err(DecoderError::InvariantViolation("empty packet body"));
    }

    let packet_len = pn_offset
        .checked_add(length)
        .filter(|len| *len <= datagram.len())
        .ok_or(DecoderError::UnexpectedEof(length))?;

    Ok((pn_offset, packet_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_long_header, number::PacketNumberLen};
    use quiver_codec::{Encoder, EncoderBuffer};

    #[test]
    fn initial_parse_test() {
        let dcid = ConnectionId::try_from_slice(&[0xaa; 8]).unwrap();
        let scid = ConnectionId::try_from_slice(&[0xbb; 4]).unwrap();
        let token = [1u8, 2, 3];
        let pn_len = PacketNumberLen::from_packet_tag(0);

        let mut storage = vec![0u8; 128];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let pn_offset = encode_long_header(
            &mut encoder,
            LongType::Initial,
            crate::packet::VERSION_1,
            &dcid,
            &scid,
            Some(&token),
            pn_len,
            1 + 20, // pn + payload
        );
        encoder.write_repeated(21, 0);
        let total = encoder.len();

        let (header, packet_len) = Header::parse(&storage[..total], 0).unwrap();
        assert_eq!(packet_len, total);
        match header {
            Header::Initial {
                version,
                destination_cid,
                source_cid,
                token: token_range,
                pn_offset: parsed_pn_offset,
            } => {
                assert_eq!(version, crate::packet::VERSION_1);
                assert_eq!(destination_cid, dcid);
                assert_eq!(source_cid, scid);
                assert_eq!(&storage[token_range], &token);
                assert_eq!(parsed_pn_offset, pn_offset);
            }
            other => panic!("expected initial, got {other:?}"),
        }
    }

    #[test]
    fn coalesced_length_test() {
        let dcid = ConnectionId::try_from_slice(&[0xaa; 8]).unwrap();
        let scid = ConnectionId::EMPTY;
        let pn_len = PacketNumberLen::from_packet_tag(0);

        let mut storage = vec![0u8; 128];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encode_long_header(
            &mut encoder,
            LongType::Handshake,
            crate::packet::VERSION_1,
            &dcid,
            &scid,
            None,
            pn_len,
            1 + 10,
        );
        encoder.write_repeated(11, 0);
        let first_len = encoder.len();
        // trailing bytes belong to the next coalesced packet
        encoder.write_repeated(30, 0xff);
        let total = encoder.len();

        let (_, packet_len) = Header::parse(&storage[..total], 0).unwrap();
        assert_eq!(packet_len, first_len);
    }

    #[test]
    fn truncated_length_test() {
        let dcid = ConnectionId::try_from_slice(&[0xaa; 8]).unwrap();
        let pn_len = PacketNumberLen::from_packet_tag(0);

        let mut storage = vec![0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encode_long_header(
            &mut encoder,
            LongType::Handshake,
            crate::packet::VERSION_1,
            &dcid,
            &ConnectionId::EMPTY,
            None,
            pn_len,
            100, // claims more bytes than the datagram holds
        );
        encoder.write_repeated(5, 0);
        let total = encoder.len();

        assert!(Header::parse(&storage[..total], 0).is_err());
    }
}
