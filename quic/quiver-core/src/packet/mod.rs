// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet headers, datagram splitting, and packet protection.
//!
//! Parsing is split into two stages so that coalesced datagrams can be
//! walked without any cryptography: [`Header::parse`] reads the invariant
//! header fields and the packet's total length, and the
//! [`unprotect`]/[`decrypt`] pair then operates in place on exactly one
//! packet's bytes. Failure of either stage affects only that packet;
//! trailing packets in the same datagram are preserved.

pub mod number;

pub mod long;
pub mod retry;
pub mod short;
pub mod version_negotiation;

use crate::{
    connection::ConnectionId,
    crypto::{CryptoError, HeaderKey, Key},
    packet::number::{PacketNumber, PacketNumberLen, PacketNumberSpace, TruncatedPacketNumber},
    varint::VarInt,
};
use quiver_codec::{DecoderBuffer, DecoderError, Encoder, EncoderBuffer, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-15
//# Version 1 of QUIC uses the TLS handshake
pub const VERSION_1: u32 = 0x0000_0001;

//= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
//# A client MUST expand the payload of all UDP datagrams carrying
//# Initial packets to at least the smallest allowed maximum datagram
//# size of 1200 bytes
pub const MIN_INITIAL_DATAGRAM_LEN: usize = 1200;

const FORM_BIT: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;
const LONG_TYPE_MASK: u8 = 0x30;
const KEY_PHASE_BIT: u8 = 0x04;

/// Low first-byte bits covered by header protection
const LONG_PROTECTED_BITS: u8 = 0x0f;
const SHORT_PROTECTED_BITS: u8 = 0x1f;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LongType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl LongType {
    #[inline]
    fn from_tag(tag: u8) -> Self {
        match (tag & LONG_TYPE_MASK) >> 4 {
            0b00 => Self::Initial,
            0b01 => Self::ZeroRtt,
            0b10 => Self::Handshake,
            _ => Self::Retry,
        }
    }

    #[inline]
    pub fn into_tag_bits(self) -> u8 {
        let bits = match self {
            Self::Initial => 0b00,
            Self::ZeroRtt => 0b01,
            Self::Handshake => 0b10,
            Self::Retry => 0b11,
        };
        bits << 4
    }

    #[inline]
    pub fn encryption_level(self) -> Option<crate::crypto::EncryptionLevel> {
        match self {
            Self::Initial => Some(crate::crypto::EncryptionLevel::Initial),
            Self::ZeroRtt => Some(crate::crypto::EncryptionLevel::ZeroRtt),
            Self::Handshake => Some(crate::crypto::EncryptionLevel::Handshake),
            Self::Retry => None,
        }
    }
}

/// The parsed invariant portion of one packet.
///
/// Byte positions (`pn_offset`, token bounds) index into the packet's own
/// slice so the caller can hand the exact bytes to the crypto stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Header {
    Initial {
        version: u32,
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        /// Token byte range within the packet
        token: core::ops::Range<usize>,
        pn_offset: usize,
    },
    ZeroRtt {
        version: u32,
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        pn_offset: usize,
    },
    Handshake {
        version: u32,
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        pn_offset: usize,
    },
    Retry {
        version: u32,
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        /// Token byte range; the final 16 bytes of the packet are the
        /// integrity tag and are excluded
        token: core::ops::Range<usize>,
    },
    VersionNegotiation {
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        /// Offset of the supported version list
        versions_offset: usize,
    },
    Short {
        destination_cid: ConnectionId,
        pn_offset: usize,
    },
}

impl Header {
    #[inline]
    pub fn destination_cid(&self) -> &ConnectionId {
        match self {
            Header::Initial {
                destination_cid, ..
            }
            | Header::ZeroRtt {
                destination_cid, ..
            }
            | Header::Handshake {
                destination_cid, ..
            }
            | Header::Retry {
                destination_cid, ..
            }
            | Header::VersionNegotiation {
                destination_cid, ..
            }
            | Header::Short {
                destination_cid, ..
            } => destination_cid,
        }
    }

    #[inline]
    pub fn source_cid(&self) -> Option<&ConnectionId> {
        match self {
            Header::Initial { source_cid, .. }
            | Header::ZeroRtt { source_cid, .. }
            | Header::Handshake { source_cid, .. }
            | Header::Retry { source_cid, .. }
            | Header::VersionNegotiation { source_cid, .. } => Some(source_cid),
            Header::Short { .. } => None,
        }
    }

    #[inline]
    pub fn encryption_level(&self) -> Option<crate::crypto::EncryptionLevel> {
        match self {
            Header::Initial { .. } => Some(crate::crypto::EncryptionLevel::Initial),
            Header::ZeroRtt { .. } => Some(crate::crypto::EncryptionLevel::ZeroRtt),
            Header::Handshake { .. } => Some(crate::crypto::EncryptionLevel::Handshake),
            Header::Short { .. } => Some(crate::crypto::EncryptionLevel::OneRtt),
            Header::Retry { .. } | Header::VersionNegotiation { .. } => None,
        }
    }

    #[inline]
    pub fn pn_offset(&self) -> Option<usize> {
        match self {
            Header::Initial { pn_offset, .. }
            | Header::ZeroRtt { pn_offset, .. }
            | Header::Handshake { pn_offset, .. }
            | Header::Short { pn_offset, .. } => Some(*pn_offset),
            _ => None,
        }
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        !matches!(self, Header::Short { .. })
    }

    /// Parses one packet at the start of `datagram`.
    ///
    /// Returns the header and the packet's total length; any remaining
    /// datagram bytes after that length are coalesced packets.
    ///
    /// `short_dcid_len` supplies the length of locally-issued connection
    /// IDs, since short headers do not carry one on the wire.
    pub fn parse(datagram: &[u8], short_dcid_len: usize) -> Result<(Self, usize), DecoderError> {
        let buffer = DecoderBuffer::new(datagram);
        let (first, _) = buffer.decode::<u8>()?;

        if first & FORM_BIT == 0 {
            return short::parse(datagram, short_dcid_len);
        }

        long::parse(datagram)
    }
}

/// Removes header protection in place, returning the now-cleartext first
/// byte and the decoded truncated packet number.
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# Header protection is applied after packet protection is applied (see
//# Section 5.3).  The ciphertext of the packet is sampled and used as
//# input to an encryption algorithm.
pub fn unprotect<H: HeaderKey + ?Sized>(
    header_key: &H,
    space: PacketNumberSpace,
    packet: &mut [u8],
    pn_offset: usize,
) -> Result<(u8, TruncatedPacketNumber), CryptoError> {
    let sample_len = header_key.sample_len();

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
    //# in sampling packet ciphertext for header protection, the Packet Number field is
    //# assumed to be 4 bytes long
    let sample_start = pn_offset
        .checked_add(4)
        .ok_or_else(CryptoError::decrypt_error)?;
    let sample = packet
        .get(sample_start..sample_start + sample_len)
        .ok_or_else(CryptoError::decrypt_error)?;

    let mask = header_key.protection_mask(sample);

    let protected_bits = if packet[0] & FORM_BIT == FORM_BIT {
        LONG_PROTECTED_BITS
    } else {
        SHORT_PROTECTED_BITS
    };
    let first = packet[0] ^ (mask[0] & protected_bits);
    let pn_len = PacketNumberLen::from_packet_tag(first);

    let pn_bytes = packet
        .get_mut(pn_offset..pn_offset + pn_len.bytesize())
        .ok_or_else(CryptoError::decrypt_error)?;
    for (byte, mask_byte) in pn_bytes.iter_mut().zip(&mask[1..]) {
        *byte ^= mask_byte;
    }
    packet[0] = first;

    let (truncated, _) =
        TruncatedPacketNumber::decode(space, pn_len, DecoderBuffer::new(&packet[pn_offset..]))
            .map_err(|_| CryptoError::decrypt_error())?;

    Ok((first, truncated))
}

/// Opens the packet payload in place after [`unprotect`], returning the
/// full packet number and the payload bounds within `packet`.
pub fn decrypt<K: Key + ?Sized>(
    key: &K,
    packet: &mut [u8],
    pn_offset: usize,
    truncated: TruncatedPacketNumber,
    largest_acknowledged: PacketNumber,
) -> Result<(PacketNumber, core::ops::Range<usize>), CryptoError> {
    let packet_number = truncated.expand(largest_acknowledged);
    let payload_offset = pn_offset + truncated.len().bytesize();

    let (header, payload) = packet.split_at_mut(payload_offset);
    let payload_len = key.decrypt(packet_number.as_u64(), header, payload)?;

    Ok((packet_number, payload_offset..payload_offset + payload_len))
}

/// Applies packet protection to a fully-encoded cleartext packet:
/// AEAD-seals the payload (whose final `tag_len` bytes are reserved for
/// the tag) and then masks the header.
pub fn seal<K: Key + ?Sized, H: HeaderKey + ?Sized>(
    key: &K,
    header_key: &H,
    packet: &mut [u8],
    pn_offset: usize,
    pn_len: PacketNumberLen,
    packet_number: PacketNumber,
) -> Result<(), CryptoError> {
    let payload_offset = pn_offset + pn_len.bytesize();
    let (header, payload) = packet.split_at_mut(payload_offset);
    key.encrypt(packet_number.as_u64(), header, payload)?;

    let sample_start = pn_offset + 4;
    let sample = packet
        .get(sample_start..sample_start + header_key.sample_len())
        .ok_or_else(CryptoError::internal_error)?;
    let mask = header_key.protection_mask(sample);

    let protected_bits = if packet[0] & FORM_BIT == FORM_BIT {
        LONG_PROTECTED_BITS
    } else {
        SHORT_PROTECTED_BITS
    };
    packet[0] ^= mask[0] & protected_bits;
    for (byte, mask_byte) in packet[pn_offset..payload_offset].iter_mut().zip(&mask[1..]) {
        *byte ^= mask_byte;
    }

    Ok(())
}

/// Encodes a long packet header, leaving the caller to append the packet
/// number and payload. Returns the packet-number offset.
///
/// `remaining_len` must be the final value of the Length field: packet
/// number length plus payload length plus AEAD tag length.
#[allow(clippy::too_many_arguments)]
pub fn encode_long_header(
    encoder: &mut EncoderBuffer,
    long_type: LongType,
    version: u32,
    destination_cid: &ConnectionId,
    source_cid: &ConnectionId,
    token: Option<&[u8]>,
    pn_len: PacketNumberLen,
    remaining_len: usize,
) -> usize {
    debug_assert_eq!(long_type == LongType::Initial, token.is_some());

    let first = FORM_BIT | FIXED_BIT | long_type.into_tag_bits() | pn_len.into_packet_tag_mask();
    encoder.encode(&first);
    encoder.encode(&version);
    encoder.encode(&(destination_cid.len() as u8));
    encoder.encode(destination_cid);
    encoder.encode(&(source_cid.len() as u8));
    encoder.encode(source_cid);

    if let Some(token) = token {
        encoder.encode_with_len_prefix::<VarInt, _>(&token);
    }

    encoder.encode(&VarInt::try_from(remaining_len).unwrap_or(VarInt::MAX));
    encoder.len()
}

/// Encodes a short (1-RTT) packet header. Returns the packet-number
/// offset.
pub fn encode_short_header(
    encoder: &mut EncoderBuffer,
    destination_cid: &ConnectionId,
    key_phase: bool,
    pn_len: PacketNumberLen,
) -> usize {
    let mut first = FIXED_BIT | pn_len.into_packet_tag_mask();
    if key_phase {
        first |= KEY_PHASE_BIT;
    }
    encoder.encode(&first);
    encoder.encode(destination_cid);
    encoder.len()
}

/// Reads the key-phase bit out of an unprotected short-header first byte
#[inline]
pub fn key_phase(first: u8) -> bool {
    first & KEY_PHASE_BIT == KEY_PHASE_BIT
}

/// `true` if the datagram tail could be a stateless reset: short-header
/// shaped and long enough to carry a token
//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# Stateless Reset {
//#   Fixed Bits (2) = 01,
//#   Unpredictable Bits (38..),
//#   Stateless Reset Token (128),
//# }
#[inline]
pub fn could_be_stateless_reset(datagram: &[u8]) -> bool {
    datagram.len() > crate::stateless_reset::TOKEN_LEN + 5
        && datagram[0] & FORM_BIT == 0
        && datagram[0] & FIXED_BIT == FIXED_BIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct XorKey;

    impl Key for XorKey {
        fn decrypt(
            &self,
            packet_number: u64,
            _header: &[u8],
            payload: &mut [u8],
        ) -> Result<usize, CryptoError> {
            let len = payload.len().checked_sub(self.tag_len()).ok_or_else(CryptoError::decrypt_error)?;
            for byte in payload[..len].iter_mut() {
                *byte ^= packet_number as u8;
            }
            if payload[len..].iter().any(|byte| *byte != 0xaa) {
                return Err(CryptoError::decrypt_error());
            }
            Ok(len)
        }

        fn encrypt(
            &self,
            packet_number: u64,
            _header: &[u8],
            payload: &mut [u8],
        ) -> Result<(), CryptoError> {
            let len = payload.len() - self.tag_len();
            for byte in payload[..len].iter_mut() {
                *byte ^= packet_number as u8;
            }
            payload[len..].fill(0xaa);
            Ok(())
        }

        fn tag_len(&self) -> usize {
            16
        }
    }

    #[derive(Debug)]
    struct XorHeaderKey;

    impl HeaderKey for XorHeaderKey {
        fn protection_mask(&self, sample: &[u8]) -> crate::crypto::HeaderProtectionMask {
            let mut mask = [0u8; 5];
            for (index, byte) in mask.iter_mut().enumerate() {
                *byte = sample[index] ^ 0x5c;
            }
            mask
        }
    }

    #[test]
    fn seal_open_round_trip_test() {
        let space = PacketNumberSpace::ApplicationData;
        let zero = space.new_packet_number(VarInt::ZERO);
        let packet_number = space.new_packet_number(VarInt::from_u8(7));
        let pn_len = packet_number.truncate(zero).unwrap().len();
        let dcid = ConnectionId::try_from_slice(&[1, 2, 3, 4]).unwrap();

        let mut storage = vec![0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let pn_offset = encode_short_header(&mut encoder, &dcid, false, pn_len);
        encoder.encode(&packet_number.truncate(zero).unwrap());
        encoder.write_slice(b"hello frames");
        encoder.write_repeated(16, 0); // tag space
        let total = encoder.len();
        let packet = &mut storage[..total];

        seal(&XorKey, &XorHeaderKey, packet, pn_offset, pn_len, packet_number).unwrap();

        // parse it back as an inbound packet
        let (header, len) = Header::parse(packet, dcid.len()).unwrap();
        assert_eq!(len, total);
        assert!(matches!(header, Header::Short { .. }));
        assert_eq!(header.destination_cid(), &dcid);

        let (first, truncated) =
            unprotect(&XorHeaderKey, space, packet, header.pn_offset().unwrap()).unwrap();
        assert!(!key_phase(first));

        let (decoded_pn, payload) =
            decrypt(&XorKey, packet, header.pn_offset().unwrap(), truncated, zero).unwrap();
        assert_eq!(decoded_pn, packet_number);
        assert_eq!(&packet[payload], b"hello frames");
    }
}
