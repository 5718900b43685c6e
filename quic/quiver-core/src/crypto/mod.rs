// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet protection traits.
//!
//! The concrete AEAD/header-protection implementations live in
//! `quiver-crypto`; everything here is expressed against these traits so
//! the packet codec and connection logic stay backend-agnostic.

pub mod error;
pub mod label;
pub mod tls;

pub use error::CryptoError;

use crate::packet::number::PacketNumberSpace;

//= https://www.rfc-editor.org/rfc/rfc9001#section-2.1
//# Data is protected using a number of encryption levels:
//#
//# *  Initial keys
//# *  Early data (0-RTT) keys
//# *  Handshake keys
//# *  Application data (1-RTT) keys

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum EncryptionLevel {
    Initial,
    ZeroRtt,
    Handshake,
    OneRtt,
}

impl EncryptionLevel {
    /// The packet-number space protected at this level
    #[inline]
    pub fn packet_number_space(self) -> PacketNumberSpace {
        match self {
            Self::Initial => PacketNumberSpace::Initial,
            Self::Handshake => PacketNumberSpace::Handshake,
            Self::ZeroRtt | Self::OneRtt => PacketNumberSpace::ApplicationData,
        }
    }

    pub const ALL: [Self; 4] = [Self::Initial, Self::ZeroRtt, Self::Handshake, Self::OneRtt];
}

/// The mask applied to the first byte and packet number bytes of a header
pub type HeaderProtectionMask = [u8; 5];

/// The number of payload bytes sampled to derive the header protection mask
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# in sampling packet ciphertext for header protection, the Packet Number field is
//# assumed to be 4 bytes long
pub const HEADER_PROTECTION_SAMPLE_LEN: usize = 16;

/// An AEAD key for one direction at one encryption level.
///
/// Payload buffers are processed in place; for encryption the final
/// `tag_len` bytes of `payload` are reserved for the authentication tag.
pub trait Key: Send {
    /// Opens `payload` (ciphertext plus tag) in place, returning the
    /// plaintext length
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, CryptoError>;

    /// Seals `payload` in place; the last `tag_len` bytes are overwritten
    /// with the tag
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Length of the appended tag
    fn tag_len(&self) -> usize;
}

/// A header protection key for one direction at one encryption level
pub trait HeaderKey: Send {
    /// Derives the 5-byte protection mask from a ciphertext sample
    fn protection_mask(&self, sample: &[u8]) -> HeaderProtectionMask;

    /// The number of ciphertext bytes the mask derivation samples
    fn sample_len(&self) -> usize {
        HEADER_PROTECTION_SAMPLE_LEN
    }
}

impl<K: Key + ?Sized> Key for Box<K> {
    #[inline]
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, CryptoError> {
        (**self).decrypt(packet_number, header, payload)
    }

    #[inline]
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), CryptoError> {
        (**self).encrypt(packet_number, header, payload)
    }

    #[inline]
    fn tag_len(&self) -> usize {
        (**self).tag_len()
    }
}

impl<K: HeaderKey + ?Sized> HeaderKey for Box<K> {
    #[inline]
    fn protection_mask(&self, sample: &[u8]) -> HeaderProtectionMask {
        (**self).protection_mask(sample)
    }

    #[inline]
    fn sample_len(&self) -> usize {
        (**self).sample_len()
    }
}
