// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection key store: one sealer/opener pair per encryption
//! level, plus the 1-RTT key-update chain.

use crate::{
    initial::InitialKeys, key::PacketKey, next_generation_secret, DirectionalKeys,
    HeaderProtectionKey, Suite,
};
use quiver_core::{
    crypto::{tls::CipherSuite, CryptoError, EncryptionLevel},
    endpoint,
};
use zeroize::Zeroizing;

#[derive(Default)]
struct LevelSlot {
    sealer: Option<DirectionalKeys>,
    opener: Option<DirectionalKeys>,
}

struct OneRttKeys {
    suite: Suite,
    /// The phase of packets this endpoint currently sends
    key_phase: bool,
    header_sealer: HeaderProtectionKey,
    header_opener: HeaderProtectionKey,
    sealer: PacketKey,
    sealer_secret: Zeroizing<Vec<u8>>,
    opener: PacketKey,
    opener_secret: Zeroizing<Vec<u8>>,
    /// Pre-derived opener for the next key phase, so a peer-initiated
    /// update can be trialed without mutating state
    next_opener: PacketKey,
}

impl OneRttKeys {
    fn new(
        suite: Suite,
        write_secret: Zeroizing<Vec<u8>>,
        read_secret: Zeroizing<Vec<u8>>,
    ) -> Result<Self, CryptoError> {
        let write = DirectionalKeys::derive(&suite, &write_secret)?;
        let read = DirectionalKeys::derive(&suite, &read_secret)?;
        let next_read_secret = next_generation_secret(&suite, &read_secret)?;
        let next_opener = DirectionalKeys::derive(&suite, &next_read_secret)?.packet;

        Ok(Self {
            suite,
            key_phase: false,
            header_sealer: write.header,
            header_opener: read.header,
            sealer: write.packet,
            sealer_secret: write_secret,
            opener: read.packet,
            opener_secret: read_secret,
            next_opener,
        })
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //# An endpoint MUST NOT initiate a subsequent key update unless it has
    //# received an acknowledgment for a packet that was sent protected with
    //# keys from the current key phase.
    fn rotate(&mut self) -> Result<(), CryptoError> {
        self.opener_secret = next_generation_secret(&self.suite, &self.opener_secret)?;
        let confirmed_opener = DirectionalKeys::derive(&self.suite, &self.opener_secret)?.packet;
        let next_read_secret = next_generation_secret(&self.suite, &self.opener_secret)?;
        self.next_opener = DirectionalKeys::derive(&self.suite, &next_read_secret)?.packet;
        self.opener = confirmed_opener;

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.2
        //# An endpoint detecting a key update
        //# MUST update its send keys to the corresponding key phase in response
        self.sealer_secret = next_generation_secret(&self.suite, &self.sealer_secret)?;
        self.sealer = DirectionalKeys::derive(&self.suite, &self.sealer_secret)?.packet;

        self.key_phase = !self.key_phase;
        Ok(())
    }
}

/// All packet protection state for one connection
pub struct Cryptographer {
    initial: LevelSlot,
    zero_rtt: LevelSlot,
    handshake: LevelSlot,
    one_rtt: Option<OneRttKeys>,
    pending_one_rtt_write: Option<(Suite, Zeroizing<Vec<u8>>)>,
    pending_one_rtt_read: Option<(Suite, Zeroizing<Vec<u8>>)>,
}

impl Default for Cryptographer {
    fn default() -> Self {
        Self {
            initial: LevelSlot::default(),
            zero_rtt: LevelSlot::default(),
            handshake: LevelSlot::default(),
            one_rtt: None,
            pending_one_rtt_write: None,
            pending_one_rtt_read: None,
        }
    }
}

impl Cryptographer {
    /// Installs Initial keys derived from the client's first DCID
    pub fn install_initial_keys(
        &mut self,
        endpoint_type: endpoint::Type,
        client_destination_cid: &[u8],
    ) -> Result<(), CryptoError> {
        let keys = InitialKeys::derive(client_destination_cid)?;
        let (sealer, opener) = match endpoint_type {
            endpoint::Type::Client => (keys.client, keys.server),
            endpoint::Type::Server => (keys.server, keys.client),
        };
        self.initial.sealer = Some(sealer);
        self.initial.opener = Some(opener);
        Ok(())
    }

    pub fn install_write_secret(
        &mut self,
        level: EncryptionLevel,
        cipher_suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), CryptoError> {
        let suite = Suite::for_cipher_suite(cipher_suite);
        match level {
            EncryptionLevel::OneRtt => {
                self.pending_one_rtt_write = Some((suite, Zeroizing::new(secret.to_vec())));
                self.try_build_one_rtt()
            }
            _ => {
                self.slot_mut(level).sealer = Some(DirectionalKeys::derive(&suite, secret)?);
                Ok(())
            }
        }
    }

    pub fn install_read_secret(
        &mut self,
        level: EncryptionLevel,
        cipher_suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), CryptoError> {
        let suite = Suite::for_cipher_suite(cipher_suite);
        match level {
            EncryptionLevel::OneRtt => {
                self.pending_one_rtt_read = Some((suite, Zeroizing::new(secret.to_vec())));
                self.try_build_one_rtt()
            }
            _ => {
                self.slot_mut(level).opener = Some(DirectionalKeys::derive(&suite, secret)?);
                Ok(())
            }
        }
    }

    fn try_build_one_rtt(&mut self) -> Result<(), CryptoError> {
        if self.pending_one_rtt_write.is_some() && self.pending_one_rtt_read.is_some() {
            let (suite, write) = self.pending_one_rtt_write.take().expect("checked above");
            let (_, read) = self.pending_one_rtt_read.take().expect("checked above");
            self.one_rtt = Some(OneRttKeys::new(suite, write, read)?);
        }
        Ok(())
    }

    fn slot_mut(&mut self, level: EncryptionLevel) -> &mut LevelSlot {
        match level {
            EncryptionLevel::Initial => &mut self.initial,
            EncryptionLevel::ZeroRtt => &mut self.zero_rtt,
            EncryptionLevel::Handshake => &mut self.handshake,
            EncryptionLevel::OneRtt => unreachable!("one-rtt uses the key-update store"),
        }
    }

    fn slot(&self, level: EncryptionLevel) -> &LevelSlot {
        match level {
            EncryptionLevel::Initial => &self.initial,
            EncryptionLevel::ZeroRtt => &self.zero_rtt,
            EncryptionLevel::Handshake => &self.handshake,
            EncryptionLevel::OneRtt => unreachable!("one-rtt uses the key-update store"),
        }
    }

    /// `true` once packets can be sealed at `level`
    pub fn can_seal(&self, level: EncryptionLevel) -> bool {
        match level {
            EncryptionLevel::OneRtt => self.one_rtt.is_some(),
            _ => self.slot(level).sealer.is_some(),
        }
    }

    pub fn can_open(&self, level: EncryptionLevel) -> bool {
        match level {
            EncryptionLevel::OneRtt => self.one_rtt.is_some(),
            _ => self.slot(level).opener.is_some(),
        }
    }

    /// The sealing keys for a level, with the current key phase for 1-RTT
    pub fn sealer(
        &self,
        level: EncryptionLevel,
    ) -> Option<(&PacketKey, &HeaderProtectionKey, bool)> {
        match level {
            EncryptionLevel::OneRtt => {
                let keys = self.one_rtt.as_ref()?;
                Some((&keys.sealer, &keys.header_sealer, keys.key_phase))
            }
            _ => {
                let keys = self.slot(level).sealer.as_ref()?;
                Some((&keys.packet, &keys.header, false))
            }
        }
    }

    /// The opening keys for a non-1-RTT level
    pub fn opener(&self, level: EncryptionLevel) -> Option<(&PacketKey, &HeaderProtectionKey)> {
        debug_assert!(level != EncryptionLevel::OneRtt);
        let keys = self.slot(level).opener.as_ref()?;
        Some((&keys.packet, &keys.header))
    }

    /// The 1-RTT header opener (phase-independent)
    pub fn one_rtt_header_opener(&self) -> Option<&HeaderProtectionKey> {
        Some(&self.one_rtt.as_ref()?.header_opener)
    }

    /// The 1-RTT packet opener for the phase bit carried by a packet.
    ///
    /// Returns `(key, is_next_generation)`; a successful decrypt with the
    /// next generation means the peer initiated a key update, which the
    /// caller commits with [`Self::on_key_update`] once its own policy
    /// (at most one update per RTT) allows.
    pub fn one_rtt_opener(&self, packet_key_phase: bool) -> Option<(&PacketKey, bool)> {
        let keys = self.one_rtt.as_ref()?;
        if packet_key_phase == keys.key_phase {
            Some((&keys.opener, false))
        } else {
            Some((&keys.next_opener, true))
        }
    }

    pub fn key_phase(&self) -> bool {
        self.one_rtt.as_ref().map(|keys| keys.key_phase).unwrap_or(false)
    }

    /// Commits a peer-initiated key update
    pub fn on_key_update(&mut self) -> Result<(), CryptoError> {
        let keys = self
            .one_rtt
            .as_mut()
            .ok_or_else(CryptoError::internal_error)?;
        keys.rotate()
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9
    //# An endpoint MUST discard its Handshake keys when the TLS handshake is
    //# confirmed
    pub fn discard(&mut self, level: EncryptionLevel) {
        match level {
            EncryptionLevel::OneRtt => debug_assert!(false, "1-RTT keys are never discarded"),
            _ => {
                let slot = self.slot_mut(level);
                slot.sealer = None;
                slot.opener = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::crypto::Key;

    fn pair() -> (Cryptographer, Cryptographer) {
        let suite = CipherSuite::TLS_AES_128_GCM_SHA256;
        let client_secret = [0x11u8; 32];
        let server_secret = [0x22u8; 32];

        let mut client = Cryptographer::default();
        client
            .install_write_secret(EncryptionLevel::OneRtt, suite, &client_secret)
            .unwrap();
        client
            .install_read_secret(EncryptionLevel::OneRtt, suite, &server_secret)
            .unwrap();

        let mut server = Cryptographer::default();
        server
            .install_write_secret(EncryptionLevel::OneRtt, suite, &server_secret)
            .unwrap();
        server
            .install_read_secret(EncryptionLevel::OneRtt, suite, &client_secret)
            .unwrap();

        (client, server)
    }

    fn seal_one(crypto: &Cryptographer, packet_number: u64, payload: &[u8]) -> (Vec<u8>, bool) {
        let (key, _, phase) = crypto.sealer(EncryptionLevel::OneRtt).unwrap();
        let mut bytes = payload.to_vec();
        bytes.resize(payload.len() + key.tag_len(), 0);
        key.encrypt(packet_number, &[], &mut bytes).unwrap();
        (bytes, phase)
    }

    #[test]
    fn one_rtt_round_trip_test() {
        let (client, server) = pair();
        let (mut sealed, phase) = seal_one(&client, 1, b"ping");

        let (opener, is_next) = server.one_rtt_opener(phase).unwrap();
        assert!(!is_next);
        let len = opener.decrypt(1, &[], &mut sealed).unwrap();
        assert_eq!(&sealed[..len], b"ping");
    }

    #[test]
    fn key_update_test() {
        let (mut client, mut server) = pair();

        // the client updates its keys and sends in the new phase
        client.on_key_update().unwrap();
        assert!(client.key_phase());
        let (mut sealed, phase) = seal_one(&client, 9, b"rotated");

        // the server sees a flipped phase bit and opens with the next
        // generation before committing
        let (opener, is_next) = server.one_rtt_opener(phase).unwrap();
        assert!(is_next);
        let len = opener.decrypt(9, &[], &mut sealed).unwrap();
        assert_eq!(&sealed[..len], b"rotated");

        server.on_key_update().unwrap();
        assert!(server.key_phase());

        // traffic continues in the new phase in both directions
        let (mut sealed, phase) = seal_one(&server, 3, b"reply");
        let (opener, is_next) = client.one_rtt_opener(phase).unwrap();
        assert!(!is_next);
        let len = opener.decrypt(3, &[], &mut sealed).unwrap();
        assert_eq!(&sealed[..len], b"reply");
    }

    #[test]
    fn discard_test() {
        let mut crypto = Cryptographer::default();
        crypto
            .install_initial_keys(endpoint::Type::Client, &[1, 2, 3, 4])
            .unwrap();
        assert!(crypto.can_seal(EncryptionLevel::Initial));
        crypto.discard(EncryptionLevel::Initial);
        assert!(!crypto.can_seal(EncryptionLevel::Initial));
        assert!(!crypto.can_open(EncryptionLevel::Initial));
    }
}
