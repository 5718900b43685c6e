// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The contract between the QUIC transport and an external TLS 1.3 engine.
//!
//! The transport feeds inbound CRYPTO stream bytes to the [`Session`] and
//! drives it with [`Session::do_handshake`]; the session responds through
//! the [`Context`] callbacks: secrets as they become available, handshake
//! bytes to be carried in CRYPTO frames, and alerts on failure.

use crate::crypto::{CryptoError, EncryptionLevel};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
//# AEAD_AES_128_GCM and AEAD_AES_256_GCM use AES in counter (CTR) mode
//# ...  AEAD_CHACHA20_POLY1305 uses ChaCha20

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    TLS_AES_128_GCM_SHA256,
    TLS_AES_256_GCM_SHA384,
    TLS_CHACHA20_POLY1305_SHA256,
}

/// Callbacks the QUIC core exposes to the TLS engine
pub trait Context {
    /// Install the key material for reading at `level`
    fn set_read_secret(
        &mut self,
        level: EncryptionLevel,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), CryptoError>;

    /// Install the key material for writing at `level`
    fn set_write_secret(
        &mut self,
        level: EncryptionLevel,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), CryptoError>;

    /// Append handshake bytes to the CRYPTO stream at `level`
    fn write_crypto(&mut self, level: EncryptionLevel, bytes: &[u8]) -> Result<(), CryptoError>;

    /// The TLS engine finished a flight; buffered CRYPTO data should be
    /// scheduled for transmission
    fn flush(&mut self);

    /// The TLS engine emitted a fatal alert
    fn send_alert(&mut self, level: EncryptionLevel, code: u8);
}

/// One endpoint's half of a TLS handshake
pub trait Session: Send {
    /// Deliver reassembled CRYPTO stream bytes received at `level`
    fn provide_crypto_data(
        &mut self,
        level: EncryptionLevel,
        bytes: &[u8],
    ) -> Result<(), CryptoError>;

    /// Advance the handshake as far as the available data allows,
    /// reporting progress through `context`
    fn do_handshake(&mut self, context: &mut dyn Context) -> Result<(), CryptoError>;

    /// `true` once the handshake has completed on this endpoint
    fn handshake_complete(&self) -> bool;

    /// The raw transport parameter extension received from the peer
    fn peer_transport_parameters(&self) -> Option<&[u8]>;

    /// The negotiated application protocol, if any
    fn alpn_selected(&self) -> Option<&[u8]> {
        None
    }

    /// `true` if the server accepted 0-RTT early data
    fn early_data_accepted(&self) -> bool {
        false
    }
}

/// Creates [`Session`]s for new connections.
///
/// The local transport parameters are handed over pre-encoded so the TLS
/// engine can install them as the `quic_transport_parameters` extension.
pub trait Endpoint: Send + 'static {
    type Session: Session;

    fn new_server_session(&mut self, transport_parameters: &[u8]) -> Self::Session;

    fn new_client_session(
        &mut self,
        transport_parameters: &[u8],
        server_name: &str,
    ) -> Self::Session;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! A deterministic in-memory handshake.
    //!
    //! Both sides derive the same fixed secrets, so packets protected with
    //! the real AEAD implementations interoperate between a test client
    //! and server without a TLS library.

    use super::*;
    use crate::endpoint;

    pub const CLIENT_HANDSHAKE_SECRET: [u8; 32] = [0xc1; 32];
    pub const SERVER_HANDSHAKE_SECRET: [u8; 32] = [0x51; 32];
    pub const CLIENT_APPLICATION_SECRET: [u8; 32] = [0xca; 32];
    pub const SERVER_APPLICATION_SECRET: [u8; 32] = [0x5a; 32];

    const CLIENT_HELLO: u8 = 1;
    const SERVER_HELLO: u8 = 2;
    const FINISHED: u8 = 20;

    const SUITE: CipherSuite = CipherSuite::TLS_AES_128_GCM_SHA256;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum State {
        Start,
        WaitHello,
        WaitFinished,
        Complete,
    }

    #[derive(Debug)]
    pub struct Session {
        endpoint_type: endpoint::Type,
        state: State,
        local_parameters: Vec<u8>,
        peer_parameters: Option<Vec<u8>>,
        initial_recv: Vec<u8>,
        handshake_recv: Vec<u8>,
    }

    impl Session {
        fn new(endpoint_type: endpoint::Type, transport_parameters: &[u8]) -> Self {
            Self {
                endpoint_type,
                state: State::Start,
                local_parameters: transport_parameters.to_vec(),
                peer_parameters: None,
                initial_recv: Vec::new(),
                handshake_recv: Vec::new(),
            }
        }

        /// Messages are `tag (1) || len (2) || body`
        fn encode_message(tag: u8, body: &[u8]) -> Vec<u8> {
            let mut message = Vec::with_capacity(3 + body.len());
            message.push(tag);
            message.extend_from_slice(&(body.len() as u16).to_be_bytes());
            message.extend_from_slice(body);
            message
        }

        fn take_message(buffer: &mut Vec<u8>) -> Option<(u8, Vec<u8>)> {
            if buffer.len() < 3 {
                return None;
            }
            let len = u16::from_be_bytes([buffer[1], buffer[2]]) as usize;
            if buffer.len() < 3 + len {
                return None;
            }
            let tag = buffer[0];
            let body = buffer[3..3 + len].to_vec();
            buffer.drain(..3 + len);
            Some((tag, body))
        }
    }

    impl super::Session for Session {
        fn provide_crypto_data(
            &mut self,
            level: EncryptionLevel,
            bytes: &[u8],
        ) -> Result<(), CryptoError> {
            match level {
                EncryptionLevel::Initial => self.initial_recv.extend_from_slice(bytes),
                EncryptionLevel::Handshake => self.handshake_recv.extend_from_slice(bytes),
                _ => return Err(CryptoError::decode_error().with_reason("unexpected level")),
            }
            Ok(())
        }

        fn do_handshake(&mut self, context: &mut dyn Context) -> Result<(), CryptoError> {
            loop {
                match (self.endpoint_type, self.state) {
                    (endpoint::Type::Client, State::Start) => {
                        let hello = Self::encode_message(CLIENT_HELLO, &self.local_parameters);
                        context.write_crypto(EncryptionLevel::Initial, &hello)?;
                        context.flush();
                        self.state = State::WaitHello;
                    }
                    (endpoint::Type::Server, State::Start) => {
                        let Some((tag, body)) = Self::take_message(&mut self.initial_recv) else {
                            return Ok(());
                        };
                        if tag != CLIENT_HELLO {
                            context.send_alert(EncryptionLevel::Initial, error::DECODE_ERROR);
                            return Err(CryptoError::decode_error());
                        }
                        self.peer_parameters = Some(body);

                        let hello = Self::encode_message(SERVER_HELLO, &self.local_parameters);
                        context.write_crypto(EncryptionLevel::Initial, &hello)?;
                        context.set_write_secret(
                            EncryptionLevel::Handshake,
                            SUITE,
                            &SERVER_HANDSHAKE_SECRET,
                        )?;
                        context.set_read_secret(
                            EncryptionLevel::Handshake,
                            SUITE,
                            &CLIENT_HANDSHAKE_SECRET,
                        )?;
                        context.write_crypto(EncryptionLevel::Handshake, &Self::encode_message(FINISHED, &[]))?;
                        context.set_write_secret(
                            EncryptionLevel::OneRtt,
                            SUITE,
                            &SERVER_APPLICATION_SECRET,
                        )?;
                        context.set_read_secret(
                            EncryptionLevel::OneRtt,
                            SUITE,
                            &CLIENT_APPLICATION_SECRET,
                        )?;
                        context.flush();
                        self.state = State::WaitFinished;
                    }
                    (endpoint::Type::Client, State::WaitHello) => {
                        let Some((tag, body)) = Self::take_message(&mut self.initial_recv) else {
                            return Ok(());
                        };
                        if tag != SERVER_HELLO {
                            context.send_alert(EncryptionLevel::Initial, error::DECODE_ERROR);
                            return Err(CryptoError::decode_error());
                        }
                        self.peer_parameters = Some(body);
                        context.set_write_secret(
                            EncryptionLevel::Handshake,
                            SUITE,
                            &CLIENT_HANDSHAKE_SECRET,
                        )?;
                        context.set_read_secret(
                            EncryptionLevel::Handshake,
                            SUITE,
                            &SERVER_HANDSHAKE_SECRET,
                        )?;
                        self.state = State::WaitFinished;
                    }
                    (endpoint::Type::Client, State::WaitFinished) => {
                        let Some((tag, _)) = Self::take_message(&mut self.handshake_recv) else {
                            return Ok(());
                        };
                        if tag != FINISHED {
                            context.send_alert(EncryptionLevel::Handshake, error::DECODE_ERROR);
                            return Err(CryptoError::decode_error());
                        }
                        context
                            .write_crypto(EncryptionLevel::Handshake, &Self::encode_message(FINISHED, &[]))?;
                        context.set_write_secret(
                            EncryptionLevel::OneRtt,
                            SUITE,
                            &CLIENT_APPLICATION_SECRET,
                        )?;
                        context.set_read_secret(
                            EncryptionLevel::OneRtt,
                            SUITE,
                            &SERVER_APPLICATION_SECRET,
                        )?;
                        context.flush();
                        self.state = State::Complete;
                    }
                    (endpoint::Type::Server, State::WaitFinished) => {
                        let Some((tag, _)) = Self::take_message(&mut self.handshake_recv) else {
                            return Ok(());
                        };
                        if tag != FINISHED {
                            context.send_alert(EncryptionLevel::Handshake, error::DECODE_ERROR);
                            return Err(CryptoError::decode_error());
                        }
                        self.state = State::Complete;
                    }
                    (_, State::Complete) => return Ok(()),
                    // Only the client ever transitions into WaitHello.
                    (endpoint::Type::Server, State::WaitHello) => unreachable!(),
                }
            }
        }

        fn handshake_complete(&self) -> bool {
            self.state == State::Complete
        }

        fn peer_transport_parameters(&self) -> Option<&[u8]> {
            self.peer_parameters.as_deref()
        }

        fn alpn_selected(&self) -> Option<&[u8]> {
            if self.handshake_complete() {
                Some(b"test")
            } else {
                None
            }
        }
    }

    use crate::crypto::error;

    #[derive(Clone, Copy, Debug, Default)]
    pub struct Endpoint;

    impl super::Endpoint for Endpoint {
        type Session = Session;

        fn new_server_session(&mut self, transport_parameters: &[u8]) -> Session {
            Session::new(endpoint::Type::Server, transport_parameters)
        }

        fn new_client_session(
            &mut self,
            transport_parameters: &[u8],
            _server_name: &str,
        ) -> Session {
            Session::new(endpoint::Type::Client, transport_parameters)
        }
    }
}
