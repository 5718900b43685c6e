// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Network paths: address validation, the 3x anti-amplification budget,
//! and migration via PATH_CHALLENGE / PATH_RESPONSE.

use quiver_core::{frame, random, time::Timestamp};
use std::net::SocketAddr;

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
//# Prior to validating the client address, servers MUST NOT send more
//# than three times as many bytes as the number of bytes they have
//# received.
pub const AMPLIFICATION_FACTOR: u64 = 3;

/// One network path to the peer
#[derive(Debug)]
pub struct Path {
    pub remote_address: SocketAddr,
    /// Bytes received from this address, pre-validation
    bytes_received: u64,
    /// Bytes sent to this address, pre-validation
    bytes_sent: u64,
    validated: bool,
    /// Outstanding challenge sent on this path
    challenge: Option<[u8; frame::path_challenge::DATA_LEN]>,
    /// Whether the current challenge still needs to be transmitted
    challenge_pending: bool,
    /// Challenges from the peer awaiting a PATH_RESPONSE
    pending_responses: Vec<[u8; frame::path_challenge::DATA_LEN]>,
    /// When the last packet arrived on this path
    pub last_activity: Option<Timestamp>,
    pub max_datagram_size: u16,
}

impl Path {
    pub fn new(remote_address: SocketAddr, max_datagram_size: u16) -> Self {
        Self {
            remote_address,
            bytes_received: 0,
            bytes_sent: 0,
            validated: false,
            challenge: None,
            challenge_pending: false,
            pending_responses: Vec::new(),
            last_activity: None,
            max_datagram_size,
        }
    }

    /// Client paths start validated: the client chose the server address
    pub fn new_validated(remote_address: SocketAddr, max_datagram_size: u16) -> Self {
        let mut path = Self::new(remote_address, max_datagram_size);
        path.validated = true;
        path
    }

    #[inline]
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// The peer proved it can receive on this path
    pub fn on_validated(&mut self) {
        self.validated = true;
        self.challenge = None;
        self.challenge_pending = false;
    }

    pub fn on_bytes_received(&mut self, len: usize, now: Timestamp) {
        self.bytes_received += len as u64;
        self.last_activity = Some(now);
    }

    pub fn on_bytes_sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
    }

    /// Bytes this endpoint may still send before address validation
    /// completes. Unlimited once validated.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
    //# An endpoint MUST NOT send more than three times as many bytes as the
    //# number of bytes it has received on an unvalidated path
    #[inline]
    pub fn amplification_credit(&self) -> u64 {
        if self.validated {
            return u64::MAX;
        }
        (self.bytes_received * AMPLIFICATION_FACTOR).saturating_sub(self.bytes_sent)
    }

    #[inline]
    pub fn at_amplification_limit(&self) -> bool {
        self.amplification_credit() == 0
    }

    /// Starts path validation with a fresh random challenge
    pub fn start_challenge<R: random::Generator>(&mut self, random: &mut R) {
        let mut data = [0u8; frame::path_challenge::DATA_LEN];
        random.public_random_fill(&mut data);
        self.challenge = Some(data);
        self.challenge_pending = true;
    }

    /// Takes the challenge for transmission; further calls return `None`
    /// until a new challenge starts
    pub fn take_pending_challenge(&mut self) -> Option<frame::PathChallenge> {
        if !self.challenge_pending {
            return None;
        }
        self.challenge_pending = false;
        self.challenge.map(|data| frame::PathChallenge { data })
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.3
    //# Path validation succeeds when a PATH_RESPONSE frame is received that
    //# contains the data that was sent in a previous PATH_CHALLENGE frame.
    pub fn on_path_response(&mut self, frame: &frame::PathResponse) -> bool {
        if self.challenge == Some(frame.data) {
            self.on_validated();
            true
        } else {
            false
        }
    }

    /// The peer challenged this path; echo the data back
    pub fn on_path_challenge(&mut self, frame: &frame::PathChallenge) {
        if !self.pending_responses.contains(&frame.data) {
            self.pending_responses.push(frame.data);
        }
    }

    pub fn pop_pending_response(&mut self) -> Option<frame::PathResponse> {
        self.pending_responses
            .pop()
            .map(|data| frame::PathResponse { data })
    }

    #[inline]
    pub fn has_pending_response(&self) -> bool {
        !self.pending_responses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::random::testing::Generator;

    fn addr() -> SocketAddr {
        "127.0.0.1:4433".parse().unwrap()
    }

    #[test]
    fn amplification_test() {
        let mut path = Path::new(addr(), 1200);
        assert!(path.at_amplification_limit());

        // a 1200-byte initial grants 3600 bytes of credit
        path.on_bytes_received(1200, Timestamp::default());
        assert_eq!(path.amplification_credit(), 3600);

        path.on_bytes_sent(1200);
        path.on_bytes_sent(1200);
        assert_eq!(path.amplification_credit(), 1200);
        path.on_bytes_sent(1200);
        assert!(path.at_amplification_limit());

        path.on_validated();
        assert_eq!(path.amplification_credit(), u64::MAX);
    }

    #[test]
    fn challenge_response_test() {
        let mut path = Path::new(addr(), 1200);
        let mut random = Generator::default();
        path.start_challenge(&mut random);
        let challenge = path.take_pending_challenge().unwrap();
        // the challenge goes out once
        assert!(path.take_pending_challenge().is_none());

        // a mismatched response does not validate
        assert!(!path.on_path_response(&frame::PathResponse { data: [0; 8] }));
        assert!(!path.is_validated());

        assert!(path.on_path_response(&frame::PathResponse {
            data: challenge.data
        }));
        assert!(path.is_validated());
    }

    #[test]
    fn peer_challenge_echo_test() {
        let mut path = Path::new_validated(addr(), 1200);
        path.on_path_challenge(&frame::PathChallenge { data: [7; 8] });
        // duplicates collapse
        path.on_path_challenge(&frame::PathChallenge { data: [7; 8] });

        assert_eq!(
            path.pop_pending_response(),
            Some(frame::PathResponse { data: [7; 8] })
        );
        assert_eq!(path.pop_pending_response(), None);
    }
}
