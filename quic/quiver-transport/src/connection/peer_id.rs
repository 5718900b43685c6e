// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::{
    connection::ConnectionId, frame, stateless_reset, transport, varint::VarInt,
};

/// Connection IDs the peer issued to this endpoint.
///
/// The active entry is the DCID for outgoing packets; the rest are
/// spares for migration. Stateless reset tokens are matched against
/// datagram tails.
#[derive(Debug)]
pub struct PeerIdRegistry {
    entries: Vec<PeerId>,
    /// Sequence of the entry currently used as DCID
    active_sequence: u64,
    /// Our active_connection_id_limit
    local_active_limit: u64,
    retire_prior_to: u64,
    /// RETIRE_CONNECTION_ID frames pending transmission
    pending_retirements: Vec<u64>,
}

#[derive(Debug, Clone)]
struct PeerId {
    sequence: u64,
    id: ConnectionId,
    /// Absent for the handshake-negotiated sequence 0 until the peer
    /// provides one via transport parameters
    token: Option<stateless_reset::Token>,
}

impl PeerIdRegistry {
    pub fn new(initial_id: ConnectionId, local_active_limit: u64) -> Self {
        Self {
            entries: vec![PeerId {
                sequence: 0,
                id: initial_id,
                token: None,
            }],
            active_sequence: 0,
            local_active_limit,
            retire_prior_to: 0,
            pending_retirements: Vec::new(),
        }
    }

    /// Installs the stateless reset token for sequence 0 (from the
    /// peer's transport parameters)
    pub fn on_handshake_token(&mut self, token: stateless_reset::Token) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.sequence == 0) {
            entry.token = Some(token);
        }
    }

    /// Replaces the sequence-0 ID once the server's real SCID is known
    /// (client side, after the first Initial or a Retry)
    pub fn rebind_initial(&mut self, id: ConnectionId) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.sequence == 0) {
            entry.id = id;
        }
    }

    /// The connection ID for outgoing packets
    pub fn active_id(&self) -> &ConnectionId {
        self.entries
            .iter()
            .find(|entry| entry.sequence == self.active_sequence)
            .map(|entry| &entry.id)
            .unwrap_or_else(|| &self.entries[0].id)
    }

    pub fn on_new_connection_id(
        &mut self,
        frame: &frame::NewConnectionId,
    ) -> Result<(), transport::Error> {
        let sequence = frame.sequence_number.as_u64();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# ... or if a sequence number is used for different connection
        //# IDs, the endpoint MAY treat that receipt as a connection error
        //# of type PROTOCOL_VIOLATION.
        if let Some(existing) = self
            .entries
            .iter()
            .find(|entry| entry.sequence == sequence)
        {
            if existing.id != frame.connection_id {
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("sequence number reused for a different connection id"));
            }
            return Ok(());
        }

        if sequence < self.retire_prior_to {
            // already told to retire it; acknowledge and move on
            self.queue_retirement(sequence);
            return Ok(());
        }

        self.entries.push(PeerId {
            sequence,
            id: frame.connection_id,
            token: Some(frame.stateless_reset_token),
        });

        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# Upon receipt of an increased Retire Prior To field, the peer MUST
        //# stop using the corresponding connection IDs and retire them with
        //# RETIRE_CONNECTION_ID frames
        let retire_prior_to = frame.retire_prior_to.as_u64();
        if retire_prior_to > self.retire_prior_to {
            self.retire_prior_to = retire_prior_to;
            let to_retire: Vec<u64> = self
                .entries
                .iter()
                .filter(|entry| entry.sequence < retire_prior_to)
                .map(|entry| entry.sequence)
                .collect();
            for sequence in to_retire {
                self.retire(sequence);
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# After processing a NEW_CONNECTION_ID frame and adding and retiring
        //# active connection IDs, if the number of active connection IDs
        //# exceeds the value advertised in its active_connection_id_limit
        //# transport parameter, an endpoint MUST close the connection with an
        //# error of type CONNECTION_ID_LIMIT_ERROR.
        if self.entries.len() as u64 > self.local_active_limit {
            return Err(transport::Error::CONNECTION_ID_LIMIT_ERROR);
        }

        Ok(())
    }

    fn retire(&mut self, sequence: u64) {
        self.entries.retain(|entry| entry.sequence != sequence);
        self.queue_retirement(sequence);

        if sequence == self.active_sequence {
            // switch to the lowest remaining sequence
            if let Some(next) = self.entries.iter().map(|entry| entry.sequence).min() {
                self.active_sequence = next;
            }
        }
    }

    fn queue_retirement(&mut self, sequence: u64) {
        if !self.pending_retirements.contains(&sequence) {
            self.pending_retirements.push(sequence);
        }
    }

    /// Switches to an unused connection ID, e.g. when migrating paths.
    /// Returns `false` if no spare is available.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-9.5
    //# An endpoint MUST NOT reuse a connection ID when sending from more
    //# than one local address
    pub fn use_new_id(&mut self) -> bool {
        let spare = self
            .entries
            .iter()
            .filter(|entry| entry.sequence > self.active_sequence)
            .map(|entry| entry.sequence)
            .min();
        match spare {
            Some(sequence) => {
                let previous = self.active_sequence;
                self.active_sequence = sequence;
                self.retire(previous);
                true
            }
            None => false,
        }
    }

    pub fn pending_retirements(&mut self) -> Vec<frame::RetireConnectionId> {
        let frames = self
            .pending_retirements
            .iter()
            .map(|sequence| frame::RetireConnectionId {
                sequence_number: VarInt::new(*sequence).expect("sequence in range"),
            })
            .collect();
        self.pending_retirements.clear();
        frames
    }

    pub fn on_retirement_loss(&mut self, sequence: VarInt) {
        self.queue_retirement(sequence.as_u64());
    }

    pub fn has_pending_retirements(&self) -> bool {
        !self.pending_retirements.is_empty()
    }

    /// `true` if `token` matches any stateless reset token the peer
    /// bound to an ID we hold
    pub fn is_stateless_reset(&self, token: &stateless_reset::Token) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.token.as_ref() == Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_id_frame(sequence: u8, retire_prior_to: u8, id_byte: u8) -> frame::NewConnectionId {
        frame::NewConnectionId {
            sequence_number: VarInt::from_u8(sequence),
            retire_prior_to: VarInt::from_u8(retire_prior_to),
            connection_id: ConnectionId::try_from_slice(&[id_byte; 8]).unwrap(),
            stateless_reset_token: stateless_reset::Token::new([id_byte; 16]),
        }
    }

    fn registry() -> PeerIdRegistry {
        PeerIdRegistry::new(ConnectionId::try_from_slice(&[0; 8]).unwrap(), 4)
    }

    #[test]
    fn add_and_rotate_test() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_id_frame(1, 0, 0xaa)).unwrap();
        registry.on_new_connection_id(&new_id_frame(2, 0, 0xbb)).unwrap();

        assert_eq!(registry.active_id().as_bytes(), &[0; 8]);
        assert!(registry.use_new_id());
        assert_eq!(registry.active_id().as_bytes(), &[0xaa; 8]);
        // the old id was queued for retirement
        assert_eq!(registry.pending_retirements().len(), 1);
    }

    #[test]
    fn duplicate_sequence_test() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_id_frame(1, 0, 0xaa)).unwrap();
        // exact duplicate is fine
        registry.on_new_connection_id(&new_id_frame(1, 0, 0xaa)).unwrap();
        // same sequence with a different id is fatal
        assert!(registry.on_new_connection_id(&new_id_frame(1, 0, 0xcc)).is_err());
    }

    #[test]
    fn retire_prior_to_test() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_id_frame(1, 0, 0xaa)).unwrap();
        registry.on_new_connection_id(&new_id_frame(2, 2, 0xbb)).unwrap();

        // sequences 0 and 1 retire; the active id moves forward
        let retirements = registry.pending_retirements();
        assert_eq!(retirements.len(), 2);
        assert_eq!(registry.active_id().as_bytes(), &[0xbb; 8]);
    }

    #[test]
    fn limit_test() {
        let mut registry = registry();
        for sequence in 1..4 {
            registry
                .on_new_connection_id(&new_id_frame(sequence, 0, sequence))
                .unwrap();
        }
        assert_eq!(
            registry
                .on_new_connection_id(&new_id_frame(4, 0, 4))
                .unwrap_err()
                .code,
            transport::Error::CONNECTION_ID_LIMIT_ERROR.code
        );
    }

    #[test]
    fn stateless_reset_match_test() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_id_frame(1, 0, 0xaa)).unwrap();
        assert!(registry.is_stateless_reset(&stateless_reset::Token::new([0xaa; 16])));
        assert!(!registry.is_stateless_reset(&stateless_reset::Token::new([0xdd; 16])));
    }
}
