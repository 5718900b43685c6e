// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::{
    connection::ConnectionId, frame, random, stateless_reset, transport, varint::VarInt,
};

/// Connection IDs this endpoint issued to the peer.
///
/// Each carries a sequence number and a stateless reset token; the
/// registry keeps the set topped up to the peer's
/// active_connection_id_limit and processes RETIRE_CONNECTION_ID.
#[derive(Debug)]
pub struct LocalIdRegistry {
    entries: Vec<LocalId>,
    next_sequence: u64,
    /// Peer's active_connection_id_limit
    peer_active_limit: u64,
    local_id_len: usize,
    /// NEW_CONNECTION_ID frames pending transmission, by sequence
    pending_announcements: Vec<u64>,
}

#[derive(Debug, Clone)]
struct LocalId {
    sequence: u64,
    id: ConnectionId,
    token: stateless_reset::Token,
}

impl LocalIdRegistry {
    /// Starts with the handshake-negotiated connection ID as sequence 0
    /// (which is never announced via NEW_CONNECTION_ID)
    pub fn new(initial_id: ConnectionId, initial_token: stateless_reset::Token) -> Self {
        Self {
            local_id_len: initial_id.len(),
            entries: vec![LocalId {
                sequence: 0,
                id: initial_id,
                token: initial_token,
            }],
            next_sequence: 1,
            peer_active_limit: 2,
            pending_announcements: Vec::new(),
        }
    }

    /// Applies the peer's active_connection_id_limit and issues IDs up
    /// to it
    pub fn on_peer_limit<R: random::Generator>(&mut self, limit: VarInt, random: &mut R) {
        // cap our own issuance; there is no value in flooding the peer
        self.peer_active_limit = limit.as_u64().min(8);
        self.top_up(random);
    }

    fn top_up<R: random::Generator>(&mut self, random: &mut R) {
        while (self.entries.len() as u64) < self.peer_active_limit {
            let mut id_bytes = vec![0u8; self.local_id_len.max(quiver_core::connection::id::MIN_LOCAL_LEN)];
            random.public_random_fill(&mut id_bytes);
            let mut token_bytes = [0u8; stateless_reset::TOKEN_LEN];
            random.private_random_fill(&mut token_bytes);

            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.entries.push(LocalId {
                sequence,
                id: ConnectionId::try_from_slice(&id_bytes).expect("length is bounded"),
                token: stateless_reset::Token::new(token_bytes),
            });
            self.pending_announcements.push(sequence);
        }
    }

    /// All IDs the demuxer should route to this connection
    pub fn active_ids(&self) -> impl Iterator<Item = &ConnectionId> + '_ {
        self.entries.iter().map(|entry| &entry.id)
    }

    /// Handles RETIRE_CONNECTION_ID from the peer. Returns the retired
    /// ID so the demuxer can unregister it.
    pub fn on_retire_connection_id<R: random::Generator>(
        &mut self,
        frame: &frame::RetireConnectionId,
        packet_destination_id: &ConnectionId,
        random: &mut R,
    ) -> Result<Option<ConnectionId>, transport::Error> {
        let sequence = frame.sequence_number.as_u64();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
        //# Receipt of a RETIRE_CONNECTION_ID frame containing a sequence number
        //# greater than any previously sent to the peer MUST be treated as a
        //# connection error of type PROTOCOL_VIOLATION.
        if sequence >= self.next_sequence {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("retired connection id was never issued"));
        }

        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.sequence == sequence)
        else {
            // already retired
            return Ok(None);
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
        //# The sequence number specified in a RETIRE_CONNECTION_ID frame MUST
        //# NOT refer to the Destination Connection ID field of the packet in
        //# which the frame is contained.
        if &self.entries[index].id == packet_destination_id {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("peer retired the connection id it sent on"));
        }

        let retired = self.entries.remove(index);
        self.top_up(random);
        Ok(Some(retired.id))
    }

    /// The NEW_CONNECTION_ID frames to transmit
    pub fn pending_announcements(&mut self) -> Vec<frame::NewConnectionId> {
        let entries = &self.entries;
        let frames = self
            .pending_announcements
            .iter()
            .filter_map(|sequence| {
                entries
                    .iter()
                    .find(|entry| entry.sequence == *sequence)
                    .map(|entry| frame::NewConnectionId {
                        sequence_number: VarInt::new(entry.sequence).expect("sequence in range"),
                        retire_prior_to: VarInt::ZERO,
                        connection_id: entry.id,
                        stateless_reset_token: entry.token,
                    })
            })
            .collect();
        self.pending_announcements.clear();
        frames
    }

    /// Re-queues an announcement whose packet was lost
    pub fn on_announcement_loss(&mut self, sequence: VarInt) {
        let sequence = sequence.as_u64();
        if self.entries.iter().any(|entry| entry.sequence == sequence)
            && !self.pending_announcements.contains(&sequence)
        {
            self.pending_announcements.push(sequence);
        }
    }

    pub fn has_pending_announcements(&self) -> bool {
        !self.pending_announcements.is_empty()
    }

    /// The stateless reset token bound to a given local ID
    pub fn token_for(&self, id: &ConnectionId) -> Option<stateless_reset::Token> {
        self.entries
            .iter()
            .find(|entry| &entry.id == id)
            .map(|entry| entry.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::random::testing::Generator;

    fn registry() -> LocalIdRegistry {
        LocalIdRegistry::new(
            ConnectionId::try_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap(),
            stateless_reset::Token::new([0; 16]),
        )
    }

    #[test]
    fn top_up_test() {
        let mut registry = registry();
        let mut random = Generator::default();
        registry.on_peer_limit(VarInt::from_u8(4), &mut random);

        assert_eq!(registry.active_ids().count(), 4);
        let announcements = registry.pending_announcements();
        assert_eq!(announcements.len(), 3);
        // sequence 0 is never announced
        assert!(announcements
            .iter()
            .all(|frame| frame.sequence_number > VarInt::ZERO));
    }

    #[test]
    fn retire_test() {
        let mut registry = registry();
        let mut random = Generator::default();
        registry.on_peer_limit(VarInt::from_u8(3), &mut random);
        registry.pending_announcements();

        let current = *registry.active_ids().last().unwrap();

        // retiring an unissued sequence is fatal
        assert!(registry
            .on_retire_connection_id(
                &frame::RetireConnectionId {
                    sequence_number: VarInt::from_u8(9),
                },
                &current,
                &mut random,
            )
            .is_err());

        // retiring the id the packet arrived on is fatal
        let first = *registry.active_ids().next().unwrap();
        assert!(registry
            .on_retire_connection_id(
                &frame::RetireConnectionId {
                    sequence_number: VarInt::ZERO,
                },
                &first,
                &mut random,
            )
            .is_err());

        // a valid retirement removes the id and issues a replacement
        let retired = registry
            .on_retire_connection_id(
                &frame::RetireConnectionId {
                    sequence_number: VarInt::ZERO,
                },
                &current,
                &mut random,
            )
            .unwrap();
        assert_eq!(retired, Some(first));
        assert_eq!(registry.active_ids().count(), 3);
        assert!(registry.has_pending_announcements());
    }
}
