// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Maps inbound datagrams to connections by destination connection ID.
//!
//! Short headers do not carry the DCID length, so the map also records
//! the fixed length of locally-issued IDs. Unmatched datagrams are
//! classified as either a prospective new server connection (a valid
//! Initial) or a stateless-reset candidate.

use hashbrown::HashMap;
use quiver_core::{
    connection::ConnectionId,
    packet::{self, Header},
    stateless_reset,
};

/// Process-local handle identifying a connection within one endpoint
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ConnectionHandle(pub usize);

/// Where an inbound datagram should go
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// An established connection owns this ID
    Connection(ConnectionHandle),
    /// A long-header packet for an unknown ID which may create a
    /// server-side connection
    PotentialNewConnection {
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        version: u32,
        is_initial: bool,
    },
    /// Unknown short-header datagram: a candidate for a stateless reset
    /// probe (the token is the final 16 bytes of the datagram)
    StatelessResetCandidate {
        destination_cid: ConnectionId,
        token: stateless_reset::Token,
    },
    /// Undecodable or uninteresting; drop silently
    Drop,
}

/// The connection ID registry for one endpoint shard
#[derive(Debug, Default)]
pub struct Demux {
    connections:
        HashMap<ConnectionId, ConnectionHandle, core::hash::BuildHasherDefault<siphasher::sip::SipHasher13>>,
    /// Length of locally-issued connection IDs (uniform per endpoint)
    local_cid_len: usize,
}

impl Demux {
    pub fn new(local_cid_len: usize) -> Self {
        debug_assert!(
            (quiver_core::connection::id::MIN_LOCAL_LEN..=quiver_core::connection::id::MAX_LEN)
                .contains(&local_cid_len)
        );
        Self {
            connections: HashMap::default(),
            local_cid_len,
        }
    }

    #[inline]
    pub fn local_cid_len(&self) -> usize {
        self.local_cid_len
    }

    pub fn register(&mut self, id: ConnectionId, handle: ConnectionHandle) {
        self.connections.insert(id, handle);
    }

    pub fn unregister(&mut self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    pub fn unregister_all(&mut self, handle: ConnectionHandle) {
        self.connections.retain(|_, value| *value != handle);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Classifies one datagram by its first packet's header
    pub fn route(&self, datagram: &[u8]) -> Route {
        let Ok((header, _)) = Header::parse(datagram, self.local_cid_len) else {
            return Route::Drop;
        };

        if let Some(handle) = self.connections.get(header.destination_cid()) {
            return Route::Connection(*handle);
        }

        match header {
            Header::Initial {
                version,
                destination_cid,
                source_cid,
                ..
            } => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
                //# When an Initial packet is sent by a client ... This Destination
                //# Connection ID MUST be at least 8 bytes in length.
                if destination_cid.len() < 8 {
                    return Route::Drop;
                }
                Route::PotentialNewConnection {
                    destination_cid,
                    source_cid,
                    version,
                    is_initial: true,
                }
            }
            Header::ZeroRtt {
                version,
                destination_cid,
                source_cid,
                ..
            } => Route::PotentialNewConnection {
                destination_cid,
                source_cid,
                version,
                is_initial: false,
            },
            Header::Short {
                destination_cid, ..
            } if packet::could_be_stateless_reset(datagram) => {
                let start = datagram.len() - stateless_reset::TOKEN_LEN;
                match stateless_reset::Token::try_from(&datagram[start..]) {
                    Ok(token) => Route::StatelessResetCandidate {
                        destination_cid,
                        token,
                    },
                    Err(_) => Route::Drop,
                }
            }
            _ => Route::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::packet::number::PacketNumberLen;
    use quiver_codec::{Encoder, EncoderBuffer};

    fn cid(bytes: &[u8]) -> ConnectionId {
        ConnectionId::try_from_slice(bytes).unwrap()
    }

    fn initial_datagram(dcid: &ConnectionId, scid: &ConnectionId) -> Vec<u8> {
        let mut storage = vec![0u8; 1200];
        let mut encoder = EncoderBuffer::new(&mut storage);
        packet::encode_long_header(
            &mut encoder,
            packet::LongType::Initial,
            packet::VERSION_1,
            dcid,
            scid,
            Some(&[]),
            PacketNumberLen::from_packet_tag(0),
            1 + 40,
        );
        encoder.write_repeated(41, 0);
        let len = encoder.len();
        storage.truncate(len);
        storage
    }

    #[test]
    fn routing_test() {
        let mut demux = Demux::new(8);
        let local = cid(&[9; 8]);
        demux.register(local, ConnectionHandle(3));

        // known long-header DCID routes to the connection
        let datagram = initial_datagram(&local, &cid(&[1; 4]));
        assert_eq!(demux.route(&datagram), Route::Connection(ConnectionHandle(3)));

        // unknown initial with a valid-length DCID can create a connection
        let datagram = initial_datagram(&cid(&[7; 8]), &cid(&[1; 4]));
        assert!(matches!(
            demux.route(&datagram),
            Route::PotentialNewConnection { is_initial: true, .. }
        ));

        // an initial with a short DCID is dropped
        let datagram = initial_datagram(&cid(&[7; 4]), &cid(&[1; 4]));
        assert_eq!(demux.route(&datagram), Route::Drop);
    }

    #[test]
    fn short_header_routing_test() {
        let mut demux = Demux::new(8);
        let local = cid(&[5; 8]);
        demux.register(local, ConnectionHandle(1));

        let mut datagram = vec![0x40u8];
        datagram.extend_from_slice(local.as_bytes());
        datagram.extend_from_slice(&[0xaa; 32]);
        assert_eq!(demux.route(&datagram), Route::Connection(ConnectionHandle(1)));

        // unknown short header becomes a stateless reset candidate
        let mut unknown = vec![0x40u8];
        unknown.extend_from_slice(&[3; 8]);
        unknown.extend_from_slice(&[0xbb; 32]);
        let route = demux.route(&unknown);
        let expected_token =
            stateless_reset::Token::try_from(&unknown[unknown.len() - 16..]).unwrap();
        assert_eq!(
            route,
            Route::StatelessResetCandidate {
                destination_cid: cid(&[3; 8]),
                token: expected_token,
            }
        );
    }

    #[test]
    fn unregister_test() {
        let mut demux = Demux::new(8);
        demux.register(cid(&[1; 8]), ConnectionHandle(0));
        demux.register(cid(&[2; 8]), ConnectionHandle(0));
        demux.register(cid(&[3; 8]), ConnectionHandle(1));
        demux.unregister_all(ConnectionHandle(0));
        assert_eq!(demux.len(), 1);
    }
}
