// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    stream::{recv::ReceiveStream, send::SendStream},
    sync::{IncomingFlowController, OutgoingFlowController},
};
use hashbrown::HashMap;
use quiver_core::{
    application::ApplicationErrorCode,
    connection,
    endpoint, frame,
    stream::{StreamId, StreamType},
    transport,
    varint::VarInt,
};
use std::collections::VecDeque;

/// Initial per-stream and stream-count limits, split by direction
#[derive(Clone, Copy, Debug)]
pub struct StreamLimits {
    /// Receive window granted to peer-initiated bidirectional streams
    pub local_bidi_remote_data: VarInt,
    /// Receive window on locally-initiated bidirectional streams
    pub local_bidi_local_data: VarInt,
    /// Receive window granted to peer unidirectional streams
    pub local_uni_data: VarInt,
    pub local_max_streams_bidi: VarInt,
    pub local_max_streams_uni: VarInt,

    /// Send window on peer-initiated bidirectional streams
    pub peer_bidi_remote_data: VarInt,
    /// Send window on locally-initiated bidirectional streams
    pub peer_bidi_local_data: VarInt,
    /// Send window on locally-initiated unidirectional streams
    pub peer_uni_data: VarInt,
    pub peer_max_streams_bidi: VarInt,
    pub peer_max_streams_uni: VarInt,
}

#[derive(Debug, Default)]
struct StreamEntry {
    send: Option<SendStream>,
    recv: Option<ReceiveStream>,
}

impl StreamEntry {
    fn is_finished(&self) -> bool {
        self.send.as_ref().map_or(true, SendStream::is_finished)
            && self.recv.as_ref().map_or(true, ReceiveStream::is_finished)
    }
}

/// Owns every stream on a connection: creation, lookup, count limits,
/// and the accept queue.
pub struct StreamManager {
    local_endpoint: endpoint::Type,
    limits: StreamLimits,
    streams: HashMap<StreamId, StreamEntry, core::hash::BuildHasherDefault<siphasher::sip::SipHasher13>>,

    /// Peer-granted budget for locally-initiated streams, in stream counts
    outgoing_bidi: OutgoingFlowController,
    outgoing_uni: OutgoingFlowController,
    next_local_bidi: u64,
    next_local_uni: u64,

    /// Locally-granted budget for peer-initiated streams
    incoming_bidi: IncomingFlowController,
    incoming_uni: IncomingFlowController,
    opened_remote_bidi: u64,
    opened_remote_uni: u64,

    accept_queue: VecDeque<StreamId>,
    /// STREAMS_BLOCKED limits pending transmission
    pending_streams_blocked: Vec<(StreamType, VarInt)>,
}

impl StreamManager {
    pub fn new(local_endpoint: endpoint::Type, limits: StreamLimits) -> Self {
        Self {
            local_endpoint,
            limits,
            streams: HashMap::default(),
            outgoing_bidi: OutgoingFlowController::new(limits.peer_max_streams_bidi),
            outgoing_uni: OutgoingFlowController::new(limits.peer_max_streams_uni),
            next_local_bidi: 0,
            next_local_uni: 0,
            incoming_bidi: IncomingFlowController::new(limits.local_max_streams_bidi),
            incoming_uni: IncomingFlowController::new(limits.local_max_streams_uni),
            opened_remote_bidi: 0,
            opened_remote_uni: 0,
            accept_queue: VecDeque::new(),
            pending_streams_blocked: Vec::new(),
        }
    }

    /// Opens a locally-initiated stream.
    ///
    /// The next stream ID is only committed after the count-limit check
    /// succeeds; a rejected open leaves the ID generator untouched.
    pub fn open(&mut self, stream_type: StreamType) -> Result<StreamId, connection::Error> {
        let (controller, next) = match stream_type {
            StreamType::Bidirectional => (&mut self.outgoing_bidi, &mut self.next_local_bidi),
            StreamType::Unidirectional => (&mut self.outgoing_uni, &mut self.next_local_uni),
        };

        // peek: the candidate sequence number must fit under the limit
        if *next >= controller.limit().as_u64() {
            let limit = controller.limit();
            if !self
                .pending_streams_blocked
                .iter()
                .any(|(blocked_type, blocked_limit)| {
                    *blocked_type == stream_type && *blocked_limit == limit
                })
            {
                self.pending_streams_blocked.push((stream_type, limit));
            }
            return Err(connection::Error::StreamLimitReached);
        }

        let id = StreamId::nth(self.local_endpoint, stream_type, *next)
            .ok_or(connection::Error::StreamLimitReached)?;

        // commit
        *next += 1;
        controller.acquire(1);

        let send_limit = match stream_type {
            StreamType::Bidirectional => self.limits.peer_bidi_local_data,
            StreamType::Unidirectional => self.limits.peer_uni_data,
        };
        let mut entry = StreamEntry {
            send: Some(SendStream::new(send_limit)),
            recv: None,
        };
        if stream_type.is_bidirectional() {
            entry.recv = Some(ReceiveStream::new(self.limits.local_bidi_local_data));
        }
        self.streams.insert(id, entry);
        Ok(id)
    }

    /// Ensures a peer-referenced stream exists, implicitly opening every
    /// lower-numbered stream of the same type.
    fn ensure_opened(&mut self, id: StreamId) -> Result<(), transport::Error> {
        if self.streams.contains_key(&id) {
            return Ok(());
        }

        let sequence = id.sequence_number();
        if id.initiator() == self.local_endpoint {
            // a frame for a local stream we never opened
            let next = match id.stream_type() {
                StreamType::Bidirectional => self.next_local_bidi,
                StreamType::Unidirectional => self.next_local_uni,
            };
            if sequence >= next {
                return Err(transport::Error::STREAM_STATE_ERROR
                    .with_reason("frame for an unopened local stream"));
            }
            // opened before and since torn down; nothing to do
            return Ok(());
        }

        let (controller, opened) = match id.stream_type() {
            StreamType::Bidirectional => (&mut self.incoming_bidi, &mut self.opened_remote_bidi),
            StreamType::Unidirectional => (&mut self.incoming_uni, &mut self.opened_remote_uni),
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint that receives a frame with a stream ID exceeding the
        //# limit it has sent MUST treat this as a connection error of type
        //# STREAM_LIMIT_ERROR
        let count = VarInt::new(sequence + 1)
            .map_err(|_| transport::Error::STREAM_LIMIT_ERROR)?;
        controller
            .on_data(count)
            .map_err(|_| transport::Error::STREAM_LIMIT_ERROR)?;

        if sequence < *opened {
            // previously opened and torn down
            return Ok(());
        }

        let (recv_limit, send_limit) = match id.stream_type() {
            StreamType::Bidirectional => (
                self.limits.local_bidi_remote_data,
                Some(self.limits.peer_bidi_remote_data),
            ),
            StreamType::Unidirectional => (self.limits.local_uni_data, None),
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
        //# A RESET_STREAM frame, a STREAM frame, or any frame on a
        //# bidirectional stream opens lower-numbered streams of the
        //# same type implicitly.
        for sequence in *opened..=sequence {
            let id = StreamId::nth(self.local_endpoint.peer_type(), id.stream_type(), sequence)
                .ok_or(transport::Error::STREAM_LIMIT_ERROR)?;
            let entry = StreamEntry {
                send: send_limit.map(SendStream::new),
                recv: Some(ReceiveStream::new(recv_limit)),
            };
            self.streams.insert(id, entry);
            self.accept_queue.push_back(id);
        }
        *opened = sequence + 1;

        Ok(())
    }

    /// Dequeues a peer-opened stream for the application
    pub fn accept(&mut self) -> Option<StreamId> {
        self.accept_queue.pop_front()
    }

    fn recv_half(&mut self, id: StreamId) -> Result<&mut ReceiveStream, transport::Error> {
        if !id.is_receivable(self.local_endpoint) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("receive on a send-only stream"));
        }
        self.ensure_opened(id)?;
        self.streams
            .get_mut(&id)
            .and_then(|entry| entry.recv.as_mut())
            .ok_or(transport::Error::STREAM_STATE_ERROR)
    }

    fn send_half(&mut self, id: StreamId) -> Result<&mut SendStream, transport::Error> {
        if !id.is_sendable(self.local_endpoint) {
            return Err(
                transport::Error::STREAM_STATE_ERROR.with_reason("send on a receive-only stream")
            );
        }
        self.ensure_opened(id)?;
        self.streams
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
            .ok_or(transport::Error::STREAM_STATE_ERROR)
    }

    /// Routes a STREAM frame; returns newly accounted connection-flow
    /// bytes
    pub fn on_stream_frame(&mut self, frame: &frame::Stream) -> Result<u64, transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        self.recv_half(id)?.on_stream_frame(frame)
    }

    pub fn on_reset_stream(
        &mut self,
        frame: &frame::ResetStream,
    ) -> Result<u64, transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        self.recv_half(id)?.on_reset(frame)
    }

    pub fn on_stop_sending(&mut self, frame: &frame::StopSending) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
        //# Receiving a STOP_SENDING frame for a
        //# locally initiated stream that has not yet been created MUST be
        //# treated as a connection error of type STREAM_STATE_ERROR.
        self.send_half(id)?
            .on_stop_sending(frame.application_error_code);
        Ok(())
    }

    pub fn on_max_stream_data(
        &mut self,
        frame: &frame::MaxStreamData,
    ) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        if !id.is_sendable(self.local_endpoint) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("max_stream_data for a receive-only stream"));
        }
        self.ensure_opened(id)?;
        // the stream may already be finished; a late window update is fine
        if let Some(send) = self
            .streams
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
        {
            send.on_max_stream_data(frame.maximum_stream_data);
        }
        Ok(())
    }

    pub fn on_max_streams(&mut self, frame: &frame::MaxStreams) {
        let controller = match frame.stream_type {
            StreamType::Bidirectional => &mut self.outgoing_bidi,
            StreamType::Unidirectional => &mut self.outgoing_uni,
        };
        controller.on_max_data(frame.maximum_streams);
    }

    pub fn stream(&mut self, id: StreamId) -> Option<&mut StreamEntry> {
        self.streams.get_mut(&id)
    }

    pub fn send_stream(&mut self, id: StreamId) -> Option<&mut SendStream> {
        self.streams.get_mut(&id).and_then(|entry| entry.send.as_mut())
    }

    pub fn recv_stream(&mut self, id: StreamId) -> Option<&mut ReceiveStream> {
        self.streams.get_mut(&id).and_then(|entry| entry.recv.as_mut())
    }

    /// Reset + stop-sending for an application-cancelled stream
    pub fn reset(&mut self, id: StreamId, code: ApplicationErrorCode) {
        if let Some(entry) = self.streams.get_mut(&id) {
            if let Some(send) = entry.send.as_mut() {
                send.reset(code);
            }
            if let Some(recv) = entry.recv.as_mut() {
                recv.stop_sending(code);
            }
        }
    }

    /// Streams with data or control frames to transmit
    pub fn transmission_candidates(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self
            .streams
            .iter()
            .filter(|(_, entry)| {
                entry
                    .send
                    .as_ref()
                    .is_some_and(SendStream::has_transmission_interest)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// All live stream ids (for ack/loss routing and window polling)
    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn take_pending_streams_blocked(&mut self) -> Vec<(StreamType, VarInt)> {
        core::mem::take(&mut self.pending_streams_blocked)
    }

    /// Drops finished streams and advances the stream-count windows;
    /// grown limits surface later through
    /// [`Self::max_streams_announcements`]
    pub fn cleanup(&mut self) {
        let finished: Vec<_> = self
            .streams
            .iter()
            .filter(|(_, entry)| entry.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            self.streams.remove(&id);
            if id.initiator() != self.local_endpoint {
                let controller = match id.stream_type() {
                    StreamType::Bidirectional => &mut self.incoming_bidi,
                    StreamType::Unidirectional => &mut self.incoming_uni,
                };
                controller.release();
            }
        }
    }

    /// MAX_STREAMS limits to advertise, once per advance
    pub fn max_streams_announcements(&mut self) -> Vec<(StreamType, VarInt)> {
        let mut announcements = Vec::new();
        if let Some(limit) = self.incoming_bidi.announce() {
            announcements.push((StreamType::Bidirectional, limit));
        }
        if let Some(limit) = self.incoming_uni.announce() {
            announcements.push((StreamType::Unidirectional, limit));
        }
        announcements
    }

    /// Forces a MAX_STREAMS re-announcement after a lost frame
    pub fn reannounce_max_streams(&mut self, stream_type: StreamType) {
        match stream_type {
            StreamType::Bidirectional => self.incoming_bidi.reannounce(),
            StreamType::Unidirectional => self.incoming_uni.reannounce(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> StreamLimits {
        StreamLimits {
            local_bidi_remote_data: VarInt::from_u16(10_000),
            local_bidi_local_data: VarInt::from_u16(10_000),
            local_uni_data: VarInt::from_u16(10_000),
            local_max_streams_bidi: VarInt::from_u8(4),
            local_max_streams_uni: VarInt::from_u8(1),
            peer_bidi_remote_data: VarInt::from_u16(10_000),
            peer_bidi_local_data: VarInt::from_u16(10_000),
            peer_uni_data: VarInt::from_u16(10_000),
            peer_max_streams_bidi: VarInt::from_u8(2),
            peer_max_streams_uni: VarInt::from_u8(1),
        }
    }

    fn manager() -> StreamManager {
        StreamManager::new(endpoint::Type::Client, limits())
    }

    #[test]
    fn open_limit_peek_then_commit_test() {
        let mut manager = manager();

        let first = manager.open(StreamType::Bidirectional).unwrap();
        assert_eq!(first.as_varint(), VarInt::from_u8(0));
        let second = manager.open(StreamType::Bidirectional).unwrap();
        assert_eq!(second.as_varint(), VarInt::from_u8(4));

        // the third open is rejected and must not burn an ID
        assert!(matches!(
            manager.open(StreamType::Bidirectional),
            Err(connection::Error::StreamLimitReached)
        ));
        assert_eq!(
            manager.take_pending_streams_blocked(),
            vec![(StreamType::Bidirectional, VarInt::from_u8(2))]
        );

        // once the peer raises the limit, the next ID continues in order
        manager.on_max_streams(&frame::MaxStreams {
            stream_type: StreamType::Bidirectional,
            maximum_streams: VarInt::from_u8(3),
        });
        let third = manager.open(StreamType::Bidirectional).unwrap();
        assert_eq!(third.as_varint(), VarInt::from_u8(8));
    }

    #[test]
    fn remote_implicit_open_test() {
        let mut manager = manager();
        // server stream 1 (bidi seq 0) then seq 2 implies seq 0..=2
        let frame = frame::Stream {
            stream_id: VarInt::from_u8(9), // server bidi, sequence 2
            offset: VarInt::ZERO,
            is_last_frame: false,
            is_fin: false,
            data: b"hi",
        };
        manager.on_stream_frame(&frame).unwrap();

        let mut accepted = Vec::new();
        while let Some(id) = manager.accept() {
            accepted.push(id.as_varint().as_u64());
        }
        assert_eq!(accepted, vec![1, 5, 9]);
    }

    #[test]
    fn remote_stream_limit_test() {
        let mut manager = manager();
        // local limit is 4 bidi streams; server sequence 4 exceeds it
        let frame = frame::Stream {
            stream_id: VarInt::from_u8(17), // server bidi, sequence 4
            offset: VarInt::ZERO,
            is_last_frame: false,
            is_fin: false,
            data: b"",
        };
        assert_eq!(
            manager.on_stream_frame(&frame).unwrap_err().code,
            transport::Error::STREAM_LIMIT_ERROR.code
        );
    }

    #[test]
    fn send_only_stream_rejects_data_test() {
        let mut manager = manager();
        let id = manager.open(StreamType::Unidirectional).unwrap();
        let frame = frame::Stream {
            stream_id: id.as_varint(),
            offset: VarInt::ZERO,
            is_last_frame: false,
            is_fin: false,
            data: b"x",
        };
        assert_eq!(
            manager.on_stream_frame(&frame).unwrap_err().code,
            transport::Error::STREAM_STATE_ERROR.code
        );
    }

    #[test]
    fn unopened_local_stream_frame_test() {
        let mut manager = manager();
        // max_stream_data for client bidi stream 0 which was never opened
        let frame = frame::MaxStreamData {
            stream_id: VarInt::from_u8(0),
            maximum_stream_data: VarInt::from_u16(100),
        };
        assert_eq!(
            manager.on_max_stream_data(&frame).unwrap_err().code,
            transport::Error::STREAM_STATE_ERROR.code
        );
    }

    #[test]
    fn cleanup_advances_count_window_test() {
        let mut manager = manager();

        // peer opens a uni stream and finishes it
        let frame = frame::Stream {
            stream_id: VarInt::from_u8(3), // server uni, sequence 0
            offset: VarInt::ZERO,
            is_last_frame: false,
            is_fin: true,
            data: b"x",
        };
        manager.on_stream_frame(&frame).unwrap();
        let id = manager.accept().unwrap();

        let mut buf = [0u8; 8];
        let recv = manager.recv_stream(id).unwrap();
        recv.read(&mut buf).unwrap();
        assert!(recv.read(&mut buf).is_err()); // Finished

        // local uni limit is 1; once the stream closes the window advances
        manager.cleanup();
        assert!(manager.is_empty());
        assert_eq!(
            manager.max_streams_announcements(),
            vec![(StreamType::Unidirectional, VarInt::from_u8(2))]
        );
        // announced once
        assert!(manager.max_streams_announcements().is_empty());
    }
}
