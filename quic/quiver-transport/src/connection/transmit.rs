// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outbound packet assembly.
//!
//! `transmit` produces at most one UDP datagram per call, coalescing an
//! Initial, a Handshake, and a 1-RTT packet when several levels have
//! data. Frames are gathered into per-level payload plans first; the
//! plans are then encoded, padded if the datagram carries an Initial,
//! and sealed in place.

use super::{space_index, Connection, SentFrame, SentPacketInfo};
use crate::stream::Transmission;
use quiver_core::{
    crypto::EncryptionLevel,
    frame::{self, ack_elicitation::AckElicitation},
    packet::{self, number::PacketNumberSpace},
    random,
    recovery::CongestionController,
    stream::StreamId,
    time::Timestamp,
    transport,
    varint::VarInt,
};
use quiver_codec::{Encoder, EncoderBuffer, EncoderValue};

/// AEAD tag length for every supported suite
const TAG_LEN: usize = 16;

/// A packet planned for one encryption level
struct PlannedPacket {
    level: EncryptionLevel,
    payload: Vec<u8>,
    frames: Vec<SentFrame>,
    elicitation: AckElicitation,
    congestion_controlled: bool,
}

impl PlannedPacket {
    fn new(level: EncryptionLevel) -> Self {
        Self {
            level,
            payload: Vec::new(),
            frames: Vec::new(),
            elicitation: AckElicitation::NonEliciting,
            congestion_controlled: false,
        }
    }

    fn push(&mut self, frame: &frame::Frame, sent: Option<SentFrame>) {
        encode_into(&mut self.payload, frame);
        self.elicitation = self.elicitation.merge(frame.ack_elicitation());
        self.congestion_controlled |= frame.is_congestion_controlled();
        if let Some(sent) = sent {
            self.frames.push(sent);
        }
    }

    fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

fn encode_into(payload: &mut Vec<u8>, frame: &frame::Frame) {
    let size = frame.encoding_size();
    let start = payload.len();
    payload.resize(start + size, 0);
    let mut encoder = EncoderBuffer::new(&mut payload[start..]);
    encoder.encode(frame);
    debug_assert_eq!(encoder.len(), size);
}

impl<S: quiver_core::crypto::tls::Session, R: random::Generator> Connection<S, R> {
    /// Produces the next outgoing datagram into `buf`.
    ///
    /// Returns the datagram length and destination, or `None` when there
    /// is nothing to send (including when blocked by congestion control
    /// or the anti-amplification limit).
    pub fn transmit(&mut self, buf: &mut [u8], now: Timestamp) -> Option<usize> {
        if self.state.is_closed() || self.state.is_draining() {
            return None;
        }

        if self.state.is_closing() {
            return self.transmit_close(buf);
        }

        let mut budget = buf.len().min(self.max_datagram_size as usize);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
        //# the server MUST NOT send more than three times as many bytes as the
        //# number of bytes it has received
        if !self.path.is_validated() {
            let credit = self.path.amplification_credit();
            if credit == 0 {
                return None;
            }
            budget = budget.min(credit.min(usize::MAX as u64) as usize);
        }

        // congestion budget applies to congestion-controlled payload
        // only; PTO probes may exceed the window
        let mut cc_budget = if self.probes_pending > 0 {
            usize::MAX
        } else {
            self.cc.available_congestion_window() as usize
        };

        let mut plans: Vec<PlannedPacket> = Vec::new();
        let mut remaining = budget;

        for level in [
            EncryptionLevel::Initial,
            EncryptionLevel::Handshake,
            EncryptionLevel::OneRtt,
        ] {
            if remaining < self.packet_overhead(level) + 16 {
                break;
            }
            if !self.crypto.can_seal(level) {
                continue;
            }
            if self.spaces[space_index(level.packet_number_space())].is_none() {
                continue;
            }

            let capacity = remaining - self.packet_overhead(level);
            let plan = self.plan_packet(level, capacity, &mut cc_budget, now);
            if plan.is_empty() {
                continue;
            }
            remaining -= self.packet_overhead(level) + plan.payload.len();
            plans.push(plan);
        }

        if plans.is_empty() {
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
        //# a client MUST expand the payload of all UDP datagrams carrying
        //# Initial packets to at least the smallest allowed maximum datagram
        //# size of 1200 bytes
        let carries_initial = plans
            .iter()
            .any(|plan| plan.level == EncryptionLevel::Initial);
        let must_pad = carries_initial
            && (self.endpoint_type.is_client()
                || plans.iter().any(|plan| {
                    plan.level == EncryptionLevel::Initial
                        && plan.elicitation.is_ack_eliciting()
                }));
        if must_pad {
            // size against the smallest possible headers so the sealed
            // datagram is never below the target
            let overhead: usize = plans
                .iter()
                .map(|plan| self.packet_overhead_min(plan.level))
                .sum();
            let total: usize = overhead + plans.iter().map(|plan| plan.payload.len()).sum::<usize>();
            let target = packet::MIN_INITIAL_DATAGRAM_LEN.min(budget);
            if total < target {
                let padding = target - total;
                let last = plans.last_mut().expect("plans is non-empty");
                last.push(&frame::Frame::Padding(frame::Padding { length: padding }), None);
            }
        }

        // encode and seal each plan
        let mut offset = 0;
        let mut ack_eliciting = false;
        for plan in plans {
            ack_eliciting |= plan.elicitation.is_ack_eliciting();
            let len = self.seal_packet(&mut buf[offset..], plan, now)?;
            offset += len;
        }

        self.path.on_bytes_sent(offset);
        self.stats_bytes_sent += offset as u64;
        if ack_eliciting {
            self.rearm_idle_timer(now);
        }
        Some(offset)
    }

    /// Worst-case header + tag size for a packet at `level`
    fn packet_overhead(&self, level: EncryptionLevel) -> usize {
        let dcid_len = self.peer_ids.active_id().len();
        let scid_len = self
            .local_ids
            .active_ids()
            .next()
            .map_or(0, |id| id.len());
        match level {
            EncryptionLevel::OneRtt => 1 + dcid_len + 4 + TAG_LEN,
            EncryptionLevel::Initial => {
                // first byte + version + both prefixed cids + token
                // prefix + token + length + pn
                1 + 4 + (1 + dcid_len) + (1 + scid_len) + 4 + self.token.len() + 4 + 4 + TAG_LEN
            }
            _ => 1 + 4 + (1 + dcid_len) + (1 + scid_len) + 4 + 4 + TAG_LEN,
        }
    }

    /// Smallest possible header + tag size, for padding calculations
    fn packet_overhead_min(&self, level: EncryptionLevel) -> usize {
        let dcid_len = self.peer_ids.active_id().len();
        let scid_len = self
            .local_ids
            .active_ids()
            .next()
            .map_or(0, |id| id.len());
        match level {
            EncryptionLevel::OneRtt => 1 + dcid_len + 1 + TAG_LEN,
            EncryptionLevel::Initial => {
                let token_prefix = VarInt::try_from(self.token.len())
                    .unwrap_or(VarInt::MAX)
                    .encoding_len();
                1 + 4
                    + (1 + dcid_len)
                    + (1 + scid_len)
                    + token_prefix
                    + self.token.len()
                    + 1
                    + 1
                    + TAG_LEN
            }
            _ => 1 + 4 + (1 + dcid_len) + (1 + scid_len) + 1 + 1 + TAG_LEN,
        }
    }

    fn plan_packet(
        &mut self,
        level: EncryptionLevel,
        capacity: usize,
        cc_budget: &mut usize,
        now: Timestamp,
    ) -> PlannedPacket {
        let pn_space = level.packet_number_space();
        let mut plan = PlannedPacket::new(level);

        // acknowledgments are free of congestion control and always fit
        // first
        let ack_due = {
            let space = self.spaces[space_index(pn_space)]
                .as_mut()
                .expect("caller checked the space");
            space.ack_manager.should_transmit(now)
        };
        if ack_due {
            let frame = self.spaces[space_index(pn_space)]
                .as_mut()
                .and_then(|space| space.ack_manager.frame(now));
            if let Some(ack) = frame {
                let largest = ack.largest_acknowledged().as_u64();
                let frame = frame::Frame::Ack(ack);
                if frame.encoding_size() <= capacity {
                    plan.push(
                        &frame,
                        Some(SentFrame::Ack {
                            largest_acknowledged: largest,
                        }),
                    );
                }
            }
        }

        // everything below is congestion controlled
        let mut data_capacity = (capacity - plan.payload.len()).min(*cc_budget);

        // CRYPTO data
        loop {
            if data_capacity < 8 {
                break;
            }
            let chunk = {
                let space = self.spaces[space_index(pn_space)]
                    .as_mut()
                    .expect("caller checked the space");
                space.crypto.next_transmission(data_capacity - 8)
            };
            let Some((offset, data)) = chunk else { break };
            let sent = SentFrame::Crypto {
                offset: offset.as_u64(),
                len: data.len() as u64,
            };
            let frame = frame::Frame::Crypto(frame::Crypto {
                offset,
                data: &data,
            });
            let size = frame.encoding_size();
            plan.push(&frame, Some(sent));
            data_capacity = data_capacity.saturating_sub(size);
        }

        if level == EncryptionLevel::OneRtt && self.state.is_connected() {
            self.plan_application_frames(&mut plan, &mut data_capacity, now);
        }

        // PTO probes: ensure something ack-eliciting leaves
        if self.probes_pending > 0 {
            let eliciting_exists = {
                let space = self.spaces[space_index(pn_space)]
                    .as_ref()
                    .expect("caller checked the space");
                space.recovery.has_ack_eliciting_in_flight()
            };
            if eliciting_exists || level == EncryptionLevel::OneRtt {
                if !plan.elicitation.is_ack_eliciting() && data_capacity >= 1 {
                    plan.push(&frame::Frame::Ping(frame::Ping), Some(SentFrame::Ping));
                }
                if plan.elicitation.is_ack_eliciting() {
                    self.probes_pending = self.probes_pending.saturating_sub(1);
                }
            }
        }

        if plan.congestion_controlled {
            *cc_budget = cc_budget.saturating_sub(plan.payload.len());
        }
        plan
    }

    fn plan_application_frames(
        &mut self,
        plan: &mut PlannedPacket,
        capacity: &mut usize,
        _now: Timestamp,
    ) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
        //# The server ... sends a HANDSHAKE_DONE frame ... to signal
        //# confirmation of the handshake to the client.
        if self.handshake_done_pending && *capacity >= 1 {
            plan.push(
                &frame::Frame::HandshakeDone(frame::HandshakeDone),
                Some(SentFrame::HandshakeDone),
            );
            self.handshake_done_pending = false;
            *capacity -= 1;
        }

        if let Some(token) = self.pending_new_token.take() {
            let frame = frame::Frame::NewToken(frame::NewToken { token: &token });
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(&frame, Some(SentFrame::NewToken));
                *capacity -= size;
            } else {
                self.pending_new_token = Some(token);
            }
        }

        // connection-level MAX_DATA
        if let Some(limit) = self.flow_rx.announce() {
            let frame = frame::Frame::MaxData(frame::MaxData {
                maximum_data: limit,
            });
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(&frame, Some(SentFrame::MaxData { limit }));
                *capacity -= size;
            } else {
                self.flow_rx.reannounce();
            }
        }

        // DATA_BLOCKED
        if let Some(limit) = self.flow_tx.blocked_frame() {
            let frame = frame::Frame::DataBlocked(frame::DataBlocked { data_limit: limit });
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(&frame, Some(SentFrame::DataBlocked { limit }));
                *capacity -= size;
            }
        }

        // path validation
        if let Some(response) = self.path.pop_pending_response() {
            let frame = frame::Frame::PathResponse(response);
            if frame.encoding_size() <= *capacity {
                let size = frame.encoding_size();
                plan.push(&frame, None);
                *capacity -= size;
            }
        }
        if let Some(path) = self.probing_path.as_mut() {
            if let Some(challenge) = path.take_pending_challenge() {
                let frame = frame::Frame::PathChallenge(challenge);
                let size = frame.encoding_size();
                if size <= *capacity {
                    plan.push(&frame, None);
                    *capacity -= size;
                }
            }
            if let Some(response) = path.pop_pending_response() {
                let frame = frame::Frame::PathResponse(response);
                let size = frame.encoding_size();
                if size <= *capacity {
                    plan.push(&frame, None);
                    *capacity -= size;
                }
            }
        }

        // connection id maintenance
        for announcement in self.local_ids.pending_announcements() {
            let sequence_number = announcement.sequence_number;
            let frame = frame::Frame::NewConnectionId(announcement);
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(&frame, Some(SentFrame::NewConnectionId { sequence_number }));
                *capacity -= size;
            } else {
                self.local_ids.on_announcement_loss(sequence_number);
            }
        }
        for retirement in self.peer_ids.pending_retirements() {
            let sequence_number = retirement.sequence_number;
            let frame = frame::Frame::RetireConnectionId(retirement);
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(
                    &frame,
                    Some(SentFrame::RetireConnectionId { sequence_number }),
                );
                *capacity -= size;
            } else {
                self.peer_ids.on_retirement_loss(sequence_number);
            }
        }

        let Some(streams) = self.streams.as_mut() else {
            return;
        };

        // MAX_STREAMS
        for (stream_type, limit) in streams.max_streams_announcements() {
            let frame = frame::Frame::MaxStreams(frame::MaxStreams {
                stream_type,
                maximum_streams: limit,
            });
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(&frame, Some(SentFrame::MaxStreams { stream_type, limit }));
                *capacity -= size;
            } else {
                streams.reannounce_max_streams(stream_type);
            }
        }

        // STREAMS_BLOCKED
        for (stream_type, limit) in streams.take_pending_streams_blocked() {
            let frame = frame::Frame::StreamsBlocked(frame::StreamsBlocked {
                stream_type,
                stream_limit: limit,
            });
            let size = frame.encoding_size();
            if size <= *capacity {
                plan.push(
                    &frame,
                    Some(SentFrame::StreamsBlocked { stream_type, limit }),
                );
                *capacity -= size;
            }
        }

        // per-stream control and data
        for id in streams.ids() {
            if *capacity < 8 {
                break;
            }

            // window updates for receiving halves
            if let Some(recv) = streams.recv_stream(id) {
                if let Some(limit) = recv.window_announcement() {
                    let frame = frame::Frame::MaxStreamData(frame::MaxStreamData {
                        stream_id: id.into(),
                        maximum_stream_data: limit,
                    });
                    let size = frame.encoding_size();
                    if size <= *capacity {
                        plan.push(&frame, Some(SentFrame::MaxStreamData { id, limit }));
                        *capacity -= size;
                    } else {
                        recv.reannounce_window();
                    }
                }
                if let Some(code) = recv.take_pending_stop_sending() {
                    let frame = frame::Frame::StopSending(frame::StopSending {
                        stream_id: id.into(),
                        application_error_code: code,
                    });
                    let size = frame.encoding_size();
                    if size <= *capacity {
                        plan.push(&frame, Some(SentFrame::StopSending { id, code }));
                        *capacity -= size;
                    }
                }
            }

            let Some(send) = streams.send_stream(id) else {
                continue;
            };

            // RESET_STREAM
            if let Some((code, final_size)) = send.take_pending_reset() {
                let frame = frame::Frame::ResetStream(frame::ResetStream {
                    stream_id: id.into(),
                    application_error_code: code,
                    final_size,
                });
                let size = frame.encoding_size();
                if size <= *capacity {
                    plan.push(
                        &frame,
                        Some(SentFrame::ResetStream {
                            id,
                            code,
                            final_size,
                        }),
                    );
                    *capacity -= size;
                }
                continue;
            }

            // STREAM_DATA_BLOCKED
            if let Some(limit) = send.blocked_frame() {
                let frame = frame::Frame::StreamDataBlocked(frame::StreamDataBlocked {
                    stream_id: id.into(),
                    stream_data_limit: limit,
                });
                let size = frame.encoding_size();
                if size <= *capacity {
                    plan.push(&frame, Some(SentFrame::StreamDataBlocked { id, limit }));
                    *capacity -= size;
                }
            }

            // STREAM data, gated by both windows
            loop {
                // tag + stream id + offset + worst-case length prefix
                let overhead = 1 + id.as_varint().encoding_len() + 8 + 4;
                if *capacity <= overhead {
                    break;
                }
                let connection_credit = self.flow_tx.available().min(usize::MAX as u64) as usize;
                let Some((transmission, consumed)) =
                    send.next_transmission(*capacity - overhead, connection_credit)
                else {
                    break;
                };
                self.flow_tx.acquire(consumed);

                let Transmission {
                    offset,
                    data,
                    is_fin,
                } = transmission;
                let sent = SentFrame::Stream {
                    id,
                    offset,
                    len: data.len() as u64,
                    is_fin,
                };
                let frame = frame::Frame::Stream(frame::Stream {
                    stream_id: id.into(),
                    offset: VarInt::new(offset).expect("stream offsets stay in range"),
                    is_last_frame: false,
                    is_fin,
                    data: &data,
                });
                let size = frame.encoding_size();
                plan.push(&frame, Some(sent));
                *capacity = capacity.saturating_sub(size);
            }
        }
    }

    /// Encodes, seals, and records one planned packet
    fn seal_packet(
        &mut self,
        buf: &mut [u8],
        plan: PlannedPacket,
        now: Timestamp,
    ) -> Option<usize> {
        let level = plan.level;
        let pn_space = level.packet_number_space();

        let (packet_number, truncated) = {
            let space = self.spaces[space_index(pn_space)].as_mut()?;
            let largest_acked = space.largest_acked_packet_number();
            let packet_number = space.next_packet_number();
            let truncated = packet_number.truncate(largest_acked)?;
            (packet_number, truncated)
        };
        let pn_len = truncated.len();

        let dcid = *self.peer_ids.active_id();
        let scid = self
            .local_ids
            .active_ids()
            .next()
            .copied()
            .unwrap_or(quiver_core::connection::ConnectionId::EMPTY);

        let remaining_len = pn_len.bytesize() + plan.payload.len() + TAG_LEN;
        let mut encoder = EncoderBuffer::new(buf);
        let pn_offset = match level {
            EncryptionLevel::OneRtt => {
                let key_phase = self.crypto.key_phase();
                packet::encode_short_header(&mut encoder, &dcid, key_phase, pn_len)
            }
            EncryptionLevel::Initial => packet::encode_long_header(
                &mut encoder,
                packet::LongType::Initial,
                self.version,
                &dcid,
                &scid,
                Some(&self.token),
                pn_len,
                remaining_len,
            ),
            EncryptionLevel::Handshake => packet::encode_long_header(
                &mut encoder,
                packet::LongType::Handshake,
                self.version,
                &dcid,
                &scid,
                None,
                pn_len,
                remaining_len,
            ),
            EncryptionLevel::ZeroRtt => packet::encode_long_header(
                &mut encoder,
                packet::LongType::ZeroRtt,
                self.version,
                &dcid,
                &scid,
                None,
                pn_len,
                remaining_len,
            ),
        };

        encoder.encode(&truncated);
        encoder.write_slice(&plan.payload);
        encoder.write_repeated(TAG_LEN, 0);
        let total = encoder.len();

        let (key, header_key, _) = self.crypto.sealer(level)?;
        packet::seal(
            key,
            header_key,
            &mut buf[..total],
            pn_offset,
            pn_len,
            packet_number,
        )
        .ok()?;

        // record for recovery; pure-ACK packets stay out of the
        // congestion controller
        let info = SentPacketInfo::new(
            now,
            total,
            plan.elicitation,
            plan.congestion_controlled,
            plan.frames,
        );
        let space = self.spaces[space_index(pn_space)].as_mut()?;
        space
            .recovery
            .on_packet_sent(packet_number.as_u64(), info, &mut self.cc);

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
        //# a client MUST discard Initial keys when it first sends a Handshake
        //# packet
        if self.endpoint_type.is_client() && level == EncryptionLevel::Handshake {
            self.discard_space(PacketNumberSpace::Initial);
        }

        Some(total)
    }

    /// Sends (or re-sends, rate limited) the CONNECTION_CLOSE datagram
    fn transmit_close(&mut self, buf: &mut [u8]) -> Option<usize> {
        let close = self.close_state.as_mut()?;
        if !close.close_pending {
            return None;
        }
        close.close_pending = false;

        let level = if self.crypto.can_seal(EncryptionLevel::OneRtt) {
            EncryptionLevel::OneRtt
        } else if self.crypto.can_seal(EncryptionLevel::Handshake) {
            EncryptionLevel::Handshake
        } else {
            EncryptionLevel::Initial
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.3
        //# A CONNECTION_CLOSE of type 0x1d MUST be replaced by a
        //# CONNECTION_CLOSE of type 0x1c when sending the frame in Initial or
        //# Handshake packets.  Otherwise, information about the application
        //# state might be disclosed.  Endpoints MUST clear the value of the
        //# Reason Phrase field and SHOULD use the APPLICATION_ERROR code when
        //# converting to a CONNECTION_CLOSE of type 0x1c.
        let frame = match (&close.application_close, level) {
            (Some((code, reason)), EncryptionLevel::OneRtt) => {
                frame::ConnectionClose::from_application_close(*code, reason)
            }
            (Some(_), _) => frame::ConnectionClose {
                error_code: transport::Error::APPLICATION_ERROR.code,
                frame_type: Some(VarInt::ZERO),
                reason: &[],
            },
            (None, _) => frame::ConnectionClose::from_transport_error(close.error),
        };

        let mut plan = PlannedPacket::new(level);
        plan.push(&frame::Frame::ConnectionClose(frame), None);

        let now = close.drain_deadline; // timestamp only used for records
        let len = self.seal_packet(buf, plan, now)?;
        self.path.on_bytes_sent(len);
        self.stats_bytes_sent += len as u64;
        Some(len)
    }

    /// `true` when a call to `transmit` could produce a packet
    pub fn has_transmission_interest(&self, now: Timestamp) -> bool {
        if self.state.is_closed() || self.state.is_draining() {
            return false;
        }
        if let Some(close) = &self.close_state {
            return close.close_pending;
        }
        if self.probes_pending > 0 || self.handshake_done_pending {
            return true;
        }
        for space in self.spaces.iter().flatten() {
            if space.ack_manager.should_transmit(now) || space.crypto.has_transmission_interest() {
                return true;
            }
        }
        if self.local_ids.has_pending_announcements() || self.peer_ids.has_pending_retirements() {
            return true;
        }
        if self.path.has_pending_response() {
            return true;
        }
        if let Some(streams) = self.streams.as_ref() {
            if !streams.transmission_candidates().is_empty() {
                return true;
            }
        }
        false
    }
}
