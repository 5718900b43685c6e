// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-space loss recovery: sent-packet records, RFC 9002 loss
//! detection, and PTO bookkeeping.

use quiver_core::{
    ack::AckRanges,
    application::ApplicationErrorCode,
    frame::ack_elicitation::AckElicitation,
    recovery::{CongestionController, RttEstimator, K_PACKET_THRESHOLD},
    stream::{StreamId, StreamType},
    time::Timestamp,
    varint::VarInt,
};
use std::collections::BTreeMap;

/// What a sent packet carried, for ack and loss routing.
///
/// Only frames whose delivery matters are recorded; PADDING and
/// PATH_CHALLENGE/PATH_RESPONSE are fire-and-forget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentFrame {
    Ping,
    Ack {
        largest_acknowledged: u64,
    },
    Stream {
        id: StreamId,
        offset: u64,
        len: u64,
        is_fin: bool,
    },
    Crypto {
        offset: u64,
        len: u64,
    },
    ResetStream {
        id: StreamId,
        code: ApplicationErrorCode,
        final_size: VarInt,
    },
    StopSending {
        id: StreamId,
        code: ApplicationErrorCode,
    },
    MaxData {
        limit: VarInt,
    },
    MaxStreamData {
        id: StreamId,
        limit: VarInt,
    },
    MaxStreams {
        stream_type: StreamType,
        limit: VarInt,
    },
    DataBlocked {
        limit: VarInt,
    },
    StreamDataBlocked {
        id: StreamId,
        limit: VarInt,
    },
    StreamsBlocked {
        stream_type: StreamType,
        limit: VarInt,
    },
    NewConnectionId {
        sequence_number: VarInt,
    },
    RetireConnectionId {
        sequence_number: VarInt,
    },
    NewToken,
    HandshakeDone,
}

//= https://www.rfc-editor.org/rfc/rfc9002#appendix-A.1.1
//# Each packet contains the following information: ...
#[derive(Clone, Debug, PartialEq, Eq)]
enum PacketState {
    InFlight,
    /// Declared lost; retained so a late acknowledgment cannot credit
    /// `bytes_in_flight` a second time
    Lost,
}

#[derive(Clone, Debug)]
pub struct SentPacketInfo {
    state: PacketState,
    pub time_sent: Timestamp,
    pub sent_bytes: u16,
    pub ack_eliciting: bool,
    /// `false` for pure-ACK and path-probing packets, which never count
    /// against the congestion window
    pub congestion_controlled: bool,
    pub frames: Vec<SentFrame>,
}

impl SentPacketInfo {
    pub fn new(
        time_sent: Timestamp,
        sent_bytes: usize,
        ack_elicitation: AckElicitation,
        congestion_controlled: bool,
        frames: Vec<SentFrame>,
    ) -> Self {
        Self {
            state: PacketState::InFlight,
            time_sent,
            sent_bytes: sent_bytes as u16,
            ack_eliciting: ack_elicitation.is_ack_eliciting(),
            congestion_controlled,
            frames,
        }
    }
}

/// The outcome of processing one ACK frame
#[derive(Debug, Default)]
pub struct AckOutcome {
    /// Frames from newly acknowledged packets, for state routing
    pub acked_frames: Vec<SentFrame>,
    /// The largest packet number newly acknowledged, with its send time,
    /// if it was ack-eliciting (drives the RTT sample)
    pub rtt_sample: Option<Timestamp>,
    pub newly_acked: bool,
    pub newly_acked_bytes: usize,
}

/// Loss recovery state for one packet number space
#[derive(Debug)]
pub struct Manager {
    sent: BTreeMap<u64, SentPacketInfo>,
    largest_acked: Option<u64>,
    /// Earliest time at which a not-yet-expired time-threshold loss
    /// fires
    loss_time: Option<Timestamp>,
    time_of_last_ack_eliciting: Option<Timestamp>,
}

impl Default for Manager {
    fn default() -> Self {
        Self {
            sent: BTreeMap::new(),
            largest_acked: None,
            loss_time: None,
            time_of_last_ack_eliciting: None,
        }
    }
}

impl Manager {
    pub fn on_packet_sent<Cc: CongestionController + ?Sized>(
        &mut self,
        packet_number: u64,
        info: SentPacketInfo,
        cc: &mut Cc,
    ) {
        if info.ack_eliciting {
            self.time_of_last_ack_eliciting = Some(info.time_sent);
        }
        if info.congestion_controlled {
            cc.on_packet_sent(info.sent_bytes as usize, info.time_sent);
        }
        let evicted = self.sent.insert(packet_number, info);
        debug_assert!(evicted.is_none(), "packet number reused within a space");
    }

    #[inline]
    pub fn largest_acked(&self) -> Option<u64> {
        self.largest_acked
    }

    #[inline]
    pub fn loss_time(&self) -> Option<Timestamp> {
        self.loss_time
    }

    #[inline]
    pub fn time_of_last_ack_eliciting(&self) -> Option<Timestamp> {
        self.time_of_last_ack_eliciting
    }

    /// `true` while any ack-eliciting packet is unresolved
    pub fn has_ack_eliciting_in_flight(&self) -> bool {
        self.sent
            .values()
            .any(|info| info.state == PacketState::InFlight && info.ack_eliciting)
    }

    /// Applies the ranges of a received ACK frame.
    ///
    /// Every transition out of `InFlight` credits the congestion
    /// controller exactly once; late acknowledgments of packets already
    /// declared lost only drop the record.
    pub fn on_ack_ranges<Cc: CongestionController + ?Sized>(
        &mut self,
        ranges: &AckRanges,
        now: Timestamp,
        rtt_estimator: &RttEstimator,
        cc: &mut Cc,
    ) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let largest_in_frame = ranges.max_value().unwrap_or(0);

        for range in ranges.iter() {
            let acked: Vec<u64> = self
                .sent
                .range(range.clone())
                .map(|(packet_number, _)| *packet_number)
                .collect();

            for packet_number in acked {
                let info = self.sent.remove(&packet_number).expect("key just observed");
                match info.state {
                    PacketState::InFlight => {
                        outcome.newly_acked = true;
                        if info.congestion_controlled {
                            outcome.newly_acked_bytes += info.sent_bytes as usize;
                            cc.on_ack(info.time_sent, info.sent_bytes as usize, rtt_estimator, now);
                        }
                        if packet_number == largest_in_frame && info.ack_eliciting {
                            outcome.rtt_sample = Some(info.time_sent);
                        }
                        outcome.acked_frames.extend(info.frames);
                    }
                    // a late ack for a packet already declared lost:
                    // the counter was credited at loss declaration
                    PacketState::Lost => {}
                }
            }
        }

        self.largest_acked = Some(
            self.largest_acked
                .map_or(largest_in_frame, |largest| largest.max(largest_in_frame)),
        );

        outcome
    }

    /// Runs RFC 9002 §6.1 loss detection. Returns the frames of every
    /// newly lost packet and whether persistent congestion was declared.
    pub fn detect_lost<Cc: CongestionController + ?Sized>(
        &mut self,
        now: Timestamp,
        rtt_estimator: &RttEstimator,
        cc: &mut Cc,
    ) -> (Vec<SentFrame>, bool) {
        let Some(largest_acked) = self.largest_acked else {
            return (Vec::new(), false);
        };

        let time_threshold = rtt_estimator.loss_time_threshold();
        let mut lost_frames = Vec::new();
        let mut lost_send_times: Vec<Timestamp> = Vec::new();
        self.loss_time = None;

        let candidates: Vec<u64> = self
            .sent
            .range(..=largest_acked)
            .filter(|(_, info)| info.state == PacketState::InFlight)
            .map(|(packet_number, _)| *packet_number)
            .collect();

        for packet_number in candidates {
            let info = &self.sent[&packet_number];

            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1
            //# A packet is declared lost if it meets all of the following
            //# conditions: ...
            //# *  the packet was sent kPacketThreshold packets before an
            //#    acknowledged packet (Section 6.1.1), or it was sent long enough in
            //#    the past (Section 6.1.2).
            let packet_threshold_met =
                largest_acked.saturating_sub(packet_number) >= K_PACKET_THRESHOLD;
            let lost_after = info.time_sent + time_threshold;
            let time_threshold_met = lost_after.has_elapsed(now);

            if packet_threshold_met || time_threshold_met {
                let mut info = self.sent.remove(&packet_number).expect("key just observed");
                if info.congestion_controlled {
                    // single credit: InFlight -> Lost
                    cc.on_packet_lost(info.sent_bytes as usize, info.time_sent, false, now);
                }
                if info.ack_eliciting {
                    lost_send_times.push(info.time_sent);
                }
                lost_frames.append(&mut info.frames);
                info.state = PacketState::Lost;
                // keep a tombstone so a late ack is not double-credited
                self.sent.insert(packet_number, info);
            } else {
                // not lost yet; schedule the earliest time it could be
                let when = self
                    .loss_time
                    .map_or(lost_after, |existing| existing.min(lost_after));
                self.loss_time = Some(when);
            }
        }

        let persistent = self.persistent_congestion(&lost_send_times, rtt_estimator);
        if persistent {
            if let Some(time_sent) = lost_send_times.first() {
                cc.on_packet_lost(0, *time_sent, true, now);
            }
        }

        (lost_frames, persistent)
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
    //# A sender establishes persistent congestion after the receipt of an
    //# acknowledgment if two packets that are ack-eliciting are declared
    //# lost, and:
    //# *  across all packet number spaces, none of the packets sent between
    //#    the send times of these two packets are acknowledged;
    //# *  the duration between the send times of these two packets exceeds
    //#    the persistent congestion duration (Section 7.6.1)
    fn persistent_congestion(
        &self,
        lost_send_times: &[Timestamp],
        rtt_estimator: &RttEstimator,
    ) -> bool {
        let (Some(first), Some(last)) = (lost_send_times.first(), lost_send_times.last()) else {
            return false;
        };

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# The persistent congestion period SHOULD NOT start until there is at
        //# least one RTT sample.
        let Some(first_sample) = rtt_estimator.first_rtt_sample() else {
            return false;
        };
        if *first < first_sample {
            return false;
        }

        let duration = (rtt_estimator.smoothed_rtt()
            + (rtt_estimator.rttvar() * 4).max(quiver_core::time::K_GRANULARITY)
            + rtt_estimator.max_ack_delay())
            * quiver_core::recovery::K_PERSISTENT_CONGESTION_THRESHOLD;

        last.saturating_duration_since(*first) > duration
    }

    /// Abandons the space: every in-flight packet is credited once as
    /// discarded, with no congestion signal
    pub fn discard<Cc: CongestionController + ?Sized>(&mut self, cc: &mut Cc) {
        for (_, info) in core::mem::take(&mut self.sent) {
            if info.state == PacketState::InFlight && info.congestion_controlled {
                cc.on_packet_discarded(info.sent_bytes as usize);
            }
        }
        self.loss_time = None;
        self.time_of_last_ack_eliciting = None;
    }

    /// Drops tombstones below the largest acknowledged value to bound
    /// memory
    pub fn prune_tombstones(&mut self) {
        let Some(largest_acked) = self.largest_acked else {
            return;
        };
        self.sent.retain(|packet_number, info| {
            info.state == PacketState::InFlight || *packet_number > largest_acked
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use quiver_core::recovery::reno::Reno;

    const MSS: u16 = 1200;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn ping_packet(time_sent: Timestamp) -> SentPacketInfo {
        SentPacketInfo::new(
            time_sent,
            100,
            AckElicitation::Eliciting,
            true,
            vec![SentFrame::Ping],
        )
    }

    fn ranges(list: &[(u64, u64)]) -> AckRanges {
        let mut ranges = AckRanges::new();
        for (start, end) in list {
            ranges.insert_range(*start..=*end);
        }
        ranges
    }

    #[test]
    fn reordering_threshold_test() {
        let mut manager = Manager::default();
        let mut cc = Reno::new(MSS);
        let rtt = RttEstimator::default();

        for packet_number in 1..=10 {
            manager.on_packet_sent(packet_number, ping_packet(at(packet_number * 10)), &mut cc);
        }
        assert_eq!(cc.bytes_in_flight(), 1000);

        // packets 4..=10 are acked; 1..=3 fall behind by >= 3
        let outcome = manager.on_ack_ranges(&ranges(&[(4, 10)]), at(200), &rtt, &mut cc);
        assert!(outcome.newly_acked);
        assert_eq!(outcome.newly_acked_bytes, 700);

        let (lost, persistent) = manager.detect_lost(at(200), &rtt, &mut cc);
        assert!(!persistent);
        assert_eq!(lost.len(), 3);
        // 1..=3 credited on loss declaration, nothing else remains
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    #[test]
    fn late_ack_after_loss_single_credit_test() {
        let mut manager = Manager::default();
        let mut cc = Reno::new(MSS);
        let rtt = RttEstimator::default();

        for packet_number in 1..=5 {
            manager.on_packet_sent(packet_number, ping_packet(at(10)), &mut cc);
        }
        manager.on_ack_ranges(&ranges(&[(5, 5)]), at(100), &rtt, &mut cc);
        manager.detect_lost(at(100), &rtt, &mut cc);
        assert_eq!(cc.bytes_in_flight(), 0);

        // a late ack for the lost packets must not credit again
        let outcome = manager.on_ack_ranges(&ranges(&[(1, 4)]), at(120), &rtt, &mut cc);
        assert!(!outcome.newly_acked);
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    #[test]
    fn time_threshold_test() {
        let mut manager = Manager::default();
        let mut cc = Reno::new(MSS);
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            at(0),
            quiver_core::packet::number::PacketNumberSpace::ApplicationData,
        );

        manager.on_packet_sent(1, ping_packet(at(0)), &mut cc);
        manager.on_packet_sent(2, ping_packet(at(5)), &mut cc);
        manager.on_ack_ranges(&ranges(&[(2, 2)]), at(105), &rtt, &mut cc);

        // packet 1 is only one behind, but 9/8 * 100ms after its send
        // time it expires by the time threshold
        let (lost, _) = manager.detect_lost(at(105), &rtt, &mut cc);
        assert!(lost.is_empty());
        let loss_time = manager.loss_time().unwrap();
        assert_eq!(loss_time, at(0) + Duration::from_micros(112_500));

        let (lost, _) = manager.detect_lost(loss_time, &rtt, &mut cc);
        assert_eq!(lost.len(), 1);
    }

    #[test]
    fn discard_credits_once_test() {
        let mut manager = Manager::default();
        let mut cc = Reno::new(MSS);

        manager.on_packet_sent(1, ping_packet(at(0)), &mut cc);
        manager.on_packet_sent(2, ping_packet(at(1)), &mut cc);
        assert_eq!(cc.bytes_in_flight(), 200);

        manager.discard(&mut cc);
        assert_eq!(cc.bytes_in_flight(), 0);

        // discarding twice is a no-op
        manager.discard(&mut cc);
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    #[test]
    fn rtt_sample_only_for_largest_test() {
        let mut manager = Manager::default();
        let mut cc = Reno::new(MSS);
        let rtt = RttEstimator::default();

        manager.on_packet_sent(1, ping_packet(at(10)), &mut cc);
        manager.on_packet_sent(2, ping_packet(at(20)), &mut cc);

        let outcome = manager.on_ack_ranges(&ranges(&[(1, 2)]), at(100), &rtt, &mut cc);
        assert_eq!(outcome.rtt_sample, Some(at(20)));
    }
}
