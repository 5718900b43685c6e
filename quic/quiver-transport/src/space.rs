// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-packet-number-space state: the transmit counter, the receive
//! record + ACK generator, the CRYPTO stream, and loss recovery.

use crate::{crypto_stream::CryptoStream, recovery};
use quiver_core::{
    ack::{scale_ack_delay, AckRanges},
    frame,
    inet::{EcnCounts, ExplicitCongestionNotification},
    packet::number::{PacketNumber, PacketNumberSpace},
    recovery::RttEstimator,
    time::{Timer, Timestamp},
    varint::VarInt,
};
use core::time::Duration;

/// Receive-side record and ACK scheduling for one space
#[derive(Debug)]
pub struct AckManager {
    ranges: AckRanges,
    /// Packet numbers below this were pruned after our own ACK frames
    /// were acknowledged; anything below is treated as a duplicate
    lowest_tracked: u64,
    largest_received: Option<(u64, Timestamp)>,
    ecn_counts: EcnCounts,
    /// Ack-eliciting packets received since the last ACK went out
    eliciting_since_ack: u8,
    ack_timer: Timer,
    immediate_ack: bool,
    max_ack_delay: Duration,
    ack_delay_exponent: u8,
}

impl AckManager {
    pub fn new(max_ack_delay: Duration, ack_delay_exponent: u8) -> Self {
        Self {
            ranges: AckRanges::new(),
            lowest_tracked: 0,
            largest_received: None,
            ecn_counts: EcnCounts::default(),
            eliciting_since_ack: 0,
            ack_timer: Timer::default(),
            immediate_ack: false,
            max_ack_delay,
            ack_delay_exponent,
        }
    }

    /// `true` if the packet number was already processed (or is too old
    /// to verify)
    pub fn is_duplicate(&self, packet_number: u64) -> bool {
        packet_number < self.lowest_tracked || self.ranges.contains(packet_number)
    }

    /// Records a successfully processed packet and schedules the ACK.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.2
    //# A receiver SHOULD send an ACK frame after receiving at least two
    //# ack-eliciting packets.
    pub fn on_packet_received(
        &mut self,
        packet_number: u64,
        ack_eliciting: bool,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
        rtt_estimator: &RttEstimator,
    ) {
        let out_of_order = self
            .largest_received
            .is_some_and(|(largest, _)| packet_number < largest);

        if self
            .largest_received
            .map_or(true, |(largest, _)| packet_number > largest)
        {
            self.largest_received = Some((packet_number, now));
        }
        self.ranges.insert_value(packet_number);
        self.ecn_counts.on_packet(ecn);

        if !ack_eliciting {
            // non-eliciting packets never arm the ACK timer
            return;
        }

        self.eliciting_since_ack = self.eliciting_since_ack.saturating_add(1);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
        //# Similarly, packets marked with the ECN Congestion Experienced (CE)
        //# codepoint in the IP header SHOULD be acknowledged immediately
        if out_of_order || self.eliciting_since_ack >= 2 || ecn.congestion_experienced() {
            self.immediate_ack = true;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
        //# An endpoint MUST acknowledge all ack-eliciting Initial and Handshake
        //# packets immediately
        if self.max_ack_delay.is_zero() {
            self.immediate_ack = true;
            return;
        }

        let delay = self.max_ack_delay.min(rtt_estimator.smoothed_rtt() / 8);
        self.ack_timer.set_min(now + delay);
    }

    /// `true` when an ACK frame should go out now
    pub fn should_transmit(&self, now: Timestamp) -> bool {
        !self.ranges.is_empty() && (self.immediate_ack || self.ack_timer.is_expired(now))
    }

    pub fn ack_timer_deadline(&self) -> Option<Timestamp> {
        self.ack_timer.deadline()
    }

    /// Builds the ACK/ACK_ECN frame for transmission
    pub fn frame(&mut self, now: Timestamp) -> Option<frame::Ack> {
        let (largest, largest_arrival) = self.largest_received?;
        if self.ranges.is_empty() {
            return None;
        }

        let delay_micros = if self.ranges.max_value() == Some(largest) {
            now.saturating_duration_since(largest_arrival).as_micros() as u64
        } else {
            0
        };

        let frame = frame::Ack {
            ack_delay: scale_ack_delay(delay_micros, self.ack_delay_exponent),
            ranges: self.ranges.clone(),
            ecn_counts: if self.ecn_counts.is_empty() {
                None
            } else {
                Some(self.ecn_counts)
            },
        };

        self.eliciting_since_ack = 0;
        self.immediate_ack = false;
        self.ack_timer.cancel();
        Some(frame)
    }

    /// The peer acknowledged one of our ACK frames which advertised up
    /// to `largest_acknowledged`; ranges at or below it no longer need
    /// to be re-advertised
    pub fn on_ack_frame_acked(&mut self, largest_acknowledged: u64) {
        // keep `largest_acknowledged` itself so future ACK frames stay
        // anchored at a value the peer has already seen
        self.ranges.remove_below(largest_acknowledged);
        self.lowest_tracked = self.lowest_tracked.max(largest_acknowledged);
    }

    #[inline]
    pub fn has_packets_to_ack(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Largest successfully processed packet number, for truncated
    /// packet-number expansion
    #[inline]
    pub fn largest_received(&self) -> Option<u64> {
        self.largest_received.map(|(largest, _)| largest)
    }
}

/// All state scoped to one packet number space
#[derive(Debug)]
pub struct Space {
    space: PacketNumberSpace,
    next_packet_number: u64,
    pub ack_manager: AckManager,
    pub crypto: CryptoStream,
    pub recovery: recovery::Manager,
}

impl Space {
    pub fn new(space: PacketNumberSpace, max_ack_delay: Duration, ack_delay_exponent: u8) -> Self {
        Self {
            space,
            next_packet_number: 0,
            ack_manager: AckManager::new(max_ack_delay, ack_delay_exponent),
            crypto: CryptoStream::default(),
            recovery: recovery::Manager::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> PacketNumberSpace {
        self.space
    }

    /// Claims the next packet number for transmission
    pub fn next_packet_number(&mut self) -> PacketNumber {
        let packet_number = self.next_packet_number;
        self.next_packet_number += 1;
        self.space
            .new_packet_number(VarInt::new(packet_number).expect("packet number space exhausted"))
    }

    /// The value against which received packet numbers are expanded
    pub fn largest_received_packet_number(&self) -> PacketNumber {
        let largest = self.ack_manager.largest_received().unwrap_or(0);
        self.space
            .new_packet_number(VarInt::new(largest).expect("received packet numbers are valid"))
    }

    /// The value against which packet numbers are truncated on send
    pub fn largest_acked_packet_number(&self) -> PacketNumber {
        let largest = self.recovery.largest_acked().unwrap_or(0);
        self.space
            .new_packet_number(VarInt::new(largest).expect("acked packet numbers are valid"))
    }

    /// Validates that an ACK only covers packet numbers we actually sent
    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.1
    //# An endpoint SHOULD treat receipt of an acknowledgment for a packet it
    //# did not send as a connection error of type PROTOCOL_VIOLATION
    pub fn validate_ack(&self, ack: &frame::Ack) -> Result<(), quiver_core::transport::Error> {
        if ack.largest_acknowledged().as_u64() >= self.next_packet_number {
            return Err(quiver_core::transport::Error::PROTOCOL_VIOLATION
                .with_reason("ack for an unsent packet"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn manager() -> AckManager {
        AckManager::new(Duration::from_millis(25), 3)
    }

    #[test]
    fn second_eliciting_packet_forces_ack_test() {
        let mut ack_manager = manager();
        let rtt = RttEstimator::default();

        ack_manager.on_packet_received(
            0,
            true,
            ExplicitCongestionNotification::NotEct,
            now(10),
            &rtt,
        );
        assert!(!ack_manager.should_transmit(now(10)));
        // the delayed-ack timer is armed
        assert!(ack_manager.ack_timer_deadline().is_some());

        ack_manager.on_packet_received(
            1,
            true,
            ExplicitCongestionNotification::NotEct,
            now(11),
            &rtt,
        );
        assert!(ack_manager.should_transmit(now(11)));

        let frame = ack_manager.frame(now(11)).unwrap();
        assert_eq!(frame.largest_acknowledged(), VarInt::from_u8(1));
        assert!(!ack_manager.should_transmit(now(11)));
    }

    #[test]
    fn out_of_order_forces_ack_test() {
        let mut ack_manager = manager();
        let rtt = RttEstimator::default();

        ack_manager.on_packet_received(
            5,
            true,
            ExplicitCongestionNotification::NotEct,
            now(10),
            &rtt,
        );
        ack_manager.frame(now(10));

        ack_manager.on_packet_received(
            3,
            true,
            ExplicitCongestionNotification::NotEct,
            now(12),
            &rtt,
        );
        assert!(ack_manager.should_transmit(now(12)));
    }

    #[test]
    fn non_eliciting_never_arms_test() {
        let mut ack_manager = manager();
        let rtt = RttEstimator::default();

        for packet_number in 0..10 {
            ack_manager.on_packet_received(
                packet_number,
                false,
                ExplicitCongestionNotification::NotEct,
                now(packet_number * 2),
                &rtt,
            );
        }
        assert!(!ack_manager.should_transmit(now(100)));
        assert!(ack_manager.ack_timer_deadline().is_none());
    }

    #[test]
    fn delayed_ack_timer_test() {
        let mut ack_manager = manager();
        let rtt = RttEstimator::default();

        ack_manager.on_packet_received(
            0,
            true,
            ExplicitCongestionNotification::NotEct,
            now(10),
            &rtt,
        );
        // max_ack_delay(25ms) vs smoothed_rtt/8 (333/8 = 41.6ms)
        let deadline = ack_manager.ack_timer_deadline().unwrap();
        assert_eq!(deadline, now(10) + Duration::from_millis(25));
        assert!(ack_manager.should_transmit(deadline));
    }

    #[test]
    fn duplicate_detection_test() {
        let mut ack_manager = manager();
        let rtt = RttEstimator::default();

        ack_manager.on_packet_received(
            7,
            true,
            ExplicitCongestionNotification::NotEct,
            now(1),
            &rtt,
        );
        assert!(ack_manager.is_duplicate(7));
        assert!(!ack_manager.is_duplicate(8));

        // pruned history counts as duplicate
        ack_manager.on_ack_frame_acked(7);
        assert!(ack_manager.is_duplicate(3));
    }

    #[test]
    fn ecn_counts_in_frame_test() {
        let mut ack_manager = manager();
        let rtt = RttEstimator::default();

        ack_manager.on_packet_received(
            0,
            true,
            ExplicitCongestionNotification::Ce,
            now(1),
            &rtt,
        );
        // CE forces an immediate ack carrying ECN counts
        assert!(ack_manager.should_transmit(now(1)));
        let frame = ack_manager.frame(now(1)).unwrap();
        let counts = frame.ecn_counts.unwrap();
        assert_eq!(counts.ce_count, VarInt::from_u8(1));
    }
}
