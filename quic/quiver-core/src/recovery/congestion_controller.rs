// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{recovery::RttEstimator, time::Timestamp};
use core::fmt::Debug;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion
//# window of ten times the maximum datagram size (max_datagram_size),
//# while limiting the window to the larger of 14,720 bytes or twice the
//# maximum datagram size.
pub const INITIAL_WINDOW_LIMIT: u32 = 14_720;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# The RECOMMENDED value is 2 * max_datagram_size.
#[inline]
pub fn minimum_window(max_datagram_size: u16) -> u32 {
    2 * max_datagram_size as u32
}

#[inline]
pub fn initial_window(max_datagram_size: u16) -> u32 {
    (10 * max_datagram_size as u32)
        .min(INITIAL_WINDOW_LIMIT.max(minimum_window(max_datagram_size)))
}

/// The congestion controller contract.
///
/// `bytes_in_flight` only tracks congestion-controlled bytes: the caller
/// charges each packet once on send and credits it exactly once on the
/// first of acknowledgment, loss declaration, or space discard.
pub trait CongestionController: 'static + Send + Debug {
    fn congestion_window(&self) -> u32;

    fn bytes_in_flight(&self) -> u32;

    /// Bytes which may be sent right now without exceeding the window
    #[inline]
    fn available_congestion_window(&self) -> u32 {
        self.congestion_window().saturating_sub(self.bytes_in_flight())
    }

    #[inline]
    fn is_congestion_limited(&self) -> bool {
        self.available_congestion_window() == 0
    }

    fn on_packet_sent(&mut self, sent_bytes: usize, now: Timestamp);

    /// Bytes from `time_sent` were newly acknowledged
    fn on_ack(
        &mut self,
        time_sent: Timestamp,
        acked_bytes: usize,
        rtt_estimator: &RttEstimator,
        now: Timestamp,
    );

    /// Bytes from `time_sent` were declared lost
    fn on_packet_lost(
        &mut self,
        lost_bytes: usize,
        time_sent: Timestamp,
        persistent_congestion: bool,
        now: Timestamp,
    );

    /// An ACK reported ECN-CE marks; treated as a congestion event
    /// without packet loss
    fn on_explicit_congestion(&mut self, time_sent: Timestamp, now: Timestamp);

    /// A packet was neither acked nor lost (its space was discarded);
    /// its bytes leave flight without a congestion signal
    fn on_packet_discarded(&mut self, bytes_sent: usize);

    fn on_mtu_update(&mut self, max_datagram_size: u16);
}

/// Which congestion controller the endpoint runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    #[default]
    Reno,
    Cubic,
}

/// A boxed controller chosen from the configured [`Algorithm`]
pub fn new_controller(
    algorithm: Algorithm,
    max_datagram_size: u16,
) -> Box<dyn CongestionController> {
    match algorithm {
        Algorithm::Reno => Box::new(super::reno::Reno::new(max_datagram_size)),
        Algorithm::Cubic => Box::new(super::cubic::Cubic::new(max_datagram_size)),
    }
}

impl CongestionController for Box<dyn CongestionController> {
    #[inline]
    fn congestion_window(&self) -> u32 {
        (**self).congestion_window()
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        (**self).bytes_in_flight()
    }

    #[inline]
    fn on_packet_sent(&mut self, sent_bytes: usize, now: Timestamp) {
        (**self).on_packet_sent(sent_bytes, now)
    }

    #[inline]
    fn on_ack(
        &mut self,
        time_sent: Timestamp,
        acked_bytes: usize,
        rtt_estimator: &RttEstimator,
        now: Timestamp,
    ) {
        (**self).on_ack(time_sent, acked_bytes, rtt_estimator, now)
    }

    #[inline]
    fn on_packet_lost(
        &mut self,
        lost_bytes: usize,
        time_sent: Timestamp,
        persistent_congestion: bool,
        now: Timestamp,
    ) {
        (**self).on_packet_lost(lost_bytes, time_sent, persistent_congestion, now)
    }

    #[inline]
    fn on_explicit_congestion(&mut self, time_sent: Timestamp, now: Timestamp) {
        (**self).on_explicit_congestion(time_sent, now)
    }

    #[inline]
    fn on_packet_discarded(&mut self, bytes_sent: usize) {
        (**self).on_packet_discarded(bytes_sent)
    }

    #[inline]
    fn on_mtu_update(&mut self, max_datagram_size: u16) {
        (**self).on_mtu_update(max_datagram_size)
    }
}
