// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! NewReno congestion control per RFC 9002 §7.

use crate::{
    recovery::{
        congestion_controller::{initial_window, minimum_window, CongestionController},
        RttEstimator,
    },
    time::Timestamp,
};

#[derive(Clone, Debug)]
pub struct Reno {
    max_datagram_size: u16,
    congestion_window: u32,
    /// Slow start threshold; starts effectively unbounded
    ssthresh: u32,
    bytes_in_flight: u32,
    /// Packets sent before this time do not trigger a new congestion
    /// event (they belong to the current recovery period)
    recovery_start_time: Option<Timestamp>,
}

impl Reno {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            congestion_window: initial_window(max_datagram_size),
            ssthresh: u32::MAX,
            bytes_in_flight: 0,
            recovery_start_time: None,
        }
    }

    #[inline]
    pub fn is_in_slow_start(&self) -> bool {
        self.congestion_window < self.ssthresh
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
    //# A recovery period ends and the sender enters congestion avoidance
    //# when a packet sent during the recovery period is acknowledged.
    #[inline]
    fn in_recovery(&self, time_sent: Timestamp) -> bool {
        matches!(self.recovery_start_time, Some(start) if time_sent <= start)
    }

    fn on_congestion_event(&mut self, time_sent: Timestamp, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
        //# A congestion event is detected once per recovery period.
        if self.in_recovery(time_sent) {
            return;
        }

        self.recovery_start_time = Some(now);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
        //# On entering a recovery period, a sender MUST set the slow start
        //# threshold to half the value of the congestion window when loss is
        //# detected.
        self.ssthresh = self.congestion_window / 2;
        self.congestion_window = self.ssthresh.max(minimum_window(self.max_datagram_size));
    }
}

impl CongestionController for Reno {
    #[inline]
    fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    #[inline]
    fn on_packet_sent(&mut self, sent_bytes: usize, _now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(sent_bytes as u32);
    }

    fn on_ack(
        &mut self,
        time_sent: Timestamp,
        acked_bytes: usize,
        _rtt_estimator: &RttEstimator,
        _now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(acked_bytes as u32);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# While in recovery the congestion window does not increase.
        if self.in_recovery(time_sent) {
            return;
        }

        if self.is_in_slow_start() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
            //# While a sender is in slow start, the congestion window
            //# increases by the number of bytes acknowledged
            self.congestion_window = self.congestion_window.saturating_add(acked_bytes as u32);
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.3
            //# a sender limits congestion window growth to one maximum datagram
            //# size for each congestion window that is acknowledged
            let increment = (self.max_datagram_size as u64 * acked_bytes as u64
                / self.congestion_window.max(1) as u64) as u32;
            self.congestion_window = self.congestion_window.saturating_add(increment);
        }
    }

    fn on_packet_lost(
        &mut self,
        lost_bytes: usize,
        time_sent: Timestamp,
        persistent_congestion: bool,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes as u32);
        self.on_congestion_event(time_sent, now);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# When persistent congestion is declared, the sender's congestion
        //# window MUST be reduced to the minimum congestion window
        if persistent_congestion {
            self.congestion_window = minimum_window(self.max_datagram_size);
            self.recovery_start_time = None;
        }
    }

    #[inline]
    fn on_explicit_congestion(&mut self, time_sent: Timestamp, now: Timestamp) {
        self.on_congestion_event(time_sent, now);
    }

    #[inline]
    fn on_packet_discarded(&mut self, bytes_sent: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_sent as u32);
    }

    #[inline]
    fn on_mtu_update(&mut self, max_datagram_size: u16) {
        self.max_datagram_size = max_datagram_size;
        self.congestion_window = self
            .congestion_window
            .max(minimum_window(max_datagram_size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    const MSS: u16 = 1200;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn slow_start_test() {
        let mut reno = Reno::new(MSS);
        let rtt = RttEstimator::default();
        let initial = reno.congestion_window();

        reno.on_packet_sent(1000, at(0));
        assert_eq!(reno.bytes_in_flight(), 1000);

        reno.on_ack(at(0), 1000, &rtt, at(10));
        assert_eq!(reno.bytes_in_flight(), 0);
        // window grows by the acked bytes
        assert_eq!(reno.congestion_window(), initial + 1000);
    }

    #[test]
    fn loss_halves_window_test() {
        let mut reno = Reno::new(MSS);
        let rtt = RttEstimator::default();
        let initial = reno.congestion_window();

        reno.on_packet_sent(1000, at(0));
        reno.on_packet_lost(1000, at(0), false, at(20));
        assert_eq!(reno.congestion_window(), initial / 2);
        assert_eq!(reno.bytes_in_flight(), 0);

        // a second loss within the same recovery period has no effect
        reno.on_packet_sent(1000, at(10));
        let window = reno.congestion_window();
        reno.on_packet_lost(1000, at(10), false, at(30));
        assert_eq!(reno.congestion_window(), window);

        // a loss of a packet sent after recovery began triggers another event
        reno.on_packet_sent(1000, at(40));
        reno.on_packet_lost(1000, at(40), false, at(50));
        assert_eq!(reno.congestion_window(), window / 2);

        let _ = rtt;
    }

    #[test]
    fn window_floor_test() {
        let mut reno = Reno::new(MSS);
        // repeated congestion events cannot push the window below 2 * MSS
        for round in 0..20 {
            reno.on_packet_sent(100, at(round * 10));
            reno.on_packet_lost(100, at(round * 10), false, at(round * 10 + 5));
        }
        assert_eq!(reno.congestion_window(), minimum_window(MSS));
    }

    #[test]
    fn persistent_congestion_test() {
        let mut reno = Reno::new(MSS);
        reno.on_packet_sent(1000, at(0));
        reno.on_packet_lost(1000, at(0), true, at(100));
        assert_eq!(reno.congestion_window(), minimum_window(MSS));
    }

    #[test]
    fn congestion_avoidance_test() {
        let mut reno = Reno::new(MSS);
        let rtt = RttEstimator::default();

        // force congestion avoidance
        reno.on_packet_sent(100, at(0));
        reno.on_packet_lost(100, at(0), false, at(5));
        let window = reno.congestion_window();
        assert!(!reno.is_in_slow_start());

        // acknowledging a full window grows the window by about one MSS
        let mut acked = 0;
        while acked < window {
            let chunk = (window - acked).min(MSS as u32);
            reno.on_packet_sent(chunk as usize, at(10));
            reno.on_ack(at(10), chunk as usize, &rtt, at(20));
            acked += chunk;
        }
        let grown = reno.congestion_window() - window;
        assert!(grown >= MSS as u32 / 2 && grown <= MSS as u32 * 2, "grew by {grown}");
    }
}
