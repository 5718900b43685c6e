// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CUBIC congestion control (RFC 8312) on the RFC 9002 event surface.
//!
//! Window arithmetic is done in units of packets (as the CUBIC paper
//! does) and converted to bytes at the edges.

use crate::{
    recovery::{
        congestion_controller::{initial_window, minimum_window, CongestionController},
        RttEstimator,
    },
    time::Timestamp,
};
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
//# C is a constant fixed to determine the aggressiveness of window
//# increase in high BDP networks.
const C: f64 = 0.4;

//= https://www.rfc-editor.org/rfc/rfc8312#section-4.5
//# CUBIC sets the multiplicative window decrease factor (beta_cubic) to 0.7
const BETA_CUBIC: f64 = 0.7;

#[derive(Clone, Debug)]
pub struct Cubic {
    max_datagram_size: u16,
    congestion_window: u32,
    ssthresh: u32,
    bytes_in_flight: u32,
    recovery_start_time: Option<Timestamp>,
    /// Window size (in packets) just before the last reduction
    w_max: f64,
    /// Time at which the current congestion-avoidance epoch began
    epoch_start: Option<Timestamp>,
    /// Time offset at which the cubic function regains `w_max`
    k: Duration,
}

impl Cubic {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            congestion_window: initial_window(max_datagram_size),
            ssthresh: u32::MAX,
            bytes_in_flight: 0,
            recovery_start_time: None,
            w_max: 0.0,
            epoch_start: None,
            k: Duration::ZERO,
        }
    }

    #[inline]
    fn mss(&self) -> f64 {
        self.max_datagram_size as f64
    }

    #[inline]
    fn packets(&self, bytes: u32) -> f64 {
        bytes as f64 / self.mss()
    }

    #[inline]
    fn bytes(&self, packets: f64) -> u32 {
        (packets * self.mss()) as u32
    }

    #[inline]
    fn in_recovery(&self, time_sent: Timestamp) -> bool {
        matches!(self.recovery_start_time, Some(start) if time_sent <= start)
    }

    //= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
    //# W_cubic(t) = C*(t-K)^3 + W_max (Eq. 1)
    fn w_cubic(&self, t: Duration) -> f64 {
        let t = t.as_secs_f64() - self.k.as_secs_f64();
        C * t * t * t + self.w_max
    }

    fn on_congestion_event(&mut self, time_sent: Timestamp, now: Timestamp) {
        if self.in_recovery(time_sent) {
            return;
        }
        self.recovery_start_time = Some(now);
        self.epoch_start = None;

        let cwnd = self.packets(self.congestion_window);

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.6
        //# With fast convergence, when a congestion event occurs, before the
        //# window reduction of the congestion window, a flow remembers the last
        //# value of W_max before it updates W_max for the current congestion
        //# event.
        if cwnd < self.w_max {
            self.w_max = cwnd * (1.0 + BETA_CUBIC) / 2.0;
        } else {
            self.w_max = cwnd;
        }

        let reduced = self.bytes(cwnd * BETA_CUBIC);
        self.ssthresh = reduced.max(minimum_window(self.max_datagram_size));
        self.congestion_window = self.ssthresh;
    }
}

impl CongestionController for Cubic {
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
        rtt_estimator: &RttEstimator,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(acked_bytes as u32);

        if self.in_recovery(time_sent) {
            return;
        }

        if self.congestion_window < self.ssthresh {
            // slow start, as in Reno
            self.congestion_window = self.congestion_window.saturating_add(acked_bytes as u32);
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
        //# K = cubic_root(W_max*(1-beta_cubic)/C) (Eq. 2)
        let epoch_start = match self.epoch_start {
            Some(epoch_start) => epoch_start,
            None => {
                self.k = Duration::from_secs_f64(
                    (self.w_max * (1.0 - BETA_CUBIC) / C).max(0.0).cbrt(),
                );
                self.epoch_start = Some(now);
                now
            }
        };

        let t = now.saturating_duration_since(epoch_start);
        let rtt = rtt_estimator.smoothed_rtt();
        let target = self.w_cubic(t + rtt);

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.2
        //# W_est(t) = W_max*beta_cubic +
        //#             [3*(1-beta_cubic)/(1+beta_cubic)] * (t/RTT) (Eq. 4)
        let w_est = self.w_max * BETA_CUBIC
            + (3.0 * (1.0 - BETA_CUBIC) / (1.0 + BETA_CUBIC))
                * (t.as_secs_f64() / rtt.as_secs_f64().max(1e-6));

        let cwnd = self.packets(self.congestion_window);
        let next = if target < w_est {
            // TCP-friendly region
            w_est
        } else {
            //= https://www.rfc-editor.org/rfc/rfc8312#section-4.3
            //# cwnd MUST be incremented by (W_cubic(t+RTT) - cwnd)/cwnd for
            //# each received ACK
            cwnd + (target - cwnd).max(0.0) / cwnd.max(1.0) * self.packets(acked_bytes as u32)
        };

        if next > cwnd {
            self.congestion_window = self
                .bytes(next)
                .max(minimum_window(self.max_datagram_size));
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

        if persistent_congestion {
            self.congestion_window = minimum_window(self.max_datagram_size);
            self.recovery_start_time = None;
            self.epoch_start = None;
            self.w_max = 0.0;
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

    const MSS: u16 = 1200;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn reduction_test() {
        let mut cubic = Cubic::new(MSS);
        let initial = cubic.congestion_window();

        cubic.on_packet_sent(1000, at(0));
        cubic.on_packet_lost(1000, at(0), false, at(10));

        // beta_cubic reduction, not Reno's half
        assert_eq!(cubic.congestion_window(), (initial as f64 * BETA_CUBIC) as u32);
    }

    #[test]
    fn growth_after_reduction_test() {
        let mut cubic = Cubic::new(MSS);
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(50),
            at(0),
            crate::packet::number::PacketNumberSpace::ApplicationData,
        );

        cubic.on_packet_sent(1000, at(0));
        cubic.on_packet_lost(1000, at(0), false, at(10));
        let reduced = cubic.congestion_window();

        // acks over the following seconds grow the window back toward w_max
        let mut now = 20;
        for _ in 0..100 {
            cubic.on_packet_sent(MSS as usize, at(now));
            cubic.on_ack(at(now), MSS as usize, &rtt, at(now + 10));
            now += 50;
        }
        assert!(cubic.congestion_window() > reduced);
    }

    #[test]
    fn persistent_congestion_test() {
        let mut cubic = Cubic::new(MSS);
        cubic.on_packet_sent(1000, at(0));
        cubic.on_packet_lost(1000, at(0), true, at(100));
        assert_eq!(cubic.congestion_window(), minimum_window(MSS));
    }
}
