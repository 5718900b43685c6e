// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{packet::number::PacketNumberSpace, time::Timestamp};
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333 milliseconds.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

/// The lowest RTT value the estimator tracks
pub const MIN_RTT: Duration = Duration::from_micros(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    latest_rtt: Duration,
    /// The minimum observed over the lifetime of the path
    min_rtt: Duration,
    smoothed_rtt: Duration,
    rttvar: Duration,
    /// The peer's max_ack_delay transport parameter; applies to the
    /// ApplicationData space only
    max_ack_delay: Duration,
    first_rtt_sample: Option<Timestamp>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTT)
    }
}

impl RttEstimator {
    //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
    //# smoothed_rtt = kInitialRtt
    //# rttvar = kInitialRtt / 2
    #[inline]
    pub fn new(initial_rtt: Duration) -> Self {
        let initial_rtt = initial_rtt.max(MIN_RTT);
        Self {
            latest_rtt: initial_rtt,
            min_rtt: initial_rtt,
            smoothed_rtt: initial_rtt,
            rttvar: initial_rtt / 2,
            max_ack_delay: Duration::ZERO,
            first_rtt_sample: None,
        }
    }

    /// Records the peer's max_ack_delay transport parameter
    #[inline]
    pub fn on_max_ack_delay(&mut self, max_ack_delay: Duration) {
        self.max_ack_delay = max_ack_delay;
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    #[inline]
    pub fn first_rtt_sample(&self) -> Option<Timestamp> {
        self.first_rtt_sample
    }

    /// The probe timeout period for a packet number space
    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
    #[inline]
    pub fn pto_period(&self, space: PacketNumberSpace) -> Duration {
        let mut pto = self.smoothed_rtt + (self.rttvar * 4).max(crate::time::K_GRANULARITY);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When the PTO is armed for Initial or Handshake packet number spaces,
        //# the max_ack_delay in the PTO period computation is set to 0
        if space.is_application_data() {
            pto += self.max_ack_delay;
        }

        pto
    }

    /// Processes an RTT sample produced by an ACK whose largest
    /// acknowledged packet was ack-eliciting and newly acknowledged
    pub fn update_rtt(
        &mut self,
        mut ack_delay: Duration,
        rtt_sample: Duration,
        now: Timestamp,
        space: PacketNumberSpace,
    ) {
        let rtt_sample = rtt_sample.max(MIN_RTT);
        self.latest_rtt = rtt_sample;

        if self.first_rtt_sample.is_none() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# min_rtt = latest_rtt
            //# smoothed_rtt = latest_rtt
            //# rttvar = latest_rtt / 2
            self.first_rtt_sample = Some(now);
            self.min_rtt = rtt_sample;
            self.smoothed_rtt = rtt_sample;
            self.rttvar = rtt_sample / 2;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the lesser of min_rtt and latest_rtt
        //# (Section 5.1) on all other samples.
        self.min_rtt = self.min_rtt.min(rtt_sample);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST use the lesser of the acknowledgment delay and the peer's
        //#    max_ack_delay after the handshake is confirmed
        if space.is_application_data() && !self.max_ack_delay.is_zero() {
            ack_delay = ack_delay.min(self.max_ack_delay);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgment delay from the RTT sample if
        //#    the resulting value is smaller than the min_rtt.
        let mut adjusted_rtt = rtt_sample;
        if adjusted_rtt.saturating_sub(ack_delay) >= self.min_rtt {
            adjusted_rtt -= ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        let rttvar_sample = if self.smoothed_rtt > adjusted_rtt {
            self.smoothed_rtt - adjusted_rtt
        } else {
            adjusted_rtt - self.smoothed_rtt
        };
        self.rttvar = self.rttvar * 3 / 4 + rttvar_sample / 4;
        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted_rtt / 8;
    }

    /// The loss-detection time threshold for the current estimate
    #[inline]
    pub fn loss_time_threshold(&self) -> Duration {
        super::time_threshold(self.smoothed_rtt, self.latest_rtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::VarInt;

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn initial_values_test() {
        let estimator = RttEstimator::default();
        assert_eq!(estimator.smoothed_rtt(), DEFAULT_INITIAL_RTT);
        assert_eq!(estimator.rttvar(), DEFAULT_INITIAL_RTT / 2);
        // kInitialRtt(333ms) + max(4 * 166.5ms, 1ms) = 999ms
        assert_eq!(
            estimator.pto_period(PacketNumberSpace::Initial),
            Duration::from_millis(999)
        );
    }

    #[test]
    fn first_sample_test() {
        let mut estimator = RttEstimator::default();
        estimator.update_rtt(
            Duration::from_millis(10),
            Duration::from_millis(100),
            now(1000),
            PacketNumberSpace::Initial,
        );
        assert_eq!(estimator.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(estimator.min_rtt(), Duration::from_millis(100));
        assert_eq!(estimator.rttvar(), Duration::from_millis(50));
    }

    #[test]
    fn smoothing_test() {
        let mut estimator = RttEstimator::default();
        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            now(1000),
            PacketNumberSpace::ApplicationData,
        );
        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(200),
            now(1200),
            PacketNumberSpace::ApplicationData,
        );
        // 7/8 * 100 + 1/8 * 200 = 112.5ms
        assert_eq!(estimator.smoothed_rtt(), Duration::from_micros(112_500));
        assert_eq!(estimator.min_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn ack_delay_floor_test() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(Duration::from_millis(25));

        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            now(1000),
            PacketNumberSpace::ApplicationData,
        );

        // an ack delay which would push the sample below min_rtt is ignored
        estimator.update_rtt(
            Duration::from_millis(80),
            Duration::from_millis(100),
            now(1200),
            PacketNumberSpace::ApplicationData,
        );
        assert_eq!(estimator.smoothed_rtt(), Duration::from_millis(100));

        // otherwise the delay is subtracted, clamped to max_ack_delay
        estimator.update_rtt(
            Duration::from_millis(80),
            Duration::from_millis(150),
            now(1400),
            PacketNumberSpace::ApplicationData,
        );
        // adjusted = 150 - min(80, 25) = 125; 7/8 * 100 + 1/8 * 125
        assert_eq!(estimator.smoothed_rtt(), Duration::from_micros(103_125));
    }

    #[test]
    fn pto_space_test() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(Duration::from_millis(25));
        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            now(1000),
            PacketNumberSpace::ApplicationData,
        );

        let handshake = estimator.pto_period(PacketNumberSpace::Handshake);
        let application = estimator.pto_period(PacketNumberSpace::ApplicationData);
        assert_eq!(application - handshake, Duration::from_millis(25));
    }

    #[test]
    fn latest_rtt_varint_sanity_test() {
        // ack delays arrive as varint microseconds; ensure conversion holds
        let delay = crate::ack::unscale_ack_delay(VarInt::from_u8(100), 3);
        assert_eq!(delay, Duration::from_micros(800));
    }
}
