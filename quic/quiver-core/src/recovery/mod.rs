// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod congestion_controller;
pub mod cubic;
pub mod reno;
pub mod rtt_estimator;

pub use congestion_controller::CongestionController;
pub use rtt_estimator::RttEstimator;

use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED initial value for the packet reordering threshold
//# (kPacketThreshold) is 3, based on best practices for TCP loss
//# detection [RFC5681] [RFC6675].
pub const K_PACKET_THRESHOLD: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED time threshold (kTimeThreshold), expressed as an
//# RTT multiplier, is 9/8.
pub const K_TIME_THRESHOLD_NUMERATOR: u32 = 9;
pub const K_TIME_THRESHOLD_DENOMINATOR: u32 = 8;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
//# The RECOMMENDED value for kPersistentCongestionThreshold is 3
pub const K_PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

/// `max(rtt, latest) * 9 / 8`, floored at the timer granularity
#[inline]
pub fn time_threshold(smoothed_rtt: Duration, latest_rtt: Duration) -> Duration {
    let rtt = smoothed_rtt.max(latest_rtt);
    (rtt * K_TIME_THRESHOLD_NUMERATOR / K_TIME_THRESHOLD_DENOMINATOR)
        .max(crate::time::K_GRANULARITY)
}
