// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Network-level types carried alongside datagrams.

/// ECN codepoint from the IP header of a received datagram
//= https://www.rfc-editor.org/rfc/rfc9000#section-13.4
//# If a path has been validated to support Explicit Congestion
//# Notification (ECN) [RFC3168] [RFC8311], QUIC treats a Congestion
//# Experienced (CE) codepoint in the IP header as a signal of congestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExplicitCongestionNotification {
    #[default]
    NotEct = 0b00,
    Ect1 = 0b01,
    Ect0 = 0b10,
    Ce = 0b11,
}

impl ExplicitCongestionNotification {
    #[inline]
    pub fn new(value: u8) -> Self {
        match value & 0b11 {
            0b01 => Self::Ect1,
            0b10 => Self::Ect0,
            0b11 => Self::Ce,
            _ => Self::NotEct,
        }
    }

    #[inline]
    pub fn using_ecn(self) -> bool {
        !matches!(self, Self::NotEct)
    }

    #[inline]
    pub fn congestion_experienced(self) -> bool {
        matches!(self, Self::Ce)
    }
}

/// Per-space counts of received ECN codepoints, reported back in ACK_ECN
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect_0_count: crate::varint::VarInt,
    pub ect_1_count: crate::varint::VarInt,
    pub ce_count: crate::varint::VarInt,
}

impl EcnCounts {
    #[inline]
    pub fn on_packet(&mut self, ecn: ExplicitCongestionNotification) {
        match ecn {
            ExplicitCongestionNotification::Ect0 => {
                self.ect_0_count = self.ect_0_count.saturating_add(1u8.into())
            }
            ExplicitCongestionNotification::Ect1 => {
                self.ect_1_count = self.ect_1_count.saturating_add(1u8.into())
            }
            ExplicitCongestionNotification::Ce => {
                self.ce_count = self.ce_count.saturating_add(1u8.into())
            }
            ExplicitCongestionNotification::NotEct => {}
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
