// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::varint::VarInt;

/// The peer's limit on what this endpoint may send, at connection or
/// stream scope.
///
/// `blocked_at` dedups BLOCKED frames: at most one DATA_BLOCKED /
/// STREAM_DATA_BLOCKED is emitted per limit value.
#[derive(Clone, Debug)]
pub struct OutgoingFlowController {
    limit: VarInt,
    consumed: VarInt,
    blocked_at: Option<VarInt>,
}

impl OutgoingFlowController {
    pub fn new(initial_limit: VarInt) -> Self {
        Self {
            limit: initial_limit,
            consumed: VarInt::ZERO,
            blocked_at: None,
        }
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    #[inline]
    pub fn consumed(&self) -> VarInt {
        self.consumed
    }

    /// Bytes which may still be sent under the current limit
    #[inline]
    pub fn available(&self) -> u64 {
        self.limit.as_u64() - self.consumed.as_u64()
    }

    /// Claims up to `len` bytes of send window, returning the granted
    /// amount
    #[inline]
    pub fn acquire(&mut self, len: usize) -> usize {
        let granted = (len as u64).min(self.available()) as usize;
        self.consumed += granted;
        granted
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
    //# A sender MUST ignore any MAX_STREAM_DATA or MAX_DATA frames that
    //# do not increase flow control limits.
    #[inline]
    pub fn on_max_data(&mut self, limit: VarInt) -> bool {
        if limit <= self.limit {
            return false;
        }
        self.limit = limit;
        self.blocked_at = None;
        true
    }

    /// Returns the limit to report in a BLOCKED frame, at most once per
    /// limit value, and only when the window is exhausted
    #[inline]
    pub fn blocked_frame(&mut self) -> Option<VarInt> {
        if self.available() > 0 {
            return None;
        }
        if self.blocked_at == Some(self.limit) {
            return None;
        }
        self.blocked_at = Some(self.limit);
        Some(self.limit)
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.available() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_test() {
        let mut controller = OutgoingFlowController::new(VarInt::from_u8(10));
        assert_eq!(controller.acquire(4), 4);
        assert_eq!(controller.acquire(10), 6);
        assert_eq!(controller.acquire(1), 0);
        assert!(controller.is_blocked());
    }

    #[test]
    fn blocked_dedup_test() {
        let mut controller = OutgoingFlowController::new(VarInt::from_u8(4));
        // not blocked yet
        assert_eq!(controller.blocked_frame(), None);
        controller.acquire(4);

        assert_eq!(controller.blocked_frame(), Some(VarInt::from_u8(4)));
        // second request for the same limit is suppressed
        assert_eq!(controller.blocked_frame(), None);

        // a larger limit resets the dedup
        assert!(controller.on_max_data(VarInt::from_u8(6)));
        controller.acquire(2);
        assert_eq!(controller.blocked_frame(), Some(VarInt::from_u8(6)));
    }

    #[test]
    fn non_increasing_max_data_test() {
        let mut controller = OutgoingFlowController::new(VarInt::from_u8(10));
        assert!(!controller.on_max_data(VarInt::from_u8(10)));
        assert!(!controller.on_max_data(VarInt::from_u8(5)));
        assert_eq!(controller.limit(), VarInt::from_u8(10));
        assert!(controller.on_max_data(VarInt::from_u8(11)));
    }
}
