// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::{transport, varint::VarInt};

/// This endpoint's limit on what the peer may send, at connection or
/// stream scope.
///
/// The window advances by `window_size` whenever the unused portion
/// falls below half of it, and the new limit is carried in a
/// MAX_DATA / MAX_STREAM_DATA / MAX_STREAMS frame.
#[derive(Clone, Debug)]
pub struct IncomingFlowController {
    limit: VarInt,
    /// Highest cumulative amount the peer has claimed
    received: VarInt,
    /// Amount released by the application (consumed and forgotten)
    window_size: VarInt,
    /// Limit value already handed to the frame writer, to suppress
    /// duplicate MAX_* frames
    announced: VarInt,
}

impl IncomingFlowController {
    pub fn new(initial_limit: VarInt) -> Self {
        Self {
            limit: initial_limit,
            received: VarInt::ZERO,
            window_size: initial_limit,
            announced: initial_limit,
        }
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    #[inline]
    pub fn received(&self) -> VarInt {
        self.received
    }

    /// Records the peer advancing its cumulative total to `total`.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
    //# A receiver MUST close the connection with an error of type
    //# FLOW_CONTROL_ERROR if the sender violates the advertised connection
    //# or stream data limits
    #[inline]
    pub fn on_data(&mut self, total: VarInt) -> Result<(), transport::Error> {
        if total > self.limit {
            return Err(transport::Error::FLOW_CONTROL_ERROR);
        }
        self.received = self.received.max(total);
        Ok(())
    }

    /// Grows the window once the unused portion falls below half of the
    /// window size. Returns the new limit if it advanced; the frame
    /// itself is produced by [`Self::announce`] at transmission time.
    #[inline]
    pub fn release(&mut self) -> Option<VarInt> {
        let headroom = self.limit.as_u64() - self.received.as_u64();
        if headroom * super::DEFAULT_WINDOW_THRESHOLD_DIVISOR >= self.window_size.as_u64() {
            // at least half the window is still unused
            return None;
        }

        self.limit = self.limit.saturating_add(self.window_size);
        Some(self.limit)
    }

    /// The limit to advertise, or `None` if it was already announced
    #[inline]
    pub fn announce(&mut self) -> Option<VarInt> {
        if self.announced >= self.limit {
            return None;
        }
        self.announced = self.limit;
        Some(self.limit)
    }

    /// Forces the current limit to be advertised again (the frame
    /// carrying it was lost)
    #[inline]
    pub fn reannounce(&mut self) {
        self.announced = VarInt::ZERO;
    }

    /// Remaining credit before the peer hits the limit
    #[inline]
    pub fn headroom(&self) -> u64 {
        self.limit.as_u64() - self.received.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_test() {
        let mut controller = IncomingFlowController::new(VarInt::from_u16(10_000));
        controller.on_data(VarInt::from_u16(10_000)).unwrap();
        assert!(controller.on_data(VarInt::from_u16(10_001)).is_err());
    }

    #[test]
    fn window_advance_test() {
        // limit 10_000, peer sends 5_001 bytes: less than half the
        // window is left, so the limit advances by a full window
        let mut controller = IncomingFlowController::new(VarInt::from_u16(10_000));
        controller.on_data(VarInt::from_u16(5_001)).unwrap();

        let new_limit = controller.release().expect("window should advance");
        assert_eq!(new_limit.as_u64(), 20_000);

        // announced once, then suppressed until it grows again
        assert_eq!(controller.announce(), Some(new_limit));
        assert_eq!(controller.announce(), None);

        // a lost MAX_DATA frame forces a re-announcement
        controller.reannounce();
        assert_eq!(controller.announce(), Some(new_limit));

        // the peer may now send up to the new limit and not past it
        controller.on_data(VarInt::from_u32(20_000)).unwrap();
        assert!(controller.on_data(VarInt::from_u32(20_001)).is_err());
    }

    #[test]
    fn no_advance_while_half_window_unused_test() {
        let mut controller = IncomingFlowController::new(VarInt::from_u16(10_000));
        controller.on_data(VarInt::from_u16(1_000)).unwrap();
        assert_eq!(controller.release(), None);
    }
}
