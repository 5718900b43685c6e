// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection- and stream-level flow control (RFC 9000 §4).

pub mod incoming;
pub mod outgoing;

pub use incoming::IncomingFlowController;
pub use outgoing::OutgoingFlowController;

/// When the unused window drops below `1/DEFAULT_WINDOW_THRESHOLD_DIVISOR`
/// of the initial window, a larger limit is advertised.
pub const DEFAULT_WINDOW_THRESHOLD_DIVISOR: u64 = 2;
