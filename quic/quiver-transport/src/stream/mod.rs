// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod manager;
pub mod recv;
pub mod send;
pub mod send_buffer;

pub use manager::{StreamLimits, StreamManager};
pub use recv::ReceiveStream;
pub use send::{SendStream, Transmission};
