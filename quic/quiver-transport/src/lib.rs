// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC connection machinery: streams, flow control, acknowledgment
//! generation, loss recovery, and the connection state machine.
//!
//! Everything in this crate is single-threaded and driven by three
//! entry points on [`connection::Connection`]: `on_datagram`,
//! `on_timeout`, and `transmit`. The platform layer owns sockets and
//! timers and calls in; this crate never blocks and never reads clocks.

pub mod connection;
pub mod crypto_stream;
pub mod demux;
pub mod path;
pub mod recovery;
pub mod space;
pub mod stream;
pub mod sync;
