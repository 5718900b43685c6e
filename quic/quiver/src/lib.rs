// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A QUIC (RFC 9000/9001/9002) transport endpoint, usable as client and
//! server.
//!
//! The endpoint runs a fixed set of worker threads, each owning a UDP
//! socket, an event driver, a timer wheel, and a shard of connections.
//! Applications interact from inside [`EventHandler`] callbacks, which
//! run on the owning worker thread; nothing in the API blocks.
//!
//! ```no_run
//! use quiver::{Config, Endpoint, EventHandler, ConnectionContext};
//! use quiver_core::{crypto::tls::testing, stream::StreamId};
//!
//! #[derive(Clone)]
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn on_stream_readable(&mut self, connection: &mut ConnectionContext, id: StreamId) {
//!         let mut buf = [0u8; 4096];
//!         while let Ok(len) = connection.stream_read(id, &mut buf) {
//!             if len == 0 {
//!                 break;
//!             }
//!             let _ = connection.stream_write(id, &buf[..len]);
//!         }
//!     }
//! }
//!
//! let endpoint = Endpoint::listen(
//!     "127.0.0.1:4433".parse().unwrap(),
//!     testing::Endpoint,
//!     Config::default(),
//!     Echo,
//! )
//! .unwrap();
//! endpoint.join();
//! ```

pub mod config;
pub mod endpoint;

pub use config::{Config, CongestionControl};
pub use endpoint::{ConnectionContext, Endpoint, EventHandler};

pub use quiver_core::{
    application::ApplicationErrorCode,
    connection::Error as ConnectionError,
    stream::{StreamError, StreamId, StreamType},
};
pub use quiver_transport::connection::Stats;
