// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end echo over loopback sockets: a server endpoint and a
//! client endpoint, real UDP, the deterministic test handshake.

#![cfg(target_os = "linux")]

use quiver::{Config, ConnectionContext, Endpoint, EventHandler, StreamError, StreamId, StreamType};
use quiver_core::crypto::tls::testing as tls_testing;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Clone)]
struct EchoServer;

impl EventHandler for EchoServer {
    fn on_stream_readable(&mut self, connection: &mut ConnectionContext, id: StreamId) {
        let mut buf = [0u8; 4096];
        loop {
            match connection.stream_read(id, &mut buf) {
                Ok(0) => break,
                Ok(len) => {
                    let _ = connection.stream_write(id, &buf[..len]);
                }
                Err(StreamError::Finished) => {
                    connection.stream_finish(id);
                    break;
                }
                Err(_) => break,
            }
        }
    }
}

#[derive(Clone)]
struct EchoClient {
    payload: &'static [u8],
    stream: Option<StreamId>,
    received: Vec<u8>,
    results: mpsc::Sender<Vec<u8>>,
}

impl EventHandler for EchoClient {
    fn on_handshake_complete(&mut self, connection: &mut ConnectionContext) {
        let id = connection
            .open_stream(StreamType::Bidirectional)
            .expect("stream limit allows an opening stream");
        connection
            .stream_write(id, self.payload)
            .expect("payload fits the send queue");
        connection.stream_finish(id);
        self.stream = Some(id);
    }

    fn on_stream_readable(&mut self, connection: &mut ConnectionContext, id: StreamId) {
        if self.stream != Some(id) {
            return;
        }
        let mut buf = [0u8; 4096];
        loop {
            match connection.stream_read(id, &mut buf) {
                Ok(0) => break,
                Ok(len) => self.received.extend_from_slice(&buf[..len]),
                Err(StreamError::Finished) => {
                    let _ = self.results.send(core::mem::take(&mut self.received));
                    break;
                }
                Err(_) => break,
            }
        }
    }
}

#[test]
fn echo_round_trip_test() {
    let server = Endpoint::listen(
        "127.0.0.1:0".parse().unwrap(),
        tls_testing::Endpoint,
        Config::default(),
        EchoServer,
    )
    .expect("server endpoint starts");

    let (results, completed) = mpsc::channel();
    let client_handler = EchoClient {
        payload: b"quic echo payload",
        stream: None,
        received: Vec::new(),
        results,
    };

    let client = Endpoint::dial_remote(
        server.local_addr(),
        "localhost",
        tls_testing::Endpoint,
        Config::default(),
        client_handler,
    )
    .expect("client endpoint starts");

    let echoed = completed
        .recv_timeout(Duration::from_secs(10))
        .expect("echo completes");
    assert_eq!(echoed, b"quic echo payload");

    client.shutdown();
    server.shutdown();
    client.join();
    server.join();
}
