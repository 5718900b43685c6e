// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Drives a client and a server connection against each other in
//! memory: handshake, stream data, flow-control updates, and close.

use core::time::Duration;
use quiver_core::{
    crypto::tls::testing as tls_testing,
    endpoint,
    inet::ExplicitCongestionNotification,
    random::testing::Generator,
    stream::{StreamError, StreamType},
    time::Timestamp,
    transport::parameters::TransportParameters,
    varint::VarInt,
};
use quiver_transport::{
    connection::{Config, Connection, Event},
    demux::{ConnectionHandle, Demux, Route},
};

type TestConnection = Connection<tls_testing::Session, Generator>;

struct Pair {
    client: TestConnection,
    server: TestConnection,
    now: Timestamp,
}

fn parameters() -> TransportParameters {
    TransportParameters {
        max_idle_timeout: VarInt::from_u32(30_000),
        initial_max_data: VarInt::from_u32(1_000_000),
        initial_max_stream_data_bidi_local: VarInt::from_u32(100_000),
        initial_max_stream_data_bidi_remote: VarInt::from_u32(100_000),
        initial_max_stream_data_uni: VarInt::from_u32(100_000),
        initial_max_streams_bidi: VarInt::from_u8(16),
        initial_max_streams_uni: VarInt::from_u8(16),
        ..Default::default()
    }
}

impl Pair {
    fn new() -> Self {
        let mut tls_endpoint = tls_testing::Endpoint;
        let now = Timestamp::from_duration(Duration::from_millis(100));

        let client_config = Config {
            endpoint_type: endpoint::Type::Client,
            local_parameters: parameters(),
            ..Default::default()
        };
        let mut client = Connection::new_client(
            client_config,
            &mut tls_endpoint,
            "test.example",
            "127.0.0.1:4433".parse().unwrap(),
            Generator::default(),
        )
        .unwrap();

        // the server is created from the header of the client's first
        // datagram, the way the endpoint demuxer would do it
        let mut first_flight = vec![0u8; 1500];
        let len = client
            .transmit(&mut first_flight, now)
            .expect("client first flight");
        first_flight.truncate(len);
        assert!(len >= 1200, "client initial datagram must be padded");

        let demux = Demux::new(8);
        let route = demux.route(&first_flight);
        let Route::PotentialNewConnection {
            destination_cid,
            source_cid,
            version,
            is_initial: true,
        } = route
        else {
            panic!("expected a potential new connection, got {route:?}");
        };
        assert_eq!(version, quiver_core::packet::VERSION_1);

        let server_config = Config {
            endpoint_type: endpoint::Type::Server,
            local_parameters: parameters(),
            ..Default::default()
        };
        let mut server = Connection::new_server(
            server_config,
            &mut tls_endpoint,
            "127.0.0.1:9000".parse().unwrap(),
            destination_cid,
            source_cid,
            Generator(42),
        )
        .unwrap();

        server.on_datagram(
            "127.0.0.1:9000".parse().unwrap(),
            ExplicitCongestionNotification::NotEct,
            &mut first_flight,
            now,
        );

        Self {
            client,
            server,
            now,
        }
    }

    /// Shuttles datagrams both ways until the network is quiet
    fn pump(&mut self) {
        let client_addr: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let server_addr: std::net::SocketAddr = "127.0.0.1:4433".parse().unwrap();

        for _ in 0..64 {
            let mut progressed = false;
            let mut buf = vec![0u8; 1500];

            while let Some(len) = self.client.transmit(&mut buf, self.now) {
                self.server.on_datagram(
                    client_addr,
                    ExplicitCongestionNotification::NotEct,
                    &mut buf[..len],
                    self.now,
                );
                progressed = true;
            }
            while let Some(len) = self.server.transmit(&mut buf, self.now) {
                self.client.on_datagram(
                    server_addr,
                    ExplicitCongestionNotification::NotEct,
                    &mut buf[..len],
                    self.now,
                );
                progressed = true;
            }

            if !progressed {
                // fire delayed-ack style timers and try once more
                self.now += Duration::from_millis(30);
                self.client.on_timeout(self.now);
                self.server.on_timeout(self.now);

                let quiet = self
                    .client
                    .transmit(&mut buf, self.now)
                    .map(|len| {
                        self.server.on_datagram(
                            client_addr,
                            ExplicitCongestionNotification::NotEct,
                            &mut buf[..len],
                            self.now,
                        );
                    })
                    .is_none()
                    && self
                        .server
                        .transmit(&mut buf, self.now)
                        .map(|len| {
                            self.client.on_datagram(
                                server_addr,
                                ExplicitCongestionNotification::NotEct,
                                &mut buf[..len],
                                self.now,
                            );
                        })
                        .is_none();
                if quiet {
                    return;
                }
            }
        }
    }

    fn drain_events(connection: &mut TestConnection) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = connection.poll_event() {
            events.push(event);
        }
        events
    }
}

#[test]
fn handshake_test() {
    let mut pair = Pair::new();
    pair.pump();

    let client_events = Pair::drain_events(&mut pair.client);
    let server_events = Pair::drain_events(&mut pair.server);

    assert!(client_events.contains(&Event::HandshakeComplete));
    assert!(server_events.contains(&Event::HandshakeComplete));
    assert!(pair.client.state().is_connected());
    assert!(pair.server.state().is_connected());
    // HANDSHAKE_DONE reached the client
    assert!(pair.client.is_handshake_confirmed());
    assert!(pair.server.is_handshake_confirmed());
}

#[test]
fn bidirectional_stream_test() {
    let mut pair = Pair::new();
    pair.pump();
    Pair::drain_events(&mut pair.client);
    Pair::drain_events(&mut pair.server);

    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    assert_eq!(pair.client.stream_write(id, b"hello quic").unwrap(), 10);
    pair.client.stream_finish(id);
    pair.pump();

    let server_events = Pair::drain_events(&mut pair.server);
    assert!(server_events.contains(&Event::StreamOpened(id)));

    let mut buf = [0u8; 64];
    let len = pair.server.stream_read(id, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"hello quic");
    assert_eq!(
        pair.server.stream_read(id, &mut buf),
        Err(StreamError::Finished)
    );

    // echo a response the other way
    assert_eq!(pair.server.stream_write(id, b"pong").unwrap(), 4);
    pair.server.stream_finish(id);
    pair.pump();

    let len = pair.client.stream_read(id, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"pong");
    assert_eq!(
        pair.client.stream_read(id, &mut buf),
        Err(StreamError::Finished)
    );
}

#[test]
fn large_transfer_exercises_flow_control_test() {
    let mut pair = Pair::new();
    pair.pump();
    Pair::drain_events(&mut pair.client);
    Pair::drain_events(&mut pair.server);

    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    let payload = vec![0xabu8; 50_000];

    let mut written = 0;
    while written < payload.len() {
        match pair.client.stream_write(id, &payload[written..]) {
            Ok(len) => written += len,
            Err(StreamError::WouldBlock) => {}
            Err(error) => panic!("write failed: {error}"),
        }
        pair.pump();

        // drain on the server side so windows keep advancing
        let mut buf = [0u8; 4096];
        loop {
            match pair.server.stream_read(id, &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        pair.pump();
    }
    pair.client.stream_finish(id);

    let mut total = 0;
    for _ in 0..128 {
        pair.pump();
        let mut buf = [0u8; 4096];
        loop {
            match pair.server.stream_read(id, &mut buf) {
                Ok(0) => break,
                Ok(len) => total += len,
                Err(StreamError::Finished) => {
                    assert_eq!(total, payload.len());
                    return;
                }
                Err(error) => panic!("read failed: {error}"),
            }
        }
    }
    panic!("transfer did not finish; delivered {total} bytes");
}

#[test]
fn close_test() {
    let mut pair = Pair::new();
    pair.pump();
    Pair::drain_events(&mut pair.client);
    Pair::drain_events(&mut pair.server);

    pair.client.close(7u32.into(), b"done", pair.now);
    pair.pump();

    let server_events = Pair::drain_events(&mut pair.server);
    assert!(server_events
        .iter()
        .any(|event| matches!(event, Event::Closed(_))));
    assert!(pair.server.state().is_draining() || pair.server.state().is_closed());
    assert!(pair.client.state().is_closing() || pair.client.state().is_closed());
}

#[test]
fn stream_reset_test() {
    let mut pair = Pair::new();
    pair.pump();
    Pair::drain_events(&mut pair.client);
    Pair::drain_events(&mut pair.server);

    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    pair.client.stream_write(id, b"partial").unwrap();
    pair.pump();

    pair.client.stream_reset(id, 9u32.into());
    pair.pump();

    let mut buf = [0u8; 16];
    assert_eq!(
        pair.server.stream_read(id, &mut buf),
        Err(StreamError::Reset(9u32.into()))
    );
}

#[test]
fn demux_registration_test() {
    let mut pair = Pair::new();
    pair.pump();

    let mut demux = Demux::new(8);
    for id in pair.server.local_connection_ids() {
        demux.register(id, ConnectionHandle(0));
    }
    assert!(!demux.is_empty());
}
