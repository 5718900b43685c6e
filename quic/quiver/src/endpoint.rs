// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The endpoint runtime: worker threads, each owning a socket, an event
//! driver, a timer source, a connection-ID shard, and the connections
//! assigned to it.
//!
//! Per-connection state is only ever touched by the owning worker, so
//! no locks guard it. Cross-thread requests (dial, shutdown) are
//! enqueued on the worker's task queue and the worker's driver is woken
//! through its self-pipe.

use crate::config::Config;
use quiver_core::{
    application::ApplicationErrorCode,
    connection::Error as ConnectionError,
    crypto::tls,
    endpoint,
    inet::ExplicitCongestionNotification,
    packet,
    random::Generator,
    stateless_reset,
    stream::{StreamError, StreamId, StreamType},
    time::{Clock, Timestamp},
};
use quiver_crypto::random::Random;
use quiver_platform::{
    io::{DefaultDriver, Driver, Interest, UdpSocket, Wake},
    MonotonicClock, TimerId, TimerWheel,
};
use quiver_transport::{
    connection::{Config as TransportConfig, Connection, Event, Stats},
    demux::{ConnectionHandle, Demux, Route},
};
use std::{
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
};

const SOCKET_TOKEN: usize = 0;
/// Local connection IDs are a fixed 8 bytes so short headers can be
/// parsed without per-connection state
const LOCAL_CID_LEN: usize = 8;
/// Stateless resets sent per wait cycle
const STATELESS_RESET_BUDGET: u32 = 10;

/// Application callbacks, invoked on the owning worker thread
pub trait EventHandler: Send + 'static {
    fn on_handshake_complete(&mut self, _connection: &mut ConnectionContext) {}
    fn on_stream_opened(&mut self, _connection: &mut ConnectionContext, _id: StreamId) {}
    fn on_stream_readable(&mut self, _connection: &mut ConnectionContext, _id: StreamId) {}
    fn on_stream_writable(&mut self, _connection: &mut ConnectionContext, _id: StreamId) {}
    fn on_key_update(&mut self, _connection: &mut ConnectionContext) {}
    fn on_new_token(&mut self, _connection: &mut ConnectionContext, _token: &[u8]) {}
    fn on_connection_closed(&mut self, _error: &ConnectionError) {}
}

/// Object-safe application surface over one connection
trait AppConnection {
    fn open_stream(&mut self, stream_type: StreamType) -> Result<StreamId, ConnectionError>;
    fn stream_write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, StreamError>;
    fn stream_read(&mut self, id: StreamId, buf: &mut [u8]) -> Result<usize, StreamError>;
    fn stream_finish(&mut self, id: StreamId);
    fn stream_reset(&mut self, id: StreamId, code: ApplicationErrorCode);
    fn close(&mut self, code: ApplicationErrorCode, reason: &[u8], now: Timestamp);
    fn stats(&self) -> Stats;
    fn remote_address(&self) -> SocketAddr;
}

impl<S: tls::Session, R: Generator> AppConnection for Connection<S, R> {
    fn open_stream(&mut self, stream_type: StreamType) -> Result<StreamId, ConnectionError> {
        Connection::open_stream(self, stream_type)
    }

    fn stream_write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, StreamError> {
        Connection::stream_write(self, id, data)
    }

    fn stream_read(&mut self, id: StreamId, buf: &mut [u8]) -> Result<usize, StreamError> {
        Connection::stream_read(self, id, buf)
    }

    fn stream_finish(&mut self, id: StreamId) {
        Connection::stream_finish(self, id)
    }

    fn stream_reset(&mut self, id: StreamId, code: ApplicationErrorCode) {
        Connection::stream_reset(self, id, code)
    }

    fn close(&mut self, code: ApplicationErrorCode, reason: &[u8], now: Timestamp) {
        Connection::close(self, code, reason, now)
    }

    fn stats(&self) -> Stats {
        Connection::stats(self)
    }

    fn remote_address(&self) -> SocketAddr {
        Connection::remote_address(self)
    }
}

/// Handle to one connection inside a handler callback
pub struct ConnectionContext<'a> {
    connection: &'a mut dyn AppConnection,
    now: Timestamp,
}

impl ConnectionContext<'_> {
    pub fn open_stream(&mut self, stream_type: StreamType) -> Result<StreamId, ConnectionError> {
        self.connection.open_stream(stream_type)
    }

    /// Partial writes are allowed; `WouldBlock` signals a full send queue
    pub fn stream_write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, StreamError> {
        self.connection.stream_write(id, data)
    }

    pub fn stream_read(&mut self, id: StreamId, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.connection.stream_read(id, buf)
    }

    /// Queues the FIN after previously written data
    pub fn stream_finish(&mut self, id: StreamId) {
        self.connection.stream_finish(id)
    }

    pub fn stream_reset(&mut self, id: StreamId, code: ApplicationErrorCode) {
        self.connection.stream_reset(id, code)
    }

    pub fn close(&mut self, code: ApplicationErrorCode, reason: &[u8]) {
        let now = self.now;
        self.connection.close(code, reason, now)
    }

    pub fn stats(&self) -> Stats {
        self.connection.stats()
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }
}

enum Task {
    Dial {
        remote: SocketAddr,
        server_name: String,
    },
}

/// A running endpoint; dropping it does not stop the workers, call
/// [`Endpoint::shutdown`] or [`Endpoint::join`].
pub struct Endpoint {
    workers: Vec<std::thread::JoinHandle<()>>,
    tasks: Vec<mpsc::Sender<Task>>,
    wakers: Vec<Box<dyn Wake>>,
    next_worker: std::sync::atomic::AtomicUsize,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Starts a server endpoint listening on `addr`
    pub fn listen<T, H>(
        addr: SocketAddr,
        tls: T,
        config: Config,
        handler: H,
    ) -> io::Result<Self>
    where
        T: tls::Endpoint + Clone,
        H: EventHandler + Clone,
    {
        Self::start(addr, tls, config, handler, endpoint::Type::Server)
    }

    /// Starts a client endpoint; use [`Endpoint::dial`] to connect
    pub fn client<T, H>(addr: SocketAddr, tls: T, config: Config, handler: H) -> io::Result<Self>
    where
        T: tls::Endpoint + Clone,
        H: EventHandler + Clone,
    {
        Self::start(addr, tls, config, handler, endpoint::Type::Client)
    }

    /// Convenience: a client endpoint on an ephemeral port, dialing
    /// `remote` immediately
    pub fn dial_remote<T, H>(
        remote: SocketAddr,
        server_name: &str,
        tls: T,
        config: Config,
        handler: H,
    ) -> io::Result<Self>
    where
        T: tls::Endpoint + Clone,
        H: EventHandler + Clone,
    {
        let bind: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().expect("static address parses")
        } else {
            "[::]:0".parse().expect("static address parses")
        };
        let endpoint = Self::client(bind, tls, config, handler)?;
        endpoint.dial(remote, server_name);
        Ok(endpoint)
    }

    fn start<T, H>(
        addr: SocketAddr,
        tls: T,
        config: Config,
        handler: H,
        endpoint_type: endpoint::Type,
    ) -> io::Result<Self>
    where
        T: tls::Endpoint + Clone,
        H: EventHandler + Clone,
    {
        config
            .validate()
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

        let mut workers = Vec::new();
        let mut tasks = Vec::new();
        let mut wakers: Vec<Box<dyn Wake>> = Vec::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut local_addr = addr;

        for index in 0..config.workers {
            let socket = UdpSocket::bind(local_addr)?;
            // the first bind may resolve an ephemeral port the rest share
            local_addr = socket.local_addr()?;

            let driver = DefaultDriver::new()?;
            let waker = driver.waker();
            let (sender, receiver) = mpsc::channel();

            let mut worker = Worker::new(
                socket,
                driver,
                Demux::new(LOCAL_CID_LEN),
                tls.clone(),
                handler.clone(),
                config.clone(),
                endpoint_type,
                receiver,
                shutdown.clone(),
            );

            let handle = std::thread::Builder::new()
                .name(format!("quiver-worker-{index}"))
                .spawn(move || worker.run())?;

            workers.push(handle);
            tasks.push(sender);
            wakers.push(Box::new(waker));
        }

        Ok(Self {
            workers,
            tasks,
            wakers,
            next_worker: std::sync::atomic::AtomicUsize::new(0),
            shutdown,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Initiates a connection from one of the workers (round robin)
    pub fn dial(&self, remote: SocketAddr, server_name: &str) {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.tasks.len();
        let _ = self.tasks[index].send(Task::Dial {
            remote,
            server_name: server_name.to_string(),
        });
        self.wakers[index].wake();
    }

    /// Signals every worker to stop after its current cycle
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for waker in &self.wakers {
            waker.wake();
        }
    }

    /// Blocks until every worker exits
    pub fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

type WorkerConnection<S> = Connection<S, Random>;

struct Worker<T: tls::Endpoint, H: EventHandler> {
    socket: UdpSocket,
    driver: DefaultDriver,
    clock: MonotonicClock,
    demux: Demux,
    connections: Vec<Option<WorkerConnection<T::Session>>>,
    tls: T,
    handler: H,
    config: Config,
    endpoint_type: endpoint::Type,
    tasks: mpsc::Receiver<Task>,
    shutdown: Arc<AtomicBool>,
    /// Connection deadlines, keyed back to the connection slot
    timers: TimerWheel,
    timer_ids: Vec<Option<TimerId>>,
    /// Datagram stalled on a backpressured socket
    blocked_datagram: Option<(Vec<u8>, SocketAddr)>,
    /// Reset tokens of recently dropped connections, for stateless
    /// reset generation
    retired_tokens: HashMap<quiver_core::connection::ConnectionId, stateless_reset::Token>,
    retired_order: VecDeque<quiver_core::connection::ConnectionId>,
    random: Random,
}

impl<T: tls::Endpoint, H: EventHandler> Worker<T, H> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        socket: UdpSocket,
        driver: DefaultDriver,
        demux: Demux,
        tls: T,
        handler: H,
        config: Config,
        endpoint_type: endpoint::Type,
        tasks: mpsc::Receiver<Task>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket,
            driver,
            clock: MonotonicClock::new(),
            demux,
            connections: Vec::new(),
            tls,
            handler,
            config,
            endpoint_type,
            tasks,
            shutdown,
            timers: TimerWheel::new(),
            timer_ids: Vec::new(),
            blocked_datagram: None,
            retired_tokens: HashMap::new(),
            retired_order: VecDeque::new(),
            random: Random::default(),
        }
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            endpoint_type: self.endpoint_type,
            local_parameters: self.config.transport_parameters(),
            initial_rtt: self.config.initial_rtt(),
            congestion_control: self.config.congestion_algorithm(),
            max_datagram_size: 1200,
        }
    }

    fn run(&mut self) {
        if self
            .driver
            .add_fd(self.socket.as_raw_fd(), Interest::Readable, SOCKET_TOKEN)
            .is_err()
        {
            return;
        }

        let mut events = Vec::new();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let now = self.clock.get_time();
            let timeout = self
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now));

            events.clear();
            if self.driver.wait(timeout, &mut events).is_err() {
                return;
            }

            let writable = events.iter().any(|event| event.writable);
            if writable {
                self.flush_blocked();
            }

            self.drain_tasks();
            self.read_datagrams();

            let now = self.clock.get_time();
            self.fire_timers(now);
            self.flush_all(now);
            self.dispatch_events(now);
            self.collect_finished();
            self.sync_timers();
        }
    }

    /// Reconciles every connection's next deadline into the wheel
    fn sync_timers(&mut self) {
        self.timer_ids.resize(self.connections.len(), None);
        for index in 0..self.connections.len() {
            if let Some(id) = self.timer_ids[index].take() {
                self.timers.cancel(id);
            }
            let deadline = self.connections[index]
                .as_ref()
                .and_then(|connection| connection.next_timeout());
            if let Some(deadline) = deadline {
                self.timer_ids[index] = Some(self.timers.insert(deadline, index as u64));
            }
        }
    }

    fn drain_tasks(&mut self) {
        while let Ok(task) = self.tasks.try_recv() {
            match task {
                Task::Dial {
                    remote,
                    server_name,
                } => {
                    let config = self.transport_config();
                    match Connection::new_client(
                        config,
                        &mut self.tls,
                        &server_name,
                        remote,
                        self.random.clone(),
                    ) {
                        Ok(connection) => {
                            self.insert_connection(connection);
                        }
                        Err(error) => {
                            tracing::warn!(%error, "dial failed");
                        }
                    }
                }
            }
        }
    }

    fn insert_connection(&mut self, connection: WorkerConnection<T::Session>) -> ConnectionHandle {
        let index = self
            .connections
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| {
                self.connections.push(None);
                self.connections.len() - 1
            });
        let handle = ConnectionHandle(index);
        for id in connection.local_connection_ids() {
            self.demux.register(id, handle);
        }
        self.connections[index] = Some(connection);
        handle
    }

    fn read_datagrams(&mut self) {
        let mut buf = [0u8; 1500];
        let mut reset_budget = STATELESS_RESET_BUDGET;

        while let Ok(Some((len, from))) = self.socket.recv_from(&mut buf) {
            let now = self.clock.get_time();
            let datagram = &mut buf[..len];

            match self.demux.route(datagram) {
                Route::Connection(handle) => {
                    if let Some(connection) =
                        self.connections.get_mut(handle.0).and_then(Option::as_mut)
                    {
                        connection.on_datagram(
                            from,
                            ExplicitCongestionNotification::NotEct,
                            datagram,
                            now,
                        );
                        // new local ids may have been issued
                        for id in connection.local_connection_ids() {
                            self.demux.register(id, handle);
                        }
                    }
                }
                Route::PotentialNewConnection {
                    destination_cid,
                    source_cid,
                    version,
                    is_initial,
                } => {
                    if !self.endpoint_type.is_server() || !is_initial {
                        continue;
                    }
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-6.1
                    //# If the version selected by the client is not acceptable to the
                    //# server, the server responds with a Version Negotiation packet
                    if version != packet::VERSION_1 {
                        self.send_version_negotiation(&destination_cid, &source_cid, from);
                        continue;
                    }
                    let config = self.transport_config();
                    let Ok(mut connection) = Connection::new_server(
                        config,
                        &mut self.tls,
                        from,
                        destination_cid,
                        source_cid,
                        self.random.clone(),
                    ) else {
                        continue;
                    };
                    connection.on_datagram(
                        from,
                        ExplicitCongestionNotification::NotEct,
                        datagram,
                        now,
                    );
                    self.insert_connection(connection);
                }
                Route::StatelessResetCandidate {
                    destination_cid,
                    token,
                } => {
                    // a reset aimed at one of our connections?
                    let mut handled = false;
                    for connection in self.connections.iter_mut().flatten() {
                        if connection.on_possible_stateless_reset(datagram) {
                            handled = true;
                            break;
                        }
                    }
                    let _ = token;
                    if !handled && reset_budget > 0 {
                        if let Some(reset_token) =
                            self.retired_tokens.get(&destination_cid).copied()
                        {
                            reset_budget -= 1;
                            self.send_stateless_reset(reset_token, len, from);
                        }
                    }
                }
                Route::Drop => {}
            }
        }
    }

    fn send_version_negotiation(
        &mut self,
        destination_cid: &quiver_core::connection::ConnectionId,
        source_cid: &quiver_core::connection::ConnectionId,
        to: SocketAddr,
    ) {
        use quiver_codec::Encoder;

        let mut first = [0u8; 1];
        self.random.public_random_fill(&mut first);

        let mut storage = [0u8; 128];
        let mut encoder = quiver_codec::EncoderBuffer::new(&mut storage);
        packet::version_negotiation::encode(
            &mut encoder,
            source_cid,
            destination_cid,
            &[packet::VERSION_1],
            first[0],
        );
        let len = encoder.len();
        let _ = self.socket.send_to(&storage[..len], to);
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
    //# An endpoint that sends a Stateless Reset in response to a packet that
    //# is 43 bytes or shorter SHOULD send a Stateless Reset that is one byte
    //# shorter than the packet it responds to.
    fn send_stateless_reset(
        &mut self,
        token: stateless_reset::Token,
        triggering_len: usize,
        to: SocketAddr,
    ) {
        let len = triggering_len
            .saturating_sub(1)
            .clamp(stateless_reset::TOKEN_LEN + 5, 1200);
        let mut datagram = vec![0u8; len];
        self.random.public_random_fill(&mut datagram);
        // short-header shape
        datagram[0] = (datagram[0] & 0b0011_1111) | 0b0100_0000;
        let token_start = len - stateless_reset::TOKEN_LEN;
        datagram[token_start..].copy_from_slice(token.as_bytes());
        let _ = self.socket.send_to(&datagram, to);
    }

    fn fire_timers(&mut self, now: Timestamp) {
        let mut due = Vec::new();
        self.timers.run(now, |token| due.push(token as usize));
        for index in due {
            if let Some(id) = self.timer_ids.get_mut(index).and_then(Option::take) {
                self.timers.cancel(id);
            }
            if let Some(connection) = self.connections.get_mut(index).and_then(Option::as_mut) {
                connection.on_timeout(now);
            }
        }
    }

    fn flush_all(&mut self, now: Timestamp) {
        if self.blocked_datagram.is_some() {
            return;
        }

        let mut buf = [0u8; 1500];
        for connection in self.connections.iter_mut().flatten() {
            loop {
                let Some(len) = connection.transmit(&mut buf, now) else {
                    break;
                };
                let to = connection.remote_address();
                match self.socket.send_to(&buf[..len], to) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        // backpressure: stash and re-arm on writability
                        self.blocked_datagram = Some((buf[..len].to_vec(), to));
                        let _ = self.driver.modify_fd(
                            self.socket.as_raw_fd(),
                            Interest::ReadWrite,
                            SOCKET_TOKEN,
                        );
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "socket send failed");
                        return;
                    }
                }
            }
        }
    }

    fn flush_blocked(&mut self) {
        if let Some((datagram, to)) = self.blocked_datagram.take() {
            match self.socket.send_to(&datagram, to) {
                Ok(None) => {
                    self.blocked_datagram = Some((datagram, to));
                    return;
                }
                _ => {
                    let _ = self.driver.modify_fd(
                        self.socket.as_raw_fd(),
                        Interest::Readable,
                        SOCKET_TOKEN,
                    );
                }
            }
        }
    }

    fn dispatch_events(&mut self, now: Timestamp) {
        for connection in self.connections.iter_mut().flatten() {
            loop {
                let Some(event) = connection.poll_event() else {
                    break;
                };
                let mut context = ConnectionContext {
                    connection: &mut *connection,
                    now,
                };
                match event {
                    Event::HandshakeComplete => self.handler.on_handshake_complete(&mut context),
                    Event::StreamOpened(id) => self.handler.on_stream_opened(&mut context, id),
                    Event::StreamReadable(id) => self.handler.on_stream_readable(&mut context, id),
                    Event::StreamWritable(id) => self.handler.on_stream_writable(&mut context, id),
                    Event::KeyUpdate => self.handler.on_key_update(&mut context),
                    Event::NewToken(token) => self.handler.on_new_token(&mut context, &token),
                    Event::Closed(error) => self.handler.on_connection_closed(&error),
                }
            }
        }
        // handlers may have queued data
        self.flush_all(now);
    }

    fn collect_finished(&mut self) {
        for index in 0..self.connections.len() {
            let finished = self.connections[index]
                .as_ref()
                .is_some_and(|connection| connection.is_finished());
            if !finished {
                continue;
            }
            let connection = self.connections[index].take().expect("checked above");
            let handle = ConnectionHandle(index);

            // remember reset tokens so late datagrams for this
            // connection can be answered with a stateless reset
            for id in connection.local_connection_ids() {
                if let Some(token) = connection.stateless_reset_token_for(&id) {
                    self.retired_tokens.insert(id, token);
                    self.retired_order.push_back(id);
                }
            }
            while self.retired_order.len() > 1024 {
                if let Some(id) = self.retired_order.pop_front() {
                    self.retired_tokens.remove(&id);
                }
            }

            self.demux.unregister_all(handle);
        }
    }
}
