// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection state machine.
//!
//! A [`Connection`] is driven from the outside by exactly three calls:
//! [`Connection::on_datagram`] for inbound packets,
//! [`Connection::on_timeout`] when the deadline from
//! [`Connection::next_timeout`] passes, and [`Connection::transmit`] to
//! produce the next outgoing datagram. All state transitions happen
//! inside those calls; nothing here blocks or reads a clock.

pub mod local_id;
pub mod peer_id;

pub use local_id::LocalIdRegistry;
pub use peer_id::PeerIdRegistry;

use crate::{
    path::Path,
    recovery::{SentFrame, SentPacketInfo},
    space::Space,
    stream::{manager::StreamLimits, StreamManager},
    sync::{IncomingFlowController, OutgoingFlowController},
};
use quiver_core::{
    ack::unscale_ack_delay,
    application::ApplicationErrorCode,
    connection::{self, ConnectionId},
    crypto::{
        tls::{self, CipherSuite},
        CryptoError, EncryptionLevel,
    },
    endpoint,
    frame::{self, ack_elicitation::AckElicitation, Frame},
    inet::ExplicitCongestionNotification,
    packet::{self, number::PacketNumberSpace, Header},
    random,
    recovery::{congestion_controller, CongestionController, RttEstimator},
    stateless_reset,
    stream::{StreamError, StreamId, StreamType},
    time::{Timer, Timestamp},
    transport::{self, parameters::TransportParameters},
    varint::VarInt,
};
use quiver_core::{event, is};
use quiver_crypto::{retry::RingRetryTagger, Cryptographer};
use std::{collections::VecDeque, net::SocketAddr, time::Duration};

/// Endpoint-level wiring every connection needs
pub struct Config {
    pub endpoint_type: endpoint::Type,
    pub local_parameters: TransportParameters,
    pub initial_rtt: Duration,
    pub congestion_control: congestion_controller::Algorithm,
    pub max_datagram_size: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_type: endpoint::Type::Client,
            local_parameters: TransportParameters::default(),
            initial_rtt: quiver_core::recovery::rtt_estimator::DEFAULT_INITIAL_RTT,
            congestion_control: congestion_controller::Algorithm::Reno,
            max_datagram_size: 1200,
        }
    }
}

/// Application-visible happenings, drained with [`Connection::poll_event`]
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    HandshakeComplete,
    /// The peer opened a stream
    StreamOpened(StreamId),
    StreamReadable(StreamId),
    StreamWritable(StreamId),
    KeyUpdate,
    /// The server issued an address validation token for future dials
    NewToken(Vec<u8>),
    Closed(connection::Error),
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-10
//# An established QUIC connection can be terminated in one of three
//# ways: idle timeout (Section 10.1), immediate close (Section 10.2),
//# or stateless reset (Section 10.3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    New,
    WaitInitial,
    Handshaking,
    Connected,
    Closing,
    Draining,
    Closed,
}

impl State {
    is!(is_handshaking, New | WaitInitial | Handshaking);
    is!(is_connected, Connected);
    is!(is_closing, Closing);
    is!(is_draining, Draining);
    is!(is_closed, Closed);

    event! {
        on_start(New => WaitInitial);
        on_initial_exchanged(WaitInitial => Handshaking);
        on_handshake_complete(Handshaking => Connected);
        on_close(WaitInitial | Handshaking | Connected => Closing);
        on_peer_close(Closing => Draining);
        on_drain_complete(Closing | Draining => Closed);
    }
}

#[derive(Debug)]
struct CloseState {
    error: transport::Error,
    application_close: Option<(ApplicationErrorCode, Vec<u8>)>,
    drain_deadline: Timestamp,
    /// One close retransmission per this many received packets
    packets_since_close: u32,
    close_pending: bool,
}

/// Point-in-time transport statistics
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub smoothed_rtt: Duration,
    pub congestion_window: u32,
    pub bytes_in_flight: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub pto_count: u64,
    pub congestion_events: u64,
}

pub struct Connection<S: tls::Session, R: random::Generator> {
    endpoint_type: endpoint::Type,
    state: State,
    version: u32,
    random: R,

    crypto: Cryptographer,
    tls: S,
    retry_tagger: RingRetryTagger,

    /// Indexed by `PacketNumberSpace`; emptied when a space is discarded
    spaces: [Option<Space>; 3],

    rtt: RttEstimator,
    cc: Box<dyn CongestionController>,
    pto_backoff: u32,
    /// Probe packets owed after a PTO expiry
    probes_pending: u8,

    /// Connection-level flow control
    flow_tx: OutgoingFlowController,
    flow_rx: IncomingFlowController,
    /// Cumulative connection bytes the peer has sent (max-offset sum)
    conn_bytes_received: VarInt,

    streams: Option<StreamManager>,

    local_ids: LocalIdRegistry,
    peer_ids: PeerIdRegistry,

    path: Path,
    /// A probing path during migration (server side)
    probing_path: Option<Path>,

    local_parameters: TransportParameters,
    peer_parameters: Option<TransportParameters>,
    /// DCID of the very first client Initial; echoed by the server and
    /// verified by the client
    original_destination_cid: ConnectionId,
    retry_source_cid: Option<ConnectionId>,
    /// Address validation token to include in client Initials
    token: Vec<u8>,

    idle_timeout: Option<Duration>,
    idle_timer: Timer,

    handshake_done_pending: bool,
    handshake_confirmed: bool,
    /// NEW_TOKEN blob to hand the client after confirmation
    pending_new_token: Option<Vec<u8>>,
    /// Guards key updates to at most one per RTT
    last_key_update: Option<Timestamp>,

    close_state: Option<CloseState>,
    events: VecDeque<Event>,
    max_datagram_size: u16,
    initial_packet_received: bool,

    stats_bytes_sent: u64,
    stats_bytes_received: u64,
    stats_pto_count: u64,
    stats_congestion_events: u64,
}

impl<S: tls::Session, R: random::Generator> Connection<S, R> {
    /// Builds a client connection and queues the first CRYPTO flight
    pub fn new_client<E>(
        config: Config,
        tls_endpoint: &mut E,
        server_name: &str,
        remote_address: SocketAddr,
        mut random: R,
    ) -> Result<Self, connection::Error>
    where
        E: tls::Endpoint<Session = S>,
    {
        debug_assert!(config.endpoint_type.is_client());

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
        //# When an Initial packet is sent by a client that has not previously
        //# received an Initial or Retry packet from the server, the client
        //# populates the Destination Connection ID field with an unpredictable
        //# value.  This Destination Connection ID MUST be at least 8 bytes in
        //# length.
        let mut dcid_bytes = [0u8; 8];
        random.public_random_fill(&mut dcid_bytes);
        let original_destination_cid = ConnectionId::try_from_slice(&dcid_bytes).expect("8 <= 20");

        let mut scid_bytes = [0u8; 8];
        random.public_random_fill(&mut scid_bytes);
        let source_cid = ConnectionId::try_from_slice(&scid_bytes).expect("8 <= 20");

        let mut local_parameters = config.local_parameters.clone();
        local_parameters.initial_source_connection_id = Some(source_cid);
        let tls = tls_endpoint.new_client_session(&local_parameters.encode_to_vec(), server_name);

        let mut connection = Self::new_common(
            config,
            local_parameters,
            tls,
            source_cid,
            original_destination_cid,
            Path::new_validated(remote_address, 1200),
            random,
        );
        connection.original_destination_cid = original_destination_cid;
        connection
            .crypto
            .install_initial_keys(endpoint::Type::Client, original_destination_cid.as_bytes())
            .map_err(|_| connection::Error::Closed)?;
        let _ = connection.state.on_start();
        connection.drive_handshake()?;
        Ok(connection)
    }

    /// Builds a server connection from the header of a valid first
    /// Initial; the packet itself is processed via `on_datagram`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_server<E>(
        config: Config,
        tls_endpoint: &mut E,
        remote_address: SocketAddr,
        client_destination_cid: ConnectionId,
        client_source_cid: ConnectionId,
        mut random: R,
    ) -> Result<Self, connection::Error>
    where
        E: tls::Endpoint<Session = S>,
    {
        debug_assert!(config.endpoint_type.is_server());

        let mut scid_bytes = [0u8; 8];
        random.public_random_fill(&mut scid_bytes);
        let source_cid = ConnectionId::try_from_slice(&scid_bytes).expect("8 <= 20");

        let mut local_parameters = config.local_parameters.clone();
        local_parameters.initial_source_connection_id = Some(source_cid);
        local_parameters.original_destination_connection_id = Some(client_destination_cid);
        let tls = tls_endpoint.new_server_session(&local_parameters.encode_to_vec());

        let mut connection = Self::new_common(
            config,
            local_parameters,
            tls,
            source_cid,
            client_source_cid,
            Path::new(remote_address, 1200),
            random,
        );
        connection.original_destination_cid = client_destination_cid;
        connection
            .crypto
            .install_initial_keys(endpoint::Type::Server, client_destination_cid.as_bytes())
            .map_err(|_| connection::Error::Closed)?;
        let _ = connection.state.on_start();
        Ok(connection)
    }

    fn new_common(
        config: Config,
        local_parameters: TransportParameters,
        tls: S,
        source_cid: ConnectionId,
        peer_cid: ConnectionId,
        path: Path,
        mut random: R,
    ) -> Self {
        let mut token_bytes = [0u8; stateless_reset::TOKEN_LEN];
        random.private_random_fill(&mut token_bytes);

        let max_ack_delay = local_parameters.max_ack_delay();
        let exponent = local_parameters.ack_delay_exponent;
        let spaces = [
            Some(Space::new(PacketNumberSpace::Initial, Duration::ZERO, exponent)),
            Some(Space::new(PacketNumberSpace::Handshake, Duration::ZERO, exponent)),
            Some(Space::new(
                PacketNumberSpace::ApplicationData,
                max_ack_delay,
                exponent,
            )),
        ];

        Self {
            endpoint_type: config.endpoint_type,
            state: State::default(),
            version: packet::VERSION_1,
            crypto: Cryptographer::default(),
            tls,
            retry_tagger: RingRetryTagger::default(),
            spaces,
            rtt: RttEstimator::new(config.initial_rtt),
            cc: congestion_controller::new_controller(
                config.congestion_control,
                config.max_datagram_size,
            ),
            pto_backoff: 1,
            probes_pending: 0,
            flow_tx: OutgoingFlowController::new(VarInt::ZERO),
            flow_rx: IncomingFlowController::new(local_parameters.initial_max_data),
            conn_bytes_received: VarInt::ZERO,
            streams: None,
            local_ids: LocalIdRegistry::new(source_cid, stateless_reset::Token::new(token_bytes)),
            peer_ids: PeerIdRegistry::new(
                peer_cid,
                local_parameters.active_connection_id_limit.as_u64(),
            ),
            path,
            probing_path: None,
            idle_timeout: local_parameters.max_idle_timeout(),
            idle_timer: Timer::default(),
            local_parameters,
            peer_parameters: None,
            original_destination_cid: ConnectionId::EMPTY,
            retry_source_cid: None,
            token: Vec::new(),
            handshake_done_pending: false,
            handshake_confirmed: false,
            pending_new_token: None,
            last_key_update: None,
            close_state: None,
            events: VecDeque::new(),
            max_datagram_size: config.max_datagram_size,
            initial_packet_received: false,
            random,
            stats_bytes_sent: 0,
            stats_bytes_received: 0,
            stats_pto_count: 0,
            stats_congestion_events: 0,
        }
    }

    // === accessors =======================================================

    #[inline]
    pub fn state(&self) -> &State {
        &self.state
    }

    #[inline]
    pub fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    #[inline]
    pub fn remote_address(&self) -> SocketAddr {
        self.path.remote_address
    }

    /// IDs the demuxer should route to this connection
    pub fn local_connection_ids(&self) -> Vec<ConnectionId> {
        self.local_ids.active_ids().copied().collect()
    }

    /// The stateless reset token bound to one of our connection IDs
    pub fn stateless_reset_token_for(&self, id: &ConnectionId) -> Option<stateless_reset::Token> {
        self.local_ids.token_for(id)
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            smoothed_rtt: self.rtt.smoothed_rtt(),
            congestion_window: self.cc.congestion_window(),
            bytes_in_flight: self.cc.bytes_in_flight(),
            bytes_sent: self.stats_bytes_sent,
            bytes_received: self.stats_bytes_received,
            pto_count: self.stats_pto_count,
            congestion_events: self.stats_congestion_events,
        }
    }

    /// Supplies an opaque token to deliver in a NEW_TOKEN frame after
    /// the handshake confirms (server only)
    pub fn issue_new_token(&mut self, token: Vec<u8>) {
        debug_assert!(self.endpoint_type.is_server());
        self.pending_new_token = Some(token);
    }

    /// Token to echo in Initial packets (client, from NEW_TOKEN or Retry)
    pub fn set_token(&mut self, token: Vec<u8>) {
        self.token = token;
    }

    fn space(&mut self, space: PacketNumberSpace) -> Option<&mut Space> {
        self.spaces[space_index(space)].as_mut()
    }

    // === close ===========================================================

    /// Application-initiated immediate close
    pub fn close(&mut self, code: ApplicationErrorCode, reason: &[u8], now: Timestamp) {
        if !(self.state.is_handshaking() || self.state.is_connected()) {
            return;
        }
        self.enter_closing(
            transport::Error::APPLICATION_ERROR,
            Some((code, reason.to_vec())),
            now,
        );
        self.events
            .push_back(Event::Closed(connection::Error::Application(code)));
    }

    fn on_transport_error(&mut self, error: transport::Error, now: Timestamp) {
        tracing::debug!(code = %error.code, reason = error.reason, "connection error");
        self.enter_closing(error, None, now);
        self.events
            .push_back(Event::Closed(connection::Error::Transport(error)));
    }

    fn enter_closing(
        &mut self,
        error: transport::Error,
        application_close: Option<(ApplicationErrorCode, Vec<u8>)>,
        now: Timestamp,
    ) {
        if self.state.on_close().is_err() {
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
        //# The closing and draining connection states exist to ensure that
        //# connections close cleanly and that delayed or reordered packets are
        //# properly discarded.  These states SHOULD persist for at least three
        //# times the current PTO interval
        let drain = self.pto_period(PacketNumberSpace::ApplicationData) * 3;
        self.close_state = Some(CloseState {
            error,
            application_close,
            drain_deadline: now + drain,
            packets_since_close: 0,
            close_pending: true,
        });
        self.idle_timer.cancel();
    }

    fn pto_period(&self, space: PacketNumberSpace) -> Duration {
        self.rtt.pto_period(space) * self.pto_backoff
    }

    // === inbound =========================================================

    /// Processes one UDP datagram, which may hold several coalesced
    /// packets.
    pub fn on_datagram(
        &mut self,
        remote_address: SocketAddr,
        ecn: ExplicitCongestionNotification,
        datagram: &mut [u8],
        now: Timestamp,
    ) {
        if self.state.is_closed() {
            return;
        }

        if self.state.is_closing() || self.state.is_draining() {
            self.on_closing_packet(datagram, now);
            return;
        }

        let datagram_len = datagram.len();
        self.stats_bytes_received += datagram_len as u64;

        let on_active_path = remote_address == self.path.remote_address;
        if on_active_path {
            self.path.on_bytes_received(datagram_len, now);
        } else {
            self.on_new_path_datagram(remote_address, datagram_len, now);
        }

        let mut offset = 0;
        while offset < datagram.len() {
            let remaining = &mut datagram[offset..];
            let local_cid_len = self.local_ids.active_ids().next().map_or(0, |id| id.len());

            let (header, packet_len) = match Header::parse(remaining, local_cid_len) {
                Ok(parsed) => parsed,
                //= https://www.rfc-editor.org/rfc/rfc9000#section-12.2
                //# Every QUIC packet that is coalesced into a single UDP datagram is
                //# separate and complete.  ... processing of the remaining packets is
                //# still attempted after a parsing error of one packet.
                Err(_) => return,
            };

            let packet = &mut remaining[..packet_len];
            if let Err(error) = self.on_packet(&header, packet, ecn, on_active_path, now) {
                self.on_transport_error(error, now);
                return;
            }
            offset += packet_len;
        }
    }

    fn on_new_path_datagram(&mut self, remote_address: SocketAddr, len: usize, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-9
        //# An endpoint MUST NOT initiate connection migration before the
        //# handshake is confirmed
        if !self.handshake_confirmed
            || self
                .peer_parameters
                .as_ref()
                .is_some_and(|parameters| parameters.disable_active_migration)
        {
            return;
        }

        match &mut self.probing_path {
            Some(path) if path.remote_address == remote_address => {
                path.on_bytes_received(len, now);
            }
            _ => {
                let mut path = Path::new(remote_address, self.max_datagram_size);
                path.on_bytes_received(len, now);
                path.start_challenge(&mut self.random);
                self.probing_path = Some(path);
            }
        }
    }

    fn on_packet(
        &mut self,
        header: &Header,
        packet: &mut [u8],
        ecn: ExplicitCongestionNotification,
        on_active_path: bool,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        match header {
            Header::VersionNegotiation {
                versions_offset, ..
            } => {
                self.on_version_negotiation(packet, *versions_offset);
                Ok(())
            }
            Header::Retry { token, .. } => {
                self.on_retry(header, packet, token.clone());
                Ok(())
            }
            _ => self.on_protected_packet(header, packet, ecn, on_active_path, now),
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
    //# A client that supports only this version of QUIC MUST abandon the
    //# current connection attempt if it receives a Version Negotiation
    //# packet
    fn on_version_negotiation(&mut self, packet: &[u8], versions_offset: usize) {
        if !self.endpoint_type.is_client() || !self.state.is_handshaking() {
            return;
        }
        // a VN offering our version is spurious and ignored
        if packet::version_negotiation::supported_versions(packet, versions_offset)
            .any(|version| version == self.version)
        {
            return;
        }
        // nothing received from the server yet; give up
        if !self.initial_packet_received {
            self.events
                .push_back(Event::Closed(connection::Error::UnsupportedVersion));
            self.shutdown();
        }
    }

    fn on_retry(&mut self, header: &Header, packet: &[u8], token: core::ops::Range<usize>) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.2
        //# A client MUST accept and process at most one Retry packet for each
        //# connection attempt.
        if !self.endpoint_type.is_client()
            || self.retry_source_cid.is_some()
            || self.initial_packet_received
            || token.is_empty()
        {
            return;
        }

        if !packet::retry::validate(&self.original_destination_cid, packet, &self.retry_tagger) {
            return;
        }

        let Header::Retry { source_cid, .. } = header else {
            return;
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.2
        //# The client responds to a Retry packet with an Initial packet that
        //# includes the provided Retry token to continue connection
        //# establishment.  The client ... sets the Destination Connection ID to
        //# the value from the Source Connection ID field of the Retry packet.
        self.retry_source_cid = Some(*source_cid);
        self.token = packet[token].to_vec();
        self.peer_ids.rebind_initial(*source_cid);

        // initial keys derive from the new DCID; the packet number
        // sequence continues
        let _ = self
            .crypto
            .install_initial_keys(endpoint::Type::Client, source_cid.as_bytes());

        // retransmit the whole first flight under the new keys
        if let Some(space) = self.space(PacketNumberSpace::Initial) {
            let sent = space.crypto.bytes_transmitted();
            space.crypto.on_loss(0, sent);
        }
    }

    fn on_protected_packet(
        &mut self,
        header: &Header,
        packet: &mut [u8],
        ecn: ExplicitCongestionNotification,
        on_active_path: bool,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let Some(level) = header.encryption_level() else {
            return Ok(());
        };
        let Some(pn_offset) = header.pn_offset() else {
            return Ok(());
        };
        let pn_space = level.packet_number_space();

        // decryption failures and missing keys drop the packet silently
        let Some(cleartext) = self.try_open(header, packet, level, pn_offset, now) else {
            return Ok(());
        };
        let (packet_number, payload_range, key_update_observed) = cleartext;

        {
            let Some(space) = self.space(pn_space) else {
                return Ok(());
            };
            if space.ack_manager.is_duplicate(packet_number) {
                return Ok(());
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
        //# a server MUST discard Initial keys when it first successfully
        //# processes a Handshake packet
        if self.endpoint_type.is_server() && level == EncryptionLevel::Handshake {
            self.discard_space(PacketNumberSpace::Initial);
            // a handshake packet also validates the client's address
            self.path.on_validated();
        }

        if level == EncryptionLevel::Initial {
            self.on_first_initial(header, now)?;
        }

        if key_update_observed {
            self.commit_key_update(now);
        }

        // run every frame before generating any acknowledgment state
        let payload = &packet[payload_range];
        let ack_eliciting = self.process_frames(level, payload, on_active_path, now)?;

        if self.state.is_closing() || self.state.is_draining() || self.state.is_closed() {
            return Ok(());
        }

        let rtt = self.rtt;
        if let Some(space) = self.spaces[space_index(pn_space)].as_mut() {
            space.ack_manager.on_packet_received(
                packet_number,
                ack_eliciting.is_ack_eliciting(),
                ecn,
                now,
                &rtt,
            );
        }

        if ack_eliciting.is_ack_eliciting() {
            self.rearm_idle_timer(now);
        }

        self.drive_handshake().map_err(|error| match error {
            connection::Error::Transport(error) => error,
            _ => transport::Error::INTERNAL_ERROR.with_reason("handshake failure"),
        })?;
        Ok(())
    }

    /// Header-unprotects and decrypts one packet in place.
    /// Returns `(packet number, payload range, key update observed)`.
    fn try_open(
        &mut self,
        header: &Header,
        packet: &mut [u8],
        level: EncryptionLevel,
        pn_offset: usize,
        now: Timestamp,
    ) -> Option<(u64, core::ops::Range<usize>, bool)> {
        let pn_space = level.packet_number_space();
        let largest = {
            let space = self.spaces[space_index(pn_space)].as_ref()?;
            space.largest_received_packet_number()
        };

        if level == EncryptionLevel::OneRtt {
            let header_key = self.crypto.one_rtt_header_opener()?;
            let (first, truncated) =
                packet::unprotect(header_key, pn_space, packet, pn_offset).ok()?;
            let phase = packet::key_phase(first);
            let (key, is_next) = self.crypto.one_rtt_opener(phase)?;

            //= https://www.rfc-editor.org/rfc/rfc9001#section-6
            //# An endpoint MUST NOT initiate more than one key update at a time.
            if is_next && !self.key_update_allowed(now) {
                return None;
            }

            let (packet_number, payload) =
                packet::decrypt(key, packet, pn_offset, truncated, largest).ok()?;
            Some((packet_number.as_u64(), payload, is_next))
        } else {
            let (opener, header_key) = {
                let (key, header_key) = self.crypto.opener(level)?;
                (key, header_key)
            };
            let (_, truncated) =
                packet::unprotect(header_key, pn_space, packet, pn_offset).ok()?;
            let (packet_number, payload) =
                packet::decrypt(opener, packet, pn_offset, truncated, largest).ok()?;
            let _ = header;
            Some((packet_number.as_u64(), payload, false))
        }
    }

    fn key_update_allowed(&self, now: Timestamp) -> bool {
        match self.last_key_update {
            Some(last) => now.saturating_duration_since(last) >= self.rtt.smoothed_rtt(),
            None => true,
        }
    }

    fn commit_key_update(&mut self, now: Timestamp) {
        if self.crypto.on_key_update().is_ok() {
            self.last_key_update = Some(now);
            self.events.push_back(Event::KeyUpdate);
        }
    }

    /// First decrypted Initial from the peer
    fn on_first_initial(&mut self, header: &Header, _now: Timestamp) -> Result<(), transport::Error> {
        if self.initial_packet_received {
            return Ok(());
        }
        self.initial_packet_received = true;

        if let (Header::Initial { source_cid, .. }, endpoint::Type::Client) =
            (header, self.endpoint_type)
        {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
            //# Upon first receiving an Initial or Retry packet from the server, the
            //# client uses the Source Connection ID supplied by the server as the
            //# Destination Connection ID for subsequent packets
            if self.retry_source_cid.is_none() {
                self.peer_ids.rebind_initial(*source_cid);
            }
        }

        let _ = self.state.on_initial_exchanged();
        Ok(())
    }

    fn on_closing_packet(&mut self, _datagram: &mut [u8], now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.1
        //# An endpoint in the closing state sends a packet containing a
        //# CONNECTION_CLOSE frame in response to any incoming packet that it
        //# attributes to the connection.  ... limiting the number of packets
        //# it generates.
        if let Some(close) = self.close_state.as_mut() {
            close.packets_since_close += 1;
            // one close for every few packets received
            if close.packets_since_close.is_power_of_two() {
                close.close_pending = true;
            }
            if close.drain_deadline.has_elapsed(now) {
                self.shutdown();
            }
        }
    }

    /// `true` if the trailing bytes of `datagram` authenticate as a
    /// stateless reset from the peer
    pub fn on_possible_stateless_reset(&mut self, datagram: &[u8]) -> bool {
        let Some(tail) = datagram
            .len()
            .checked_sub(stateless_reset::TOKEN_LEN)
            .map(|start| &datagram[start..])
        else {
            return false;
        };
        let Ok(token) = stateless_reset::Token::try_from(tail) else {
            return false;
        };
        if self.peer_ids.is_stateless_reset(&token) {
            self.events
                .push_back(Event::Closed(connection::Error::StatelessReset));
            self.shutdown();
            true
        } else {
            false
        }
    }

    // === frame processing ================================================

    fn process_frames(
        &mut self,
        level: EncryptionLevel,
        payload: &[u8],
        on_active_path: bool,
        now: Timestamp,
    ) -> Result<AckElicitation, transport::Error> {
        use quiver_codec::DecoderBuffer;

        let mut elicitation = AckElicitation::NonEliciting;
        let mut buffer = DecoderBuffer::new(payload);

        if buffer.is_empty() {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
            //# An endpoint MUST treat receipt of a packet containing no frames as a
            //# connection error of type PROTOCOL_VIOLATION.
            return Err(transport::Error::PROTOCOL_VIOLATION.with_reason("empty packet"));
        }

        while !buffer.is_empty() {
            let (frame, remaining) = buffer
                .decode::<Frame>()
                .map_err(transport::Error::from)?;
            elicitation = elicitation.merge(frame.ack_elicitation());
            self.on_frame(level, frame, on_active_path, now)?;
            buffer = remaining;

            if self.state.is_draining() || self.state.is_closed() {
                break;
            }
        }

        Ok(elicitation)
    }

    fn ensure_level(
        &self,
        allowed: bool,
        frame_name: &'static str,
    ) -> Result<(), transport::Error> {
        if allowed {
            Ok(())
        } else {
            let _ = frame_name;
            Err(transport::Error::PROTOCOL_VIOLATION.with_reason("frame forbidden at this level"))
        }
    }

    fn on_frame(
        &mut self,
        level: EncryptionLevel,
        frame: Frame,
        on_active_path: bool,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let pn_space = level.packet_number_space();
        let app_level = matches!(level, EncryptionLevel::ZeroRtt | EncryptionLevel::OneRtt);

        match frame {
            Frame::Padding(_) | Frame::Ping(_) => Ok(()),
            Frame::Ack(ack) => {
                self.ensure_level(level != EncryptionLevel::ZeroRtt, "ACK")?;
                self.on_ack_frame(pn_space, ack, now)
            }
            Frame::Crypto(crypto) => {
                self.ensure_level(level != EncryptionLevel::ZeroRtt, "CRYPTO")?;
                let space = self
                    .space(pn_space)
                    .ok_or(transport::Error::INTERNAL_ERROR)?;
                space.crypto.on_crypto_frame(&crypto)
            }
            Frame::Stream(stream) => {
                self.ensure_level(app_level, "STREAM")?;
                let newly = self.streams_mut()?.on_stream_frame(&stream)?;
                self.on_connection_bytes(newly)?;
                let id = StreamId::from_varint(stream.stream_id);
                self.events.push_back(Event::StreamReadable(id));
                self.drain_accepted();
                Ok(())
            }
            Frame::ResetStream(reset) => {
                self.ensure_level(app_level, "RESET_STREAM")?;
                let newly = self.streams_mut()?.on_reset_stream(&reset)?;
                self.on_connection_bytes(newly)?;
                let id = StreamId::from_varint(reset.stream_id);
                self.events.push_back(Event::StreamReadable(id));
                self.drain_accepted();
                Ok(())
            }
            Frame::StopSending(stop) => {
                self.ensure_level(app_level, "STOP_SENDING")?;
                self.streams_mut()?.on_stop_sending(&stop)?;
                self.drain_accepted();
                Ok(())
            }
            Frame::MaxData(max_data) => {
                self.ensure_level(app_level, "MAX_DATA")?;
                // non-increasing limits are ignored
                if self.flow_tx.on_max_data(max_data.maximum_data) {
                    self.notify_writable();
                }
                Ok(())
            }
            Frame::MaxStreamData(frame) => {
                self.ensure_level(app_level, "MAX_STREAM_DATA")?;
                self.streams_mut()?.on_max_stream_data(&frame)?;
                let id = StreamId::from_varint(frame.stream_id);
                self.events.push_back(Event::StreamWritable(id));
                Ok(())
            }
            Frame::MaxStreams(frame) => {
                self.ensure_level(app_level, "MAX_STREAMS")?;
                self.streams_mut()?.on_max_streams(&frame);
                Ok(())
            }
            Frame::DataBlocked(_) | Frame::StreamDataBlocked(_) | Frame::StreamsBlocked(_) => {
                self.ensure_level(app_level, "BLOCKED")
            }
            Frame::NewConnectionId(frame) => {
                self.ensure_level(app_level, "NEW_CONNECTION_ID")?;
                self.peer_ids.on_new_connection_id(&frame)
            }
            Frame::RetireConnectionId(frame) => {
                self.ensure_level(app_level, "RETIRE_CONNECTION_ID")?;
                // the reference for the cannot-retire-own-dcid check is
                // the primary id the peer is currently addressing
                let packet_dcid = self
                    .local_ids
                    .active_ids()
                    .next()
                    .copied()
                    .unwrap_or(ConnectionId::EMPTY);
                self.local_ids
                    .on_retire_connection_id(&frame, &packet_dcid, &mut self.random)
                    .map(|_| ())
            }
            Frame::NewToken(new_token) => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
                //# Servers MUST treat receipt of a NEW_TOKEN frame as a connection
                //# error of type PROTOCOL_VIOLATION.
                self.ensure_level(
                    app_level && self.endpoint_type.is_client(),
                    "NEW_TOKEN",
                )?;
                self.events
                    .push_back(Event::NewToken(new_token.token.to_vec()));
                Ok(())
            }
            Frame::PathChallenge(challenge) => {
                self.ensure_level(app_level, "PATH_CHALLENGE")?;
                if on_active_path {
                    self.path.on_path_challenge(&challenge);
                } else if let Some(path) = self.probing_path.as_mut() {
                    path.on_path_challenge(&challenge);
                }
                Ok(())
            }
            Frame::PathResponse(response) => {
                self.ensure_level(app_level, "PATH_RESPONSE")?;
                self.on_path_response(&response);
                Ok(())
            }
            Frame::HandshakeDone(_) => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
                //# A server MUST treat receipt of a HANDSHAKE_DONE frame as a
                //# connection error of type PROTOCOL_VIOLATION.
                self.ensure_level(
                    level == EncryptionLevel::OneRtt && self.endpoint_type.is_client(),
                    "HANDSHAKE_DONE",
                )?;
                self.on_handshake_confirmed();
                Ok(())
            }
            Frame::ConnectionClose(close) => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-12.5
                //# A CONNECTION_CLOSE of type 0x1d MUST be replaced by a CONNECTION_CLOSE
                //# of type 0x1c when sending the frame in Initial or Handshake packets.
                if close.is_application_close() {
                    self.ensure_level(app_level, "CONNECTION_CLOSE (application)")?;
                }
                self.on_peer_close(&close, now);
                Ok(())
            }
        }
    }

    fn on_peer_close(&mut self, close: &frame::ConnectionClose, now: Timestamp) {
        let error = if close.is_application_close() {
            connection::Error::Application(ApplicationErrorCode::new(close.error_code))
        } else {
            connection::Error::Transport(transport::Error::new(close.error_code))
        };
        self.events.push_back(Event::Closed(error));

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.2
        //# An endpoint that receives a CONNECTION_CLOSE frame MAY send a single
        //# packet containing a CONNECTION_CLOSE frame before entering the
        //# draining state
        match self.state.clone() {
            State::Closing => {
                let _ = self.state.on_peer_close();
            }
            _ => {
                let _ = self.state.on_close();
                let drain = self.pto_period(PacketNumberSpace::ApplicationData) * 3;
                self.close_state = Some(CloseState {
                    error: transport::Error::NO_ERROR,
                    application_close: None,
                    drain_deadline: now + drain,
                    packets_since_close: 0,
                    close_pending: false,
                });
                let _ = self.state.on_peer_close();
            }
        }
        self.idle_timer.cancel();
    }

    fn on_path_response(&mut self, response: &frame::PathResponse) {
        if self.path.on_path_response(response) {
            return;
        }
        let validated = self
            .probing_path
            .as_mut()
            .is_some_and(|path| path.on_path_response(response));
        if validated {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-9.3
            //# An endpoint only changes the address to which it sends packets in
            //# response to the highest-numbered non-probing packet.
            let new_path = self.probing_path.take().expect("validated above");
            let old_path = core::mem::replace(&mut self.path, new_path);
            let _ = old_path;
            // a fresh path must not reuse the old connection id
            self.peer_ids.use_new_id();
        }
    }

    fn on_ack_frame(
        &mut self,
        pn_space: PacketNumberSpace,
        ack: frame::Ack,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let outcome = {
            let rtt = self.rtt;
            let Some(space) = self.spaces[space_index(pn_space)].as_mut() else {
                return Ok(());
            };
            space.validate_ack(&ack)?;
            space
                .recovery
                .on_ack_ranges(&ack.ranges, now, &rtt, &mut self.cc)
        };

        if let Some(time_sent) = outcome.rtt_sample {
            let exponent = self
                .peer_parameters
                .as_ref()
                .map_or(3, |parameters| parameters.ack_delay_exponent);
            let ack_delay = unscale_ack_delay(ack.ack_delay, exponent);
            let rtt_sample = now.saturating_duration_since(time_sent);
            self.rtt.update_rtt(ack_delay, rtt_sample, now, pn_space);
        }

        if outcome.newly_acked {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
            //# The PTO backoff factor is reset when an acknowledgment is received
            self.pto_backoff = 1;
        }

        for acked in outcome.acked_frames {
            self.on_frame_acked(pn_space, acked);
        }

        // handle ECN-CE marks as a congestion signal
        if let Some(counts) = ack.ecn_counts {
            if counts.ce_count > VarInt::ZERO {
                self.stats_congestion_events += 1;
                self.cc.on_explicit_congestion(now, now);
            }
        }

        self.detect_and_route_losses(pn_space, now);
        if let Some(space) = self.space(pn_space) {
            space.recovery.prune_tombstones();
        }
        Ok(())
    }

    fn on_frame_acked(&mut self, pn_space: PacketNumberSpace, acked: SentFrame) {
        match acked {
            SentFrame::Ack {
                largest_acknowledged,
            } => {
                if let Some(space) = self.space(pn_space) {
                    space.ack_manager.on_ack_frame_acked(largest_acknowledged);
                }
            }
            SentFrame::Crypto { offset, len } => {
                if let Some(space) = self.space(pn_space) {
                    space.crypto.on_ack(offset, len);
                }
            }
            SentFrame::Stream {
                id,
                offset,
                len,
                is_fin,
            } => {
                if let Some(send) = self.streams.as_mut().and_then(|streams| streams.send_stream(id))
                {
                    send.on_ack(offset, len, is_fin);
                    if send.is_finished() {
                        self.collect_stream_announcements();
                    }
                }
            }
            SentFrame::ResetStream { id, .. } => {
                if let Some(send) = self.streams.as_mut().and_then(|streams| streams.send_stream(id))
                {
                    send.on_reset_ack();
                }
                self.collect_stream_announcements();
            }
            SentFrame::HandshakeDone => {
                // confirmed delivery; nothing further to do
            }
            SentFrame::Ping
            | SentFrame::StopSending { .. }
            | SentFrame::MaxData { .. }
            | SentFrame::MaxStreamData { .. }
            | SentFrame::MaxStreams { .. }
            | SentFrame::DataBlocked { .. }
            | SentFrame::StreamDataBlocked { .. }
            | SentFrame::StreamsBlocked { .. }
            | SentFrame::NewConnectionId { .. }
            | SentFrame::RetireConnectionId { .. }
            | SentFrame::NewToken => {}
        }
    }

    fn detect_and_route_losses(&mut self, pn_space: PacketNumberSpace, now: Timestamp) {
        let (lost, persistent) = {
            let rtt = self.rtt;
            let Some(space) = self.spaces[space_index(pn_space)].as_mut() else {
                return;
            };
            space.recovery.detect_lost(now, &rtt, &mut self.cc)
        };

        if !lost.is_empty() {
            self.stats_congestion_events += 1;
            tracing::debug!(space = ?pn_space, frames = lost.len(), persistent, "packets lost");
        }

        for frame in lost {
            self.on_frame_lost(pn_space, frame);
        }
    }

    fn on_frame_lost(&mut self, pn_space: PacketNumberSpace, lost: SentFrame) {
        match lost {
            SentFrame::Crypto { offset, len } => {
                if let Some(space) = self.space(pn_space) {
                    space.crypto.on_loss(offset, len);
                }
            }
            SentFrame::Stream {
                id,
                offset,
                len,
                is_fin,
            } => {
                if let Some(send) = self.streams.as_mut().and_then(|streams| streams.send_stream(id))
                {
                    send.on_loss(offset, len, is_fin);
                }
            }
            SentFrame::ResetStream {
                id,
                code,
                final_size,
            } => {
                if let Some(send) = self.streams.as_mut().and_then(|streams| streams.send_stream(id))
                {
                    send.on_reset_loss(code, final_size);
                }
            }
            SentFrame::StopSending { id, code } => {
                if let Some(recv) = self.streams.as_mut().and_then(|streams| streams.recv_stream(id))
                {
                    recv.stop_sending(code);
                }
            }
            SentFrame::MaxData { .. } => {
                self.flow_rx.reannounce();
            }
            SentFrame::MaxStreamData { id, .. } => {
                if let Some(recv) = self.streams.as_mut().and_then(|streams| streams.recv_stream(id))
                {
                    recv.reannounce_window();
                }
            }
            SentFrame::MaxStreams { stream_type, .. } => {
                if let Some(streams) = self.streams.as_mut() {
                    streams.reannounce_max_streams(stream_type);
                }
            }
            SentFrame::NewConnectionId { sequence_number } => {
                self.local_ids.on_announcement_loss(sequence_number);
            }
            SentFrame::RetireConnectionId { sequence_number } => {
                self.peer_ids.on_retirement_loss(sequence_number);
            }
            SentFrame::HandshakeDone => {
                self.handshake_done_pending = true;
            }
            SentFrame::NewToken => {
                // the token blob was consumed; nothing to resend unless
                // the application issues another
            }
            SentFrame::Ack { .. }
            | SentFrame::Ping
            | SentFrame::DataBlocked { .. }
            | SentFrame::StreamDataBlocked { .. }
            | SentFrame::StreamsBlocked { .. } => {}
        }
    }

    fn on_connection_bytes(&mut self, newly: u64) -> Result<(), transport::Error> {
        if newly == 0 {
            return Ok(());
        }
        self.conn_bytes_received = self
            .conn_bytes_received
            .checked_add_usize(newly as usize)
            .ok_or(transport::Error::FLOW_CONTROL_ERROR)?;
        self.flow_rx.on_data(self.conn_bytes_received)
    }

    fn streams_mut(&mut self) -> Result<&mut StreamManager, transport::Error> {
        self.streams
            .as_mut()
            .ok_or(transport::Error::PROTOCOL_VIOLATION.with_reason("streams before handshake"))
    }

    fn drain_accepted(&mut self) {
        if let Some(streams) = self.streams.as_mut() {
            while let Some(id) = streams.accept() {
                self.events.push_back(Event::StreamOpened(id));
            }
        }
    }

    fn notify_writable(&mut self) {
        if let Some(streams) = self.streams.as_ref() {
            for id in streams.transmission_candidates() {
                self.events.push_back(Event::StreamWritable(id));
            }
        }
    }

    fn collect_stream_announcements(&mut self) {
        if let Some(streams) = self.streams.as_mut() {
            streams.cleanup();
        }
    }

    // === handshake =======================================================

    fn drive_handshake(&mut self) -> Result<(), connection::Error> {
        // feed reassembled CRYPTO data to the TLS session
        for space_slot in self.spaces.iter_mut() {
            let Some(space) = space_slot else { continue };
            let level = match space.id() {
                PacketNumberSpace::Initial => EncryptionLevel::Initial,
                PacketNumberSpace::Handshake => EncryptionLevel::Handshake,
                PacketNumberSpace::ApplicationData => EncryptionLevel::OneRtt,
            };
            while let Some(bytes) = space.crypto.pop_received() {
                self.tls
                    .provide_crypto_data(level, &bytes)
                    .map_err(|error| {
                        connection::Error::Transport(transport::Error::from(error))
                    })?;
            }
        }

        let mut context = HandshakeContext {
            crypto: &mut self.crypto,
            spaces: &mut self.spaces,
            alert: None,
        };
        let result = self.tls.do_handshake(&mut context);
        let alert = context.alert;

        if let Some((level, code)) = alert {
            let _ = level;
            return Err(connection::Error::Transport(
                transport::Error::crypto_error(code),
            ));
        }
        result.map_err(|error| {
            connection::Error::Transport(transport::Error::from(error))
        })?;

        if self.tls.handshake_complete() && self.peer_parameters.is_none() {
            self.on_handshake_complete()?;
        }
        Ok(())
    }

    fn on_handshake_complete(&mut self) -> Result<(), connection::Error> {
        use quiver_codec::DecoderBuffer;

        let raw = self
            .tls
            .peer_transport_parameters()
            .ok_or(connection::Error::Transport(
                transport::Error::TRANSPORT_PARAMETER_ERROR.with_reason("missing parameters"),
            ))?
            .to_vec();

        let (parameters, remaining) = DecoderBuffer::new(&raw)
            .decode::<TransportParameters>()
            .map_err(|_| {
                connection::Error::Transport(transport::Error::TRANSPORT_PARAMETER_ERROR)
            })?;
        remaining.ensure_empty().map_err(|_| {
            connection::Error::Transport(transport::Error::TRANSPORT_PARAMETER_ERROR)
        })?;
        parameters
            .validate(self.endpoint_type.peer_type())
            .map_err(connection::Error::Transport)?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.3
        //# An endpoint MUST treat the absence of the
        //# initial_source_connection_id transport parameter from either
        //# endpoint ... as a connection error of type
        //# TRANSPORT_PARAMETER_ERROR.
        if self.endpoint_type.is_client() {
            let odcid_matches = parameters.original_destination_connection_id.as_ref()
                == Some(&self.original_destination_cid);
            let retry_matches =
                parameters.retry_source_connection_id == self.retry_source_cid;
            if !odcid_matches || !retry_matches {
                return Err(connection::Error::Transport(
                    transport::Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("authenticated connection ids do not match"),
                ));
            }
        }

        // apply the peer's limits
        self.flow_tx = OutgoingFlowController::new(parameters.initial_max_data);
        self.rtt.on_max_ack_delay(parameters.max_ack_delay());
        self.idle_timeout = match (self.idle_timeout, parameters.max_idle_timeout()) {
            (Some(local), Some(peer)) => Some(local.min(peer)),
            (local, peer) => local.or(peer),
        };
        if let Some(token) = parameters.stateless_reset_token {
            self.peer_ids.on_handshake_token(token);
        }
        self.local_ids
            .on_peer_limit(parameters.active_connection_id_limit, &mut self.random);

        self.streams = Some(StreamManager::new(
            self.endpoint_type,
            StreamLimits {
                local_bidi_remote_data: self.local_parameters.initial_max_stream_data_bidi_remote,
                local_bidi_local_data: self.local_parameters.initial_max_stream_data_bidi_local,
                local_uni_data: self.local_parameters.initial_max_stream_data_uni,
                local_max_streams_bidi: self.local_parameters.initial_max_streams_bidi,
                local_max_streams_uni: self.local_parameters.initial_max_streams_uni,
                peer_bidi_remote_data: parameters.initial_max_stream_data_bidi_local,
                peer_bidi_local_data: parameters.initial_max_stream_data_bidi_remote,
                peer_uni_data: parameters.initial_max_stream_data_uni,
                peer_max_streams_bidi: parameters.initial_max_streams_bidi,
                peer_max_streams_uni: parameters.initial_max_streams_uni,
            },
        ));
        self.peer_parameters = Some(parameters);

        let _ = self.state.on_handshake_complete();
        self.events.push_back(Event::HandshakeComplete);

        if self.endpoint_type.is_server() {
            //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
            //# the TLS handshake is considered confirmed at the
            //# server when the handshake completes
            self.handshake_done_pending = true;
            self.on_handshake_confirmed();
        }
        Ok(())
    }

    fn on_handshake_confirmed(&mut self) {
        if self.handshake_confirmed {
            return;
        }
        self.handshake_confirmed = true;

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
        //# An endpoint MUST discard its Handshake keys when the TLS handshake is
        //# confirmed
        self.discard_space(PacketNumberSpace::Initial);
        self.discard_space(PacketNumberSpace::Handshake);
    }

    fn discard_space(&mut self, pn_space: PacketNumberSpace) {
        debug_assert!(pn_space != PacketNumberSpace::ApplicationData);
        if let Some(mut space) = self.spaces[space_index(pn_space)].take() {
            space.recovery.discard(&mut self.cc);
        }
        let level = match pn_space {
            PacketNumberSpace::Initial => EncryptionLevel::Initial,
            _ => EncryptionLevel::Handshake,
        };
        if self.crypto.can_seal(level) || self.crypto.can_open(level) {
            self.crypto.discard(level);
        }
    }

    // === application surface ============================================

    pub fn open_stream(&mut self, stream_type: StreamType) -> Result<StreamId, connection::Error> {
        if !self.state.is_connected() {
            return Err(connection::Error::Closed);
        }
        self.streams
            .as_mut()
            .ok_or(connection::Error::Closed)?
            .open(stream_type)
    }

    pub fn stream_write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, StreamError> {
        let send = self
            .streams
            .as_mut()
            .and_then(|streams| streams.send_stream(id))
            .ok_or(StreamError::Broken)?;
        send.write(data)
    }

    pub fn stream_finish(&mut self, id: StreamId) {
        if let Some(send) = self.streams.as_mut().and_then(|streams| streams.send_stream(id)) {
            send.finish();
        }
    }

    pub fn stream_reset(&mut self, id: StreamId, code: ApplicationErrorCode) {
        if let Some(streams) = self.streams.as_mut() {
            streams.reset(id, code);
        }
    }

    pub fn stream_read(&mut self, id: StreamId, buf: &mut [u8]) -> Result<usize, StreamError> {
        let streams = self.streams.as_mut().ok_or(StreamError::Broken)?;
        let recv = streams.recv_stream(id).ok_or(StreamError::Broken)?;
        let result = recv.read(buf);

        if let Ok(len) = result {
            if len > 0 {
                recv.release_window();
                self.flow_rx.release();
            }
        }
        self.collect_stream_announcements();
        result
    }

    // === timers ==========================================================

    fn rearm_idle_timer(&mut self, now: Timestamp) {
        if let Some(timeout) = self.idle_timeout {
            self.idle_timer.set(now + timeout);
        }
    }

    /// The earliest deadline at which `on_timeout` must run
    pub fn next_timeout(&self) -> Option<Timestamp> {
        let mut deadline: Option<Timestamp> = None;
        let mut consider = |candidate: Option<Timestamp>| {
            if let Some(candidate) = candidate {
                deadline = Some(deadline.map_or(candidate, |current| current.min(candidate)));
            }
        };

        if let Some(close) = &self.close_state {
            consider(Some(close.drain_deadline));
            return deadline;
        }

        consider(self.idle_timer.deadline());
        for space in self.spaces.iter().flatten() {
            consider(space.ack_manager.ack_timer_deadline());
            consider(space.recovery.loss_time());
        }
        consider(self.pto_deadline());
        deadline
    }

    fn pto_deadline(&self) -> Option<Timestamp> {
        let mut deadline: Option<Timestamp> = None;
        for space in self.spaces.iter().flatten() {
            if !space.recovery.has_ack_eliciting_in_flight() {
                continue;
            }
            if let Some(base) = space.recovery.time_of_last_ack_eliciting() {
                let when = base + self.rtt.pto_period(space.id()) * self.pto_backoff;
                deadline = Some(deadline.map_or(when, |current| current.min(when)));
            }
        }
        deadline
    }

    pub fn on_timeout(&mut self, now: Timestamp) {
        if self.state.is_closed() {
            return;
        }

        if let Some(close) = &self.close_state {
            if close.drain_deadline.has_elapsed(now) {
                self.shutdown();
            }
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# If a max_idle_timeout is specified by either endpoint in its
        //# transport parameters ... the connection is silently closed and its
        //# state is discarded when it remains idle
        if self.idle_timer.poll_expiration(now) {
            self.events
                .push_back(Event::Closed(connection::Error::IdleTimerExpired));
            self.shutdown();
            return;
        }

        for pn_space in PacketNumberSpace::ALL {
            let expired = self.spaces[space_index(pn_space)]
                .as_ref()
                .and_then(|space| space.recovery.loss_time())
                .is_some_and(|deadline| deadline.has_elapsed(now));
            if expired {
                self.detect_and_route_losses(pn_space, now);
            }
        }

        if let Some(deadline) = self.pto_deadline() {
            if deadline.has_elapsed(now) {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
                //# When a PTO timer expires, a sender MUST send at least one ack-
                //# eliciting packet in the packet number space as a probe.
                self.probes_pending = 2;
                self.pto_backoff = self.pto_backoff.saturating_mul(2);
                self.stats_pto_count += 1;
                tracing::debug!(backoff = self.pto_backoff, "probe timeout");
            }
        }
    }

    /// Hands the connection its own termination (no packets are sent)
    fn shutdown(&mut self) {
        let _ = self.state.on_close();
        let _ = self.state.on_drain_complete();
        self.state = State::Closed;
        self.idle_timer.cancel();
        self.close_state = None;
    }

    /// `true` once the connection can be dropped entirely
    pub fn is_finished(&self) -> bool {
        self.state.is_closed()
    }
}

/// TLS callback plumbing: routes secrets into the cryptographer and
/// handshake bytes into the per-level CRYPTO streams
struct HandshakeContext<'a> {
    crypto: &'a mut Cryptographer,
    spaces: &'a mut [Option<Space>; 3],
    alert: Option<(EncryptionLevel, u8)>,
}

impl tls::Context for HandshakeContext<'_> {
    fn set_read_secret(
        &mut self,
        level: EncryptionLevel,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), CryptoError> {
        self.crypto.install_read_secret(level, suite, secret)
    }

    fn set_write_secret(
        &mut self,
        level: EncryptionLevel,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), CryptoError> {
        self.crypto.install_write_secret(level, suite, secret)
    }

    fn write_crypto(&mut self, level: EncryptionLevel, bytes: &[u8]) -> Result<(), CryptoError> {
        let index = space_index(level.packet_number_space());
        let space = self.spaces[index]
            .as_mut()
            .ok_or_else(CryptoError::internal_error)?;
        space.crypto.write(bytes);
        Ok(())
    }

    fn flush(&mut self) {}

    fn send_alert(&mut self, level: EncryptionLevel, code: u8) {
        self.alert = Some((level, code));
    }
}

#[inline]
pub(crate) fn space_index(space: PacketNumberSpace) -> usize {
    match space {
        PacketNumberSpace::Initial => 0,
        PacketNumberSpace::Handshake => 1,
        PacketNumberSpace::ApplicationData => 2,
    }
}

// transmit path lives in a sibling file to keep this one readable
mod transmit;
