use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use sctp_proto::{
    Association, AssociationError, AssociationHandle, ClientConfig, DatagramEvent,
    EndpointConfig, Payload, PayloadProtocolIdentifier, ReliabilityType, ServerConfig,
    StreamEvent, Transmit,
};
use tracing::{debug, trace, warn};

use crate::{
    config::AssociationConfig,
    notification::{AssocChangeState, Notification, ADDR_UNREACHABLE},
    shared::{
        Event, LossReason, PrPolicy, ReceivedData, SendError, SendOptions, ShutdownMode,
        SocketError,
    },
    Socket, MSG_EOR,
};

/// Address every association is keyed under
///
/// Each socket owns its own `sctp_proto::Endpoint` and reaches exactly one peer through the
/// link it is wired to, so the address only has to be stable.
const PEER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000);

/// Stream count reported in association change notifications
const STREAMS: u16 = u16::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Listening,
    Connecting,
    Established,
    ShuttingDown,
    Closed,
}

/// A socket of the [`Endpoint`](crate::Endpoint) engine, backed by an `sctp_proto` association
///
/// The protocol endpoint is created on [`listen`](Socket::listen) or
/// [`connect`](Socket::connect); packets arriving before either are dropped. A socket carries at
/// most one association.
pub struct SctpSocket {
    config: Arc<AssociationConfig>,
    local_port: u16,
    remote_port: Option<u16>,
    state: State,
    /// The association came up on a listening socket and awaits `accept`
    ready: bool,
    accepted: bool,
    read_closed: bool,
    endpoint: Option<sctp_proto::Endpoint>,
    association: Option<(AssociationHandle, Association)>,
    /// Streams this side has opened or accepted
    opened: BTreeSet<u16>,
    transmits: VecDeque<Bytes>,
    events: VecDeque<Event>,
    buffered: usize,
    timeout: Option<Instant>,
}

impl SctpSocket {
    pub(crate) fn new(config: Arc<AssociationConfig>, local_port: u16) -> Self {
        Self {
            config,
            local_port,
            remote_port: None,
            state: State::Idle,
            ready: false,
            accepted: false,
            read_closed: false,
            endpoint: None,
            association: None,
            opened: BTreeSet::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            buffered: 0,
            timeout: None,
        }
    }

    /// The port passed to [`connect`](Socket::connect), if any
    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    fn assoc_id(&self) -> u32 {
        u32::from(self.local_port)
    }

    fn notify(&mut self, notification: Notification) {
        self.events
            .push_back(Event::Data(ReceivedData::notification(&notification)));
    }

    fn assoc_change(&mut self, state: AssocChangeState) {
        self.notify(Notification::AssocChange {
            state,
            error: 0,
            outbound_streams: STREAMS,
            inbound_streams: STREAMS,
            assoc_id: self.assoc_id(),
        });
    }

    /// Move everything the association produced into the socket's queues
    fn drive(&mut self, now: Instant) {
        self.poll_association();
        let Some(endpoint) = self.endpoint.as_mut() else {
            return;
        };
        if let Some((ch, association)) = self.association.as_mut() {
            while let Some(event) = association.poll_endpoint_event() {
                if let Some(event) = endpoint.handle_event(*ch, event) {
                    association.handle_event(event);
                }
            }
            while let Some(transmit) = association.poll_transmit(now) {
                queue_transmit(&mut self.transmits, transmit);
            }
        }
        while let Some(transmit) = endpoint.poll_transmit() {
            queue_transmit(&mut self.transmits, transmit);
        }
        self.poll_association();
        self.refresh();
    }

    fn poll_association(&mut self) {
        loop {
            let Some((_, association)) = self.association.as_mut() else {
                return;
            };
            let Some(event) = association.poll() else {
                break;
            };
            match event {
                sctp_proto::Event::Connected => self.on_connected(),
                sctp_proto::Event::AssociationLost {
                    reason: reason @ AssociationError::HandshakeFailed(_),
                } => {
                    debug!(?reason, "handshake failed");
                    self.on_lost(LossReason::CantStart);
                }
                sctp_proto::Event::AssociationLost { reason } => {
                    debug!(?reason, "association lost");
                    let reason = match reason {
                        AssociationError::TimedOut => LossReason::Timeout,
                        _ if self.state == State::ShuttingDown => LossReason::ShutdownComplete,
                        _ => LossReason::Aborted,
                    };
                    self.on_lost(reason);
                }
                sctp_proto::Event::Stream(StreamEvent::Opened) => self.accept_streams(),
                sctp_proto::Event::Stream(StreamEvent::Readable { id }) => self.read_stream(id),
                _ => {}
            }
        }

        // Graceful shutdown ends without a loss event
        let closed = matches!(&self.association, Some((_, a)) if a.is_closed());
        if closed && self.state != State::Closed {
            let reason = match self.state {
                State::Idle | State::Listening | State::Connecting => LossReason::CantStart,
                _ => LossReason::ShutdownComplete,
            };
            self.on_lost(reason);
        }
    }

    fn on_connected(&mut self) {
        let passive = match self.state {
            State::Listening => true,
            State::Connecting => false,
            _ => return,
        };
        self.state = State::Established;
        self.assoc_change(AssocChangeState::CommUp);
        if passive {
            self.ready = true;
            self.events.push_back(Event::Incoming);
        } else {
            self.events.push_back(Event::Connected);
        }
    }

    fn on_lost(&mut self, reason: LossReason) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        match reason {
            LossReason::CantStart => self.assoc_change(AssocChangeState::CantStartAssociation),
            LossReason::ShutdownComplete => self.assoc_change(AssocChangeState::ShutdownComplete),
            LossReason::Aborted => self.assoc_change(AssocChangeState::CommLost),
            LossReason::Timeout => {
                self.notify(Notification::PeerAddrChange {
                    state: ADDR_UNREACHABLE,
                    error: 0,
                    assoc_id: self.assoc_id(),
                });
                self.assoc_change(AssocChangeState::CommLost);
            }
        }
        self.events.push_back(Event::Lost { reason });
    }

    fn accept_streams(&mut self) {
        let Some((_, association)) = self.association.as_mut() else {
            return;
        };
        while let Some(stream) = association.accept_stream() {
            self.opened.insert(stream.stream_identifier());
        }
    }

    fn read_stream(&mut self, id: u16) {
        let Some((_, association)) = self.association.as_mut() else {
            return;
        };
        let mut stream = match association.stream(id) {
            Ok(stream) => stream,
            Err(e) => {
                trace!(id, "unreadable stream: {}", e);
                return;
            }
        };
        loop {
            let mut chunks = match stream.read_sctp() {
                Ok(Some(chunks)) => chunks,
                Ok(None) => break,
                Err(e) => {
                    trace!(id, "read failed: {}", e);
                    break;
                }
            };
            let mut buf = vec![0; chunks.len()];
            match chunks.read(&mut buf) {
                Ok(n) => buf.truncate(n),
                Err(e) => {
                    trace!(id, "read failed: {}", e);
                    continue;
                }
            }
            if self.read_closed {
                trace!(id, len = buf.len(), "receiving disabled, discarding message");
                continue;
            }
            self.events.push_back(Event::Data(ReceivedData {
                data: buf.into(),
                sid: id,
                ssn: 0,
                tsn: 0,
                ppid: ppid_to_raw(chunks.ppi),
                context: 0,
                flags: MSG_EOR,
                unordered: false,
            }));
        }
    }

    /// Cache what the trait exposes through `&self`
    fn refresh(&mut self) {
        let Some((_, association)) = self.association.as_mut() else {
            self.timeout = None;
            return;
        };
        self.timeout = match self.state {
            State::Closed => None,
            _ => association.poll_timeout(),
        };
        let mut buffered = 0;
        for &sid in &self.opened {
            if let Ok(stream) = association.stream(sid) {
                buffered += stream.buffered_amount().unwrap_or(0);
            }
        }
        let was = std::mem::replace(&mut self.buffered, buffered);
        let live = matches!(self.state, State::Established | State::ShuttingDown);
        if was > 0 && buffered == 0 && live {
            self.notify(Notification::SenderDry {
                assoc_id: self.assoc_id(),
            });
        }
    }
}

impl Socket for SctpSocket {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn listen(&mut self) -> Result<(), SocketError> {
        if self.state != State::Idle {
            return Err(SocketError::InvalidState);
        }
        self.endpoint = Some(sctp_proto::Endpoint::new(
            Arc::new(EndpointConfig::default()),
            Some(Arc::new(ServerConfig::new())),
        ));
        self.state = State::Listening;
        Ok(())
    }

    fn connect(&mut self, now: Instant, remote_port: u16) -> Result<(), SocketError> {
        if remote_port == 0 {
            return Err(SocketError::InvalidPort);
        }
        if self.state != State::Idle {
            return Err(SocketError::InvalidState);
        }
        let mut endpoint = sctp_proto::Endpoint::new(Arc::new(EndpointConfig::default()), None);
        let (ch, association) = endpoint.connect(ClientConfig::new(), PEER).map_err(|e| {
            debug!("connect refused: {}", e);
            SocketError::InvalidState
        })?;
        self.endpoint = Some(endpoint);
        self.association = Some((ch, association));
        self.remote_port = Some(remote_port);
        self.state = State::Connecting;
        self.drive(now);
        Ok(())
    }

    fn accept(&mut self) -> bool {
        if !self.ready || self.accepted {
            return false;
        }
        self.accepted = true;
        true
    }

    fn send(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &SendOptions,
    ) -> Result<usize, SendError> {
        if self.state != State::Established {
            return Err(SendError::NotConnected);
        }
        if data.len() > self.config.max_message_size {
            debug!(len = data.len(), "message exceeds the maximum size");
            return Ok(0);
        }
        if self.buffered + data.len() > self.config.send_buffer_size {
            return Err(SendError::WouldBlock);
        }
        let Some((_, association)) = self.association.as_mut() else {
            return Err(SendError::NotConnected);
        };

        let sid = options.stream_id;
        let ppi = PayloadProtocolIdentifier::from(options.ppid);
        if self.opened.insert(sid) {
            if let Err(e) = association.open_stream(sid, ppi) {
                trace!(sid, "stream already open: {}", e);
            }
        }
        let mut stream = association.stream(sid).map_err(|e| {
            warn!(sid, "no stream to send on: {}", e);
            SendError::NotConnected
        })?;
        let (kind, value) = match options.pr_policy {
            PrPolicy::None => (ReliabilityType::Reliable, 0),
            PrPolicy::Ttl(ms) => (ReliabilityType::Timed, ms),
            PrPolicy::Rtx(count) => (ReliabilityType::Rexmit, count),
        };
        if let Err(e) = stream.set_reliability_params(options.unordered, kind, value) {
            trace!(sid, "reliability parameters not applied: {}", e);
        }
        let n = stream
            .write_sctp(&Bytes::copy_from_slice(data), ppi)
            .map_err(|e| {
                debug!(sid, "write refused: {}", e);
                SendError::NotConnected
            })?;
        self.drive(now);
        Ok(n)
    }

    fn shutdown(&mut self, now: Instant, mode: ShutdownMode) -> Result<(), SocketError> {
        if self.association.is_none() || self.state == State::Closed {
            return Err(SocketError::InvalidState);
        }
        if mode.disables_read() {
            self.read_closed = true;
        }
        if mode.disables_write() && self.state == State::Established {
            if let Some((_, association)) = self.association.as_mut() {
                if let Err(e) = association.shutdown() {
                    debug!("shutdown refused: {}", e);
                    return Err(SocketError::InvalidState);
                }
            }
            self.state = State::ShuttingDown;
        }
        self.drive(now);
        Ok(())
    }

    fn close(&mut self, now: Instant) {
        if self.state == State::Closed {
            return;
        }
        // Closed first, so the abort this causes is not reported back as a loss
        self.state = State::Closed;
        if let Some((_, association)) = self.association.as_mut() {
            if let Err(e) = association.close() {
                trace!("close: {}", e);
            }
        }
        self.drive(now);
    }

    fn handle_packet(&mut self, now: Instant, packet: &[u8]) {
        let Some(endpoint) = self.endpoint.as_mut() else {
            trace!(port = self.local_port, "neither listening nor connecting, packet dropped");
            return;
        };
        let data = Bytes::copy_from_slice(packet);
        match endpoint.handle(now, PEER, None, None, data) {
            Some((ch, DatagramEvent::NewAssociation(association))) => {
                if self.association.is_some() || self.state != State::Listening {
                    debug!("socket already carries an association, dropping new one");
                } else {
                    trace!("inbound association");
                    self.association = Some((ch, association));
                }
            }
            Some((ch, DatagramEvent::AssociationEvent(event))) => match self.association.as_mut() {
                Some((handle, association)) if *handle == ch => association.handle_event(event),
                _ => trace!("event for a foreign association"),
            },
            None => {}
        }
        self.drive(now);
    }

    fn poll_transmit(&mut self) -> Option<Bytes> {
        self.transmits.pop_front()
    }

    fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn poll_timeout(&self) -> Option<Instant> {
        self.timeout
    }

    fn handle_timeout(&mut self, now: Instant) {
        if let Some((_, association)) = self.association.as_mut() {
            association.handle_timeout(now);
        }
        self.drive(now);
    }

    fn buffered_amount(&self) -> usize {
        self.buffered
    }

    fn is_drained(&self) -> bool {
        self.state == State::Closed && self.transmits.is_empty()
    }
}

impl fmt::Debug for SctpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SctpSocket")
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .field("state", &self.state)
            .field("buffered", &self.buffered)
            .finish_non_exhaustive()
    }
}

fn queue_transmit(queue: &mut VecDeque<Bytes>, transmit: Transmit) {
    match transmit.payload {
        Payload::RawEncode(packets) => queue.extend(packets),
        Payload::PartialDecode(_) => trace!("ignoring undecoded transmit"),
    }
}

fn ppid_to_raw(ppi: PayloadProtocolIdentifier) -> u32 {
    match ppi {
        PayloadProtocolIdentifier::Dcep => 50,
        PayloadProtocolIdentifier::String => 51,
        PayloadProtocolIdentifier::Binary => 53,
        PayloadProtocolIdentifier::StringEmpty => 56,
        PayloadProtocolIdentifier::BinaryEmpty => 57,
        _ => 0,
    }
}
