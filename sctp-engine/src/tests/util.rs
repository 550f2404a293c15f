use std::{
    io::{self, Write},
    str,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::trace;
use tracing_subscriber::EnvFilter;

use super::*;

pub(super) const SERVER_PORT: u16 = 5000;
pub(super) const CLIENT_PORT: u16 = 5001;

/// Two sockets wired back to back with a virtual clock
pub(super) struct Pair {
    pub(super) client: SctpSocket,
    pub(super) server: SctpSocket,
    pub(super) time: Instant,
    /// Drop everything the client sends
    pub(super) client_blackhole: bool,
}

impl Pair {
    pub(super) fn new() -> Self {
        Self::with_config(Arc::new(AssociationConfig::default()))
    }

    pub(super) fn with_config(config: Arc<AssociationConfig>) -> Self {
        let mut server = SctpSocket::new(config.clone(), SERVER_PORT);
        server.listen().unwrap();
        Self {
            client: SctpSocket::new(config, CLIENT_PORT),
            server,
            time: Instant::now(),
            client_blackhole: false,
        }
    }

    /// Move queued packets in both directions; returns whether anything was sent
    fn exchange(&mut self) -> bool {
        let mut sent = false;
        while let Some(packet) = self.client.poll_transmit() {
            sent = true;
            if self.client_blackhole {
                trace!("client packet lost");
                continue;
            }
            self.server.handle_packet(self.time, &packet);
        }
        while let Some(packet) = self.server.poll_transmit() {
            sent = true;
            self.client.handle_packet(self.time, &packet);
        }
        sent
    }

    /// Exchange packets until both sides are quiet, without advancing time
    pub(super) fn flush(&mut self) {
        while self.exchange() {}
    }

    /// Exchange packets and fire timers for `period` of virtual time
    ///
    /// Delayed acknowledgements and shutdown retransmissions need this to settle.
    pub(super) fn run(&mut self, period: Duration) {
        let end = self.time + period;
        loop {
            self.flush();
            let next = match (self.client.poll_timeout(), self.server.poll_timeout()) {
                (Some(a), Some(b)) => a.min(b),
                (Some(x), None) | (None, Some(x)) => x,
                (None, None) => break,
            };
            if next > end {
                break;
            }
            self.time = self.time.max(next);
            trace!(time = ?self.time, "advancing time");
            self.client.handle_timeout(self.time);
            self.server.handle_timeout(self.time);
        }
        self.time = self.time.max(end);
    }

    /// Complete the handshake and accept on the server
    pub(super) fn connect(&mut self) {
        self.client.connect(self.time, SERVER_PORT).unwrap();
        self.flush();
        assert!(self.server.accept());
        assert_eq!(
            events(&mut self.client).last(),
            Some(&Event::Connected),
            "client did not connect"
        );
        assert_eq!(events(&mut self.server).last(), Some(&Event::Incoming));
    }
}

pub(super) fn events(socket: &mut SctpSocket) -> Vec<Event> {
    let mut out = Vec::new();
    while let Some(event) = socket.poll_event() {
        out.push(event);
    }
    out
}

/// Application payloads among `events`
pub(super) fn payloads(events: &[Event]) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Data(data) if !data.is_notification() => Some(data.data.clone()),
            _ => None,
        })
        .collect()
}

pub(super) fn notifications(events: &[Event]) -> Vec<Notification> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Data(data) => data.as_notification(),
            _ => None,
        })
        .collect()
}

pub(super) fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(|| TestWriter)
        .finish();
    tracing::subscriber::set_default(sub)
}

struct TestWriter;

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        print!(
            "{}",
            str::from_utf8(buf).expect("tried to log invalid UTF-8")
        );
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}
