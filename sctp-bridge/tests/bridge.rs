//! Two sockets on one bridge, talking through a packet pump that plays the network

use std::{
    io::{self, Write},
    str,
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use sctp_bridge::{
    notification::AssocChangeState, Bridge, BridgeConfig, ChannelLink, Error, Event,
    EventReceiver, Notification, PrPolicy, SendOptions, ShutdownMode, SocketHandle, SocketState,
    IPPROTO_SCTP, MSG_EOR, MSG_NOTIFICATION, SCTP_TUNNELING_PORT,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SERVER_PORT: u16 = 5000;
const TIMEOUT: Duration = Duration::from_secs(10);

struct Pair {
    bridge: Arc<Bridge>,
    server: SocketHandle,
    client: SocketHandle,
    server_events: EventReceiver,
    client_events: EventReceiver,
}

impl Pair {
    fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    fn with_config(config: BridgeConfig) -> Self {
        let bridge = Arc::new(Bridge::new(config));
        bridge.init(SCTP_TUNNELING_PORT).unwrap();
        let (link, rx) = ChannelLink::new();
        bridge.set_default_link(Some(Arc::new(link)));
        let server = bridge.create_socket_on(IPPROTO_SCTP, SERVER_PORT).unwrap();
        let client = bridge.create_socket(IPPROTO_SCTP).unwrap();
        bridge.set_default_link(None);

        pump(Arc::downgrade(&bridge), rx, (server, client));
        Self {
            server_events: bridge.events(server).unwrap(),
            client_events: bridge.events(client).unwrap(),
            bridge,
            server,
            client,
        }
    }

    /// Listen on the server, connect the client, and accept
    fn connect(&self) {
        self.bridge.listen(self.server).unwrap();
        self.bridge.connect(self.client, SERVER_PORT).unwrap();
        wait_for_state(&self.client_events, SocketState::Established);
        self.accept();
        info!("connected");
    }

    fn accept(&self) {
        let deadline = Instant::now() + TIMEOUT;
        while !self.bridge.accept(self.server).unwrap() {
            assert!(Instant::now() < deadline, "server never accepted");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn close_all(self) {
        self.bridge.shutdown_all(TIMEOUT).unwrap();
    }
}

/// Forward every outbound packet to the other socket of the pair
fn pump(
    bridge: Weak<Bridge>,
    mut rx: UnboundedReceiver<(SocketHandle, Bytes)>,
    (server, client): (SocketHandle, SocketHandle),
) {
    thread::spawn(move || {
        while let Some((from, packet)) = rx.blocking_recv() {
            let Some(bridge) = bridge.upgrade() else {
                break;
            };
            let to = if from == server { client } else { server };
            if let Err(e) = bridge.inject_packet(to, &packet, 0, packet.len()) {
                debug!(%to, "injection failed: {}", e);
            }
        }
    });
}

/// Collect events until the socket transitions to `to`
fn wait_for_state(events: &EventReceiver, to: SocketState) -> Vec<Event> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .unwrap_or_else(|| panic!("no transition to {to}, saw {seen:?}"));
        let done = matches!(event, Event::StateChanged { to: x, .. } if x == to);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn transitions(events: &[Event]) -> Vec<(SocketState, SocketState)> {
    events
        .iter()
        .filter_map(|x| match *x {
            Event::StateChanged { from, to } => Some((from, to)),
            Event::Data(_) => None,
        })
        .collect()
}

fn notifications(events: &[Event]) -> Vec<Notification> {
    events
        .iter()
        .filter_map(|x| match x {
            Event::Data(data) => data.as_notification(),
            Event::StateChanged { .. } => None,
        })
        .collect()
}

fn payloads(events: &[Event]) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|x| match x {
            Event::Data(data) if !data.is_notification() => Some(data.data.clone()),
            _ => None,
        })
        .collect()
}

fn is_assoc_change(notification: &Notification, expected: AssocChangeState) -> bool {
    matches!(notification, Notification::AssocChange { state, .. } if *state == expected)
}

#[test]
fn listen_before_any_peer() {
    let _guard = subscribe();
    let pair = Pair::new();
    assert!(pair.server.as_raw() > 0);
    pair.bridge.listen(pair.server).unwrap();
    assert_eq!(pair.bridge.state(pair.server), Ok(SocketState::Listening));
    assert_eq!(pair.bridge.accept(pair.server), Ok(false));
    pair.close_all();
}

#[test]
fn handshake_reaches_established() {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.bridge.listen(pair.server).unwrap();
    pair.bridge.connect(pair.client, SERVER_PORT).unwrap();

    let client = wait_for_state(&pair.client_events, SocketState::Established);
    assert_eq!(
        transitions(&client),
        [
            (SocketState::New, SocketState::Connecting),
            (SocketState::Connecting, SocketState::Established),
        ]
    );
    // COMM_UP travels in-band, flagged as a notification
    let comm_up = client
        .iter()
        .find_map(|x| match x {
            Event::Data(data) => Some(data),
            _ => None,
        })
        .unwrap();
    assert_ne!(comm_up.flags & MSG_NOTIFICATION, 0);
    assert!(is_assoc_change(
        &comm_up.as_notification().unwrap(),
        AssocChangeState::CommUp
    ));

    pair.accept();
    let server = wait_for_state(&pair.server_events, SocketState::Established);
    assert_eq!(
        transitions(&server),
        [
            (SocketState::New, SocketState::Listening),
            (SocketState::Listening, SocketState::Established),
        ]
    );
    assert!(notifications(&server)
        .iter()
        .any(|x| is_assoc_change(x, AssocChangeState::CommUp)));
    pair.close_all();
}

#[test]
fn send_requires_established() {
    let _guard = subscribe();
    let pair = Pair::new();
    let options = SendOptions::default();
    assert_eq!(
        pair.bridge.send(pair.client, b"hello", &options),
        Err(Error::InvalidState)
    );

    pair.connect();
    assert_eq!(pair.bridge.send(pair.client, b"hello", &options), Ok(5));

    let mut received = Vec::new();
    while payloads(&received).is_empty() {
        received.push(pair.server_events.recv_timeout(TIMEOUT).unwrap());
    }
    let Some(Event::Data(data)) = received.last() else {
        panic!("expected data, got {received:?}");
    };
    assert_eq!(&data.data[..], b"hello");
    assert_eq!(data.flags, MSG_EOR);
    assert!(!data.is_notification());

    // The sender learns that everything was acknowledged
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let event = pair
            .client_events
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .expect("no SENDER_DRY notification");
        if let Event::Data(data) = event {
            if matches!(data.as_notification(), Some(Notification::SenderDry { .. })) {
                assert_eq!(data.flags, MSG_NOTIFICATION);
                break;
            }
        }
    }
    assert_eq!(pair.bridge.buffered_amount(pair.client), Ok(0));
    pair.close_all();
}

#[test]
fn messages_keep_order_and_metadata() {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.connect();

    let options = SendOptions {
        stream_id: 3,
        ppid: 51,
        unordered: false,
        pr_policy: PrPolicy::Rtx(2),
    };
    for i in 0..100u32 {
        let message = i.to_be_bytes();
        assert_eq!(pair.bridge.send(pair.client, &message, &options), Ok(4));
    }
    let unordered = SendOptions {
        stream_id: 4,
        ppid: 53,
        unordered: true,
        pr_policy: PrPolicy::Ttl(1000),
    };
    assert_eq!(pair.bridge.send(pair.client, b"last", &unordered), Ok(4));

    let mut messages = Vec::new();
    while messages.len() < 101 {
        if let Event::Data(data) = pair.server_events.recv_timeout(TIMEOUT).unwrap() {
            if !data.is_notification() {
                messages.push(data);
            }
        }
    }
    // Unordered delivery may overtake, so only stream 3 is checked for order
    let (ordered, other): (Vec<_>, Vec<_>) = messages.into_iter().partition(|x| x.sid == 3);
    for (i, data) in ordered.iter().enumerate() {
        assert_eq!(&data.data[..], &(i as u32).to_be_bytes());
        assert_eq!((data.ppid, data.flags), (51, MSG_EOR));
    }
    assert_eq!(ordered.len(), 100);
    assert_eq!(other.len(), 1);
    assert_eq!((&other[0].data[..], other[0].ppid), (&b"last"[..], 53));
    pair.close_all();
}

#[test]
fn finish_requires_closed_sockets() {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.connect();
    assert_eq!(pair.bridge.finish(), Err(Error::SocketsStillOpen));
    pair.bridge.close(pair.client).unwrap();
    assert_eq!(pair.bridge.finish(), Err(Error::SocketsStillOpen));
    pair.bridge.close(pair.server).unwrap();
    pair.bridge.finish().unwrap();
    assert!(!pair.bridge.is_initialized());
}

#[test]
fn out_of_bounds_injection() {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.connect();
    let before = pair.server_events.len();
    let buf = [0u8; 64];
    assert_eq!(
        pair.bridge.inject_packet(pair.server, &buf, 60, 8),
        Err(Error::InvalidArgument)
    );
    assert_eq!(pair.bridge.state(pair.server), Ok(SocketState::Established));
    assert_eq!(pair.server_events.len(), before);
    // Garbage within bounds is dropped by the engine
    pair.bridge.inject_packet(pair.server, &buf, 0, 64).unwrap();
    assert_eq!(pair.bridge.state(pair.server), Ok(SocketState::Established));
    pair.close_all();
}

#[test]
fn graceful_shutdown() {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.connect();
    let options = SendOptions::default();
    pair.bridge.send(pair.client, b"bye", &options).unwrap();
    pair.bridge.shutdown(pair.client, ShutdownMode::Write).unwrap();
    assert_eq!(
        pair.bridge.send(pair.client, b"more", &options),
        Err(Error::InvalidState)
    );

    // Everything sent before the shutdown is delivered before the peer closes
    let server = wait_for_state(&pair.server_events, SocketState::Closed);
    assert_eq!(payloads(&server), [&b"bye"[..]]);

    let client = wait_for_state(&pair.client_events, SocketState::Closed);
    assert_eq!(
        transitions(&client).last(),
        Some(&(SocketState::ShuttingDown, SocketState::Closed))
    );
    assert!(notifications(&client)
        .iter()
        .any(|x| is_assoc_change(x, AssocChangeState::ShutdownComplete)));
    pair.close_all();
}

#[test]
fn close_retires_only_its_own_handle() {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.connect();
    pair.bridge.close(pair.client).unwrap();
    assert_eq!(pair.bridge.state(pair.client), Err(Error::InvalidHandle));

    let client = wait_for_state(&pair.client_events, SocketState::Closed);
    assert_eq!(
        transitions(&client).last(),
        Some(&(SocketState::Established, SocketState::Closed))
    );
    assert!(pair.client_events.is_finished());
    // The peer's handle stays valid until its owner closes it
    assert!(pair.bridge.state(pair.server).is_ok());
    pair.close_all();
}

#[test]
fn linger_closes_gracefully() {
    let _guard = subscribe();
    let mut config = BridgeConfig::default();
    config.linger(TIMEOUT);
    let pair = Pair::with_config(config);
    pair.connect();
    pair.bridge.close(pair.client).unwrap();

    let client = wait_for_state(&pair.client_events, SocketState::Closed);
    assert!(notifications(&client)
        .iter()
        .any(|x| is_assoc_change(x, AssocChangeState::ShutdownComplete)));
    wait_for_state(&pair.server_events, SocketState::Closed);
    pair.close_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn async_consumer() -> anyhow::Result<()> {
    let _guard = subscribe();
    let pair = Pair::new();
    pair.bridge.listen(pair.server)?;
    pair.bridge.connect(pair.client, SERVER_PORT)?;

    let established = async {
        while let Some(event) = pair.client_events.recv().await {
            if event
                == (Event::StateChanged {
                    from: SocketState::Connecting,
                    to: SocketState::Established,
                })
            {
                return true;
            }
        }
        false
    };
    assert!(tokio::time::timeout(TIMEOUT, established).await?);

    pair.bridge.close(pair.client)?;
    pair.bridge.close(pair.server)?;
    // Drains to the end once closed
    let drained = async { while pair.client_events.recv().await.is_some() {} };
    tokio::time::timeout(TIMEOUT, drained).await?;
    pair.bridge.finish()?;
    Ok(())
}

fn subscribe() -> tracing::subscriber::DefaultGuard {
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
