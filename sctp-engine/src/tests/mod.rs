use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::*;
use crate::notification::AssocChangeState;

mod util;
use util::*;

/// Long enough for delayed acknowledgements, short of any retransmission timeout
const SETTLE: Duration = Duration::from_millis(500);

#[test]
fn handshake() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.client.connect(pair.time, SERVER_PORT).unwrap();
    pair.flush();

    let client = events(&mut pair.client);
    assert_eq!(client.last(), Some(&Event::Connected));
    assert!(matches!(
        notifications(&client)[..],
        [Notification::AssocChange {
            state: AssocChangeState::CommUp,
            ..
        }]
    ));

    let server = events(&mut pair.server);
    assert_eq!(server.last(), Some(&Event::Incoming));
    assert!(pair.server.accept());
    assert!(!pair.server.accept(), "an association is accepted once");
    assert!(!pair.client.accept(), "only listening sockets accept");
    assert_eq!(pair.client.remote_port(), Some(SERVER_PORT));
}

#[test]
fn listen_and_connect_are_exclusive() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    assert_eq!(
        pair.server.connect(pair.time, CLIENT_PORT),
        Err(SocketError::InvalidState)
    );
    assert_eq!(
        pair.client.connect(pair.time, 0),
        Err(SocketError::InvalidPort)
    );
    pair.connect();
    assert_eq!(pair.client.listen(), Err(SocketError::InvalidState));
    assert_eq!(
        pair.client.connect(pair.time, SERVER_PORT),
        Err(SocketError::InvalidState)
    );
}

#[test]
fn ordered_messages() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.connect();

    let options = SendOptions {
        stream_id: 3,
        ppid: 51,
        ..SendOptions::default()
    };
    for msg in [&b"one"[..], b"two", b"three"] {
        assert_eq!(pair.client.send(pair.time, msg, &options), Ok(msg.len()));
    }
    assert_eq!(pair.client.buffered_amount(), 11);
    pair.run(SETTLE);

    let server = events(&mut pair.server);
    assert_eq!(payloads(&server), [&b"one"[..], b"two", b"three"]);
    for event in &server {
        let Event::Data(data) = event else {
            panic!("unexpected event {event:?}");
        };
        assert_eq!(data.sid, 3);
        assert_eq!(data.ppid, 51);
        assert_eq!(data.flags, MSG_EOR);
    }

    // Everything acknowledged
    assert_eq!(pair.client.buffered_amount(), 0);
    assert!(matches!(
        notifications(&events(&mut pair.client))[..],
        [Notification::SenderDry { .. }]
    ));
}

#[test]
fn streams_in_both_directions() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.connect();

    let binary = SendOptions {
        stream_id: 1,
        ppid: 53,
        ..SendOptions::default()
    };
    pair.client.send(pair.time, b"ping", &binary).unwrap();
    pair.run(SETTLE);
    let server = events(&mut pair.server);
    assert_eq!(payloads(&server), [&b"ping"[..]]);

    // The server answers on the stream the client opened
    pair.server.send(pair.time, b"pong", &binary).unwrap();
    pair.run(SETTLE);
    let client = events(&mut pair.client);
    assert_eq!(payloads(&client), [&b"pong"[..]]);
    let reply = client
        .iter()
        .find(|x| matches!(x, Event::Data(d) if !d.is_notification()));
    let Some(Event::Data(data)) = reply else {
        panic!("no reply in {client:?}");
    };
    assert_eq!((data.sid, data.ppid), (1, 53));
}

#[test]
fn refused_messages() {
    let _guard = subscribe();
    let mut config = AssociationConfig::default();
    config.send_buffer_size(8).max_message_size(6);
    let mut pair = Pair::with_config(Arc::new(config));

    let options = SendOptions::default();
    assert_eq!(
        pair.client.send(pair.time, b"early", &options),
        Err(SendError::NotConnected)
    );
    pair.connect();

    assert_eq!(pair.client.send(pair.time, b"too long", &options), Ok(0));
    assert_eq!(pair.client.send(pair.time, b"12345", &options), Ok(5));
    assert_eq!(
        pair.client.send(pair.time, b"12345", &options),
        Err(SendError::WouldBlock)
    );
    pair.run(SETTLE);
    assert_eq!(pair.client.send(pair.time, b"12345", &options), Ok(5));
}

#[test]
fn partially_reliable_messages_are_accepted() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.connect();

    for pr_policy in [PrPolicy::Ttl(1000), PrPolicy::Rtx(2)] {
        let options = SendOptions {
            stream_id: 2,
            unordered: true,
            pr_policy,
            ..SendOptions::default()
        };
        assert_eq!(pair.client.send(pair.time, b"maybe", &options), Ok(5));
    }
    pair.run(SETTLE);
    assert_eq!(
        payloads(&events(&mut pair.server)),
        [&b"maybe"[..], b"maybe"]
    );
}

#[test]
fn graceful_shutdown() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.connect();

    pair.client
        .send(pair.time, b"last words", &SendOptions::default())
        .unwrap();
    pair.client.shutdown(pair.time, ShutdownMode::Write).unwrap();
    assert_eq!(
        pair.client
            .send(pair.time, b"too late", &SendOptions::default()),
        Err(SendError::NotConnected)
    );
    pair.run(Duration::from_secs(5));

    let server = events(&mut pair.server);
    assert_eq!(payloads(&server), [&b"last words"[..]]);
    assert!(
        matches!(server.last(), Some(Event::Lost { .. })),
        "{server:?}"
    );

    let client = events(&mut pair.client);
    assert_eq!(
        client.last(),
        Some(&Event::Lost {
            reason: LossReason::ShutdownComplete
        })
    );
    assert!(notifications(&client).iter().any(|x| matches!(
        x,
        Notification::AssocChange {
            state: AssocChangeState::ShutdownComplete,
            ..
        }
    )));
    assert!(pair.client.is_drained());
    assert_eq!(pair.client.poll_timeout(), None);
}

#[test]
fn shutdown_requires_association() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    assert_eq!(
        pair.client.shutdown(pair.time, ShutdownMode::Both),
        Err(SocketError::InvalidState)
    );
    assert_eq!(
        pair.server.shutdown(pair.time, ShutdownMode::Both),
        Err(SocketError::InvalidState)
    );
}

#[test]
fn read_shutdown_discards_data() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.connect();

    pair.server.shutdown(pair.time, ShutdownMode::Read).unwrap();
    pair.client
        .send(pair.time, b"ignored", &SendOptions::default())
        .unwrap();
    pair.run(SETTLE);
    assert!(payloads(&events(&mut pair.server)).is_empty());
    // Still acknowledged
    assert_eq!(pair.client.buffered_amount(), 0);
    // Writing is unaffected
    assert_eq!(
        pair.server
            .send(pair.time, b"reply", &SendOptions::default()),
        Ok(5)
    );
}

#[test]
fn close_is_silent_locally() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.connect();

    pair.client.close(pair.time);
    pair.client.close(pair.time);
    assert_eq!(pair.client.poll_timeout(), None);
    pair.flush();
    assert!(pair.client.is_drained());
    assert!(events(&mut pair.client).is_empty());
    assert_eq!(
        pair.client
            .send(pair.time, b"gone", &SendOptions::default()),
        Err(SendError::NotConnected)
    );
}

#[test]
fn packets_before_listen_are_dropped() {
    let _guard = subscribe();
    let config = Arc::new(AssociationConfig::default());
    let mut idle = SctpSocket::new(config.clone(), SERVER_PORT);
    let mut client = SctpSocket::new(config, CLIENT_PORT);
    let now = Instant::now();
    client.connect(now, SERVER_PORT).unwrap();
    let init = client.poll_transmit().expect("INIT queued on connect");
    idle.handle_packet(now, &init);
    assert!(idle.poll_transmit().is_none());
    assert!(idle.poll_event().is_none());
}

#[test]
fn garbage_is_dropped() {
    let _guard = subscribe();
    let mut pair = Pair::new();
    pair.server.handle_packet(pair.time, &[0; 3]);
    pair.server.handle_packet(pair.time, &[0xff; 64]);
    assert!(pair.server.poll_event().is_none());
    pair.connect();
}

#[test]
fn engine_lifecycle() {
    let _guard = subscribe();
    assert!(Endpoint::start(&EngineConfig::new(0)).is_err());
    let engine = Endpoint::start(&EngineConfig::default()).unwrap();
    assert_eq!(engine.config().get_encapsulation_port(), 9899);
    let socket = engine.socket(4000).unwrap();
    assert_eq!(socket.local_port(), 4000);
    engine.stop();
    assert!(!engine.is_running());
    assert_eq!(engine.socket(4001).unwrap_err(), EngineError::NotRunning);
}
