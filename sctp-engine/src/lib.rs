//! Engine seam of the SCTP socket bridge
//!
//! sctp-engine describes the protocol engine the bridge drives: a process-wide [`Engine`] that
//! hands out [`Socket`]s exposing socket-like primitives (listen, connect, accept, send,
//! shutdown, close) plus the hooks a runtime needs to move packets and time through them. It
//! contains no networking code and never reads a clock; every call that depends on time takes an
//! `Instant` from the caller.
//!
//! [`Endpoint`] implements the seam over the sans-IO `sctp-proto` crate: each [`SctpSocket`]
//! owns an `sctp_proto::Endpoint` and at most one `sctp_proto::Association`, and translates
//! their events into the [`Event`]s and in-band [`Notification`]s the bridge reports. The SCTP
//! ports carried on the wire are chosen by `sctp-proto`; the local port a socket is created with
//! only identifies it to its owner.

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(dead_code))]

use std::{fmt, time::Instant};

use bytes::Bytes;

mod config;
pub use crate::config::{AssociationConfig, EngineConfig};

mod endpoint;
pub use crate::endpoint::Endpoint;

pub mod notification;
pub use crate::notification::Notification;

mod shared;
pub use crate::shared::{
    EngineError, Event, LossReason, PrPolicy, ReceivedData, SendError, SendOptions, ShutdownMode,
    SocketError,
};

mod socket;
pub use crate::socket::SctpSocket;

#[cfg(test)]
mod tests;

/// Message flag marking a received record as a protocol notification rather than payload
///
/// The value is the one usrsctp reports in `recvv` flags and must reach the caller unmodified.
pub const MSG_NOTIFICATION: u32 = 0x2000;

/// Message flag marking the end of a complete application message
pub const MSG_EOR: u32 = 0x80;

/// IP protocol number of SCTP, the only protocol sockets can be created for
pub const IPPROTO_SCTP: i32 = 132;

/// A userspace SCTP stack
///
/// One value represents the whole stack. It is brought up with [`Engine::start`], hands out
/// sockets, and is torn down with [`Engine::stop`] once every socket is gone.
pub trait Engine: Send + Sync + fmt::Debug + Sized + 'static {
    /// Per-socket protocol state
    type Socket: Socket;

    /// Bring the stack up, encapsulating SCTP in the configured UDP port
    fn start(config: &EngineConfig) -> Result<Self, EngineError>;

    /// Allocate a new socket bound to `local_port`
    fn socket(&self, local_port: u16) -> Result<Self::Socket, EngineError>;

    /// Release the stack's resources
    ///
    /// Sockets created before this call must not be used afterwards.
    fn stop(&self);
}

/// Protocol state of a single SCTP socket
///
/// A socket never performs I/O on its own. Inbound packets are fed through
/// [`handle_packet`](Socket::handle_packet), outbound packets are collected with
/// [`poll_transmit`](Socket::poll_transmit), and timers are driven through
/// [`poll_timeout`](Socket::poll_timeout) and [`handle_timeout`](Socket::handle_timeout).
pub trait Socket: Send + fmt::Debug + 'static {
    /// The SCTP port this socket is bound to
    fn local_port(&self) -> u16;

    /// Make the socket passive
    fn listen(&mut self) -> Result<(), SocketError>;

    /// Start an association with the peer bound to `remote_port`
    ///
    /// Completion is reported later through [`Event::Connected`] or [`Event::Lost`].
    fn connect(&mut self, now: Instant, remote_port: u16) -> Result<(), SocketError>;

    /// Take an association established on a listening socket
    ///
    /// Returns `false` if no association is ready yet.
    fn accept(&mut self) -> bool;

    /// Queue one message for transmission
    ///
    /// Returns the number of bytes taken, or `Ok(0)` if the message was refused outright.
    fn send(&mut self, now: Instant, data: &[u8], options: &SendOptions)
        -> Result<usize, SendError>;

    /// Disable receiving, sending, or both
    fn shutdown(&mut self, now: Instant, mode: ShutdownMode) -> Result<(), SocketError>;

    /// Tear the socket down without waiting for the peer
    fn close(&mut self, now: Instant);

    /// Process a packet received from the network
    fn handle_packet(&mut self, now: Instant, packet: &[u8]);

    /// Next packet that should be put on the wire
    fn poll_transmit(&mut self) -> Option<Bytes>;

    /// Next event for the application
    fn poll_event(&mut self) -> Option<Event>;

    /// When [`handle_timeout`](Socket::handle_timeout) should next be called
    fn poll_timeout(&self) -> Option<Instant>;

    /// Process expired timers
    fn handle_timeout(&mut self, now: Instant);

    /// Bytes accepted by [`send`](Socket::send) and not yet acknowledged
    fn buffered_amount(&self) -> usize;

    /// Whether the socket is closed and has nothing left to transmit
    fn is_drained(&self) -> bool;
}
