use bytes::Bytes;
use thiserror::Error;

use crate::{MSG_NOTIFICATION, Notification};

/// Events produced by a [`Socket`](crate::Socket) for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message or a protocol notification was received
    Data(ReceivedData),
    /// An association initiated by [`connect`](crate::Socket::connect) is up
    Connected,
    /// A listening socket completed an association that is waiting for
    /// [`accept`](crate::Socket::accept)
    Incoming,
    /// The peer started a graceful shutdown
    ShutdownReceived,
    /// The association is gone
    Lost {
        /// Why the association ended
        reason: LossReason,
    },
}

/// Why an association ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LossReason {
    /// The association could not be established
    CantStart,
    /// The peer aborted the association
    Aborted,
    /// The peer stopped answering
    Timeout,
    /// The graceful shutdown sequence completed
    ShutdownComplete,
}

/// A message or notification handed up by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedData {
    /// Payload, or the encoded notification when `flags` contains [`MSG_NOTIFICATION`]
    pub data: Bytes,
    /// Stream identifier
    pub sid: u16,
    /// Stream sequence number
    pub ssn: u16,
    /// Transmission sequence number
    pub tsn: u32,
    /// Payload protocol identifier
    pub ppid: u32,
    /// Opaque context value
    pub context: u32,
    /// Receive flags, passed through verbatim
    pub flags: u32,
    /// Whether the message was sent unordered
    pub unordered: bool,
}

impl ReceivedData {
    pub(crate) fn notification(notification: &Notification) -> Self {
        Self {
            data: notification.encode(),
            sid: 0,
            ssn: 0,
            tsn: 0,
            ppid: 0,
            context: 0,
            flags: MSG_NOTIFICATION,
            unordered: false,
        }
    }

    /// Whether this record is a protocol notification rather than application payload
    pub fn is_notification(&self) -> bool {
        self.flags & MSG_NOTIFICATION != 0
    }

    /// Decode the notification carried by this record, if it is one
    pub fn as_notification(&self) -> Option<Notification> {
        if !self.is_notification() {
            return None;
        }
        Notification::decode(&self.data).ok()
    }
}

/// Partial-reliability policy of an outbound message
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PrPolicy {
    /// Fully reliable
    #[default]
    None,
    /// Abandon the message once it is older than this many milliseconds
    Ttl(u32),
    /// Abandon the message after this many retransmissions
    Rtx(u32),
}

impl PrPolicy {
    /// `SCTP_PR_SCTP_NONE`
    pub const NONE: i32 = 0;
    /// `SCTP_PR_SCTP_TTL`
    pub const TTL: i32 = 1;
    /// `SCTP_PR_SCTP_RTX`
    pub const RTX: i32 = 3;

    /// Build a policy from its usrsctp code and limit
    ///
    /// Returns `None` for unknown codes or a negative limit.
    pub fn from_raw(policy: i32, limit: i32) -> Option<Self> {
        let limit = u32::try_from(limit).ok()?;
        match policy {
            Self::NONE => Some(Self::None),
            Self::TTL => Some(Self::Ttl(limit)),
            Self::RTX => Some(Self::Rtx(limit)),
            _ => None,
        }
    }
}

/// Delivery parameters of an outbound message
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Stream identifier
    pub stream_id: u16,
    /// Payload protocol identifier
    pub ppid: u32,
    /// Deliver without regard to stream order
    pub unordered: bool,
    /// Partial-reliability policy
    pub pr_policy: PrPolicy,
}

/// Direction selector for [`Socket::shutdown`](crate::Socket::shutdown)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShutdownMode {
    /// `SHUT_RD`: stop delivering received data; no protocol action
    Read = 1,
    /// `SHUT_WR`: stop sending and start the SCTP shutdown sequence
    Write = 2,
    /// `SHUT_RDWR`: both of the above
    Both = 3,
}

impl ShutdownMode {
    /// Map a raw `SHUT_*` value
    pub fn from_raw(how: i32) -> Option<Self> {
        match how {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    pub(crate) fn disables_read(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    pub(crate) fn disables_write(self) -> bool {
        matches!(self, Self::Write | Self::Both)
    }
}

/// Errors raised while starting the engine or allocating sockets
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine was stopped
    #[error("engine is not running")]
    NotRunning,
    /// The engine could not be brought up
    #[error("engine failed to start: {0}")]
    Start(String),
}

/// Errors raised by socket operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// The operation is not valid in the association's current state
    #[error("operation not valid in the current association state")]
    InvalidState,
    /// The remote port is not usable
    #[error("invalid remote port")]
    InvalidPort,
}

/// Errors raised by [`Socket::send`](crate::Socket::send)
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The send buffer is full; try again later
    #[error("send buffer full")]
    WouldBlock,
    /// There is no established association to send on
    #[error("association not established")]
    NotConnected,
}
