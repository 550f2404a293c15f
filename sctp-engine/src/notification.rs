//! Protocol notifications delivered in-band with received data
//!
//! Notifications travel through the same channel as application messages, flagged with
//! [`MSG_NOTIFICATION`](crate::MSG_NOTIFICATION). Their byte layout mirrors the usrsctp
//! `sctp_notification` union in network byte order: a common header of type, flags and total
//! length, followed by the type-specific body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// `SCTP_ASSOC_CHANGE`
pub const ASSOC_CHANGE: u16 = 0x0001;
/// `SCTP_PEER_ADDR_CHANGE`
pub const PEER_ADDR_CHANGE: u16 = 0x0002;
/// `SCTP_SENDER_DRY_EVENT`
pub const SENDER_DRY_EVENT: u16 = 0x000a;

/// `SCTP_ADDR_UNREACHABLE`
pub const ADDR_UNREACHABLE: u32 = 2;

const HEADER_LEN: usize = 8;

/// State reported by an association change notification
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssocChangeState {
    /// `SCTP_COMM_UP`
    CommUp,
    /// `SCTP_COMM_LOST`
    CommLost,
    /// `SCTP_RESTART`
    Restart,
    /// `SCTP_SHUTDOWN_COMP`
    ShutdownComplete,
    /// `SCTP_CANT_STR_ASSOC`
    CantStartAssociation,
    /// A state this crate does not know about
    Other(u16),
}

impl AssocChangeState {
    fn to_raw(self) -> u16 {
        match self {
            Self::CommUp => 1,
            Self::CommLost => 2,
            Self::Restart => 3,
            Self::ShutdownComplete => 4,
            Self::CantStartAssociation => 5,
            Self::Other(x) => x,
        }
    }

    fn from_raw(x: u16) -> Self {
        match x {
            1 => Self::CommUp,
            2 => Self::CommLost,
            3 => Self::Restart,
            4 => Self::ShutdownComplete,
            5 => Self::CantStartAssociation,
            x => Self::Other(x),
        }
    }
}

/// A decoded protocol notification
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Notification {
    AssocChange {
        state: AssocChangeState,
        error: u16,
        outbound_streams: u16,
        inbound_streams: u16,
        assoc_id: u32,
    },
    PeerAddrChange {
        state: u32,
        error: u32,
        assoc_id: u32,
    },
    /// Every outstanding message has been acknowledged
    SenderDry { assoc_id: u32 },
    /// A notification type this crate does not decode
    Unknown { kind: u16 },
}

/// Reasons a notification record could not be decoded
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The record is shorter than its header or its declared body
    #[error("truncated notification")]
    Truncated,
}

impl Notification {
    /// The `SCTP_*` type code of this notification
    pub fn kind(&self) -> u16 {
        match *self {
            Self::AssocChange { .. } => ASSOC_CHANGE,
            Self::PeerAddrChange { .. } => PEER_ADDR_CHANGE,
            Self::SenderDry { .. } => SENDER_DRY_EVENT,
            Self::Unknown { kind } => kind,
        }
    }

    /// Serialize into the usrsctp layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u16(self.kind());
        buf.put_u16(0);
        buf.put_u32(0);
        match self {
            Self::AssocChange {
                state,
                error,
                outbound_streams,
                inbound_streams,
                assoc_id,
            } => {
                buf.put_u16(state.to_raw());
                buf.put_u16(*error);
                buf.put_u16(*outbound_streams);
                buf.put_u16(*inbound_streams);
                buf.put_u32(*assoc_id);
            }
            Self::PeerAddrChange {
                state,
                error,
                assoc_id,
            } => {
                buf.put_u32(*state);
                buf.put_u32(*error);
                buf.put_u32(*assoc_id);
            }
            Self::SenderDry { assoc_id } => buf.put_u32(*assoc_id),
            Self::Unknown { .. } => {}
        }
        let len = buf.len() as u32;
        buf[4..HEADER_LEN].copy_from_slice(&len.to_be_bytes());
        buf.freeze()
    }

    /// Parse a record flagged with [`MSG_NOTIFICATION`](crate::MSG_NOTIFICATION)
    pub fn decode(record: &[u8]) -> Result<Self, NotificationError> {
        use NotificationError::Truncated;
        if record.len() < HEADER_LEN {
            return Err(Truncated);
        }
        let mut header = &record[..HEADER_LEN];
        let kind = header.get_u16();
        let _flags = header.get_u16();
        let len = header.get_u32() as usize;
        if len < HEADER_LEN || len > record.len() {
            return Err(Truncated);
        }
        let mut body = &record[HEADER_LEN..len];

        let notification = match kind {
            ASSOC_CHANGE => {
                if body.len() < 12 {
                    return Err(Truncated);
                }
                Self::AssocChange {
                    state: AssocChangeState::from_raw(body.get_u16()),
                    error: body.get_u16(),
                    outbound_streams: body.get_u16(),
                    inbound_streams: body.get_u16(),
                    assoc_id: body.get_u32(),
                }
            }
            PEER_ADDR_CHANGE => {
                if body.len() < 12 {
                    return Err(Truncated);
                }
                Self::PeerAddrChange {
                    state: body.get_u32(),
                    error: body.get_u32(),
                    assoc_id: body.get_u32(),
                }
            }
            SENDER_DRY_EVENT => {
                if body.len() < 4 {
                    return Err(Truncated);
                }
                Self::SenderDry {
                    assoc_id: body.get_u32(),
                }
            }
            kind => Self::Unknown { kind },
        };
        Ok(notification)
    }
}
