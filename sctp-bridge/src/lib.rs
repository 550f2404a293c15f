//! Handle-based bridge between synchronous callers and a userspace SCTP stack
//!
//! The bridge owns a single protocol engine and exposes its sockets through opaque numeric
//! [`SocketHandle`]s. Callers on any thread create sockets, drive their lifecycle (listen,
//! connect, accept, shutdown, close), feed in raw packets that arrived through an external
//! transport, and send messages. Everything the engine produces asynchronously (received data,
//! protocol notifications, state changes) is queued per handle and drained through an
//! [`EventReceiver`].
//!
//! Each socket is driven by a task on the bridge's own tokio runtime. The task runs the engine's
//! timers and hands outbound packets to the socket's [`NetworkLink`]. Caller-facing operations
//! never run engine callbacks on the caller's stack and never block indefinitely.
//!
//! The [`boundary`] module wraps a process-wide [`Bridge`] in flat functions returning the
//! integer and boolean sentinels a foreign caller expects.
//!
//! ```
//! use sctp_bridge::{Bridge, BridgeConfig, SocketState, IPPROTO_SCTP};
//!
//! let bridge = Bridge::new(BridgeConfig::default());
//! bridge.init(9899).unwrap();
//! let handle = bridge.create_socket(IPPROTO_SCTP).unwrap();
//! bridge.listen(handle).unwrap();
//! assert_eq!(bridge.state(handle).unwrap(), SocketState::Listening);
//! assert!(!bridge.accept(handle).unwrap());
//! bridge.close(handle).unwrap();
//! bridge.finish().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod bridge;
pub mod boundary;
mod config;
mod error;
mod events;
mod link;
mod mapper;
mod mutex;
mod ports;
mod registry;
mod socket;
mod state;


pub use proto::{
    notification, AssociationConfig, Endpoint, Engine, EngineConfig, EngineError, Notification,
    PrPolicy, ReceivedData, SendOptions, ShutdownMode, Socket, IPPROTO_SCTP, MSG_EOR,
    MSG_NOTIFICATION,
};

pub use crate::bridge::Bridge;
pub use crate::config::BridgeConfig;
pub use crate::error::Error;
pub use crate::events::{Event, EventReceiver};
pub use crate::link::{ChannelLink, NetworkLink};
pub use crate::ports::{MAX_PORT, MIN_DYNAMIC_PORT, SCTP_TUNNELING_PORT};
pub use crate::registry::SocketHandle;
pub use crate::state::SocketState;
