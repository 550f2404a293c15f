use std::fmt;

/// Lifecycle state of a socket as seen through the bridge
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SocketState {
    /// Created, neither listening nor connecting
    New,
    /// Waiting for a peer to connect
    Listening,
    /// Handshake in progress
    Connecting,
    /// Association up; data may be sent
    Established,
    /// Shutdown requested by either side
    ShuttingDown,
    /// Terminal
    Closed,
}

impl SocketState {
    /// Whether no further transitions are possible
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "NEW",
            Self::Listening => "LISTENING",
            Self::Connecting => "CONNECTING",
            Self::Established => "ESTABLISHED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Closed => "CLOSED",
        })
    }
}
