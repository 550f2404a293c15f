use thiserror::Error;

use proto::EngineError;

/// Reasons a bridge operation failed
///
/// Failures are reported before anything is mutated, so an `Err` never leaves the registry or
/// the engine half-updated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The engine has not been initialized, or was finished
    #[error("SCTP engine is not initialized")]
    NotInitialized,
    /// `init` was called twice without an intervening `finish`
    #[error("SCTP engine is already initialized")]
    AlreadyInitialized,
    /// The handle was never issued or has been retired
    #[error("invalid socket handle")]
    InvalidHandle,
    /// The operation is not allowed in the socket's current state
    #[error("operation not valid in the current socket state")]
    InvalidState,
    /// The port is out of range or already in use
    #[error("invalid port")]
    InvalidPort,
    /// An argument is malformed, e.g. a buffer range out of bounds or an unknown protocol
    #[error("invalid argument")]
    InvalidArgument,
    /// The socket cannot take more right now; retry later
    #[error("operation would block")]
    WouldBlock,
    /// `finish` was called while handles are still open
    #[error("sockets are still open")]
    SocketsStillOpen,
    /// The engine failed to start
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Error {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}
