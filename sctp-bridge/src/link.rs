use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::SocketHandle;

/// Outbound path for packets produced by the engine
///
/// A link is typically the UDP socket of a NAT-traversed tunnel. It is called from the socket's
/// driver task, never while a bridge lock is held, so it may call back into the bridge.
pub trait NetworkLink: Send + Sync + 'static {
    /// Put one SCTP packet on the wire for the socket behind `handle`
    fn send(&self, handle: SocketHandle, packet: Bytes) -> io::Result<()>;
}

impl<F> NetworkLink for F
where
    F: Fn(SocketHandle, Bytes) -> io::Result<()> + Send + Sync + 'static,
{
    fn send(&self, handle: SocketHandle, packet: Bytes) -> io::Result<()> {
        self(handle, packet)
    }
}

/// A [`NetworkLink`] forwarding packets into a channel
///
/// For callers that pump the transport themselves: every packet arrives on the receiver
/// returned by [`ChannelLink::new`], tagged with the handle that produced it.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<(SocketHandle, Bytes)>,
}

impl ChannelLink {
    /// Create a link and the receiver its packets are delivered to
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(SocketHandle, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NetworkLink for ChannelLink {
    fn send(&self, handle: SocketHandle, packet: Bytes) -> io::Result<()> {
        self.tx.send((handle, packet)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "packet receiver was dropped")
        })
    }
}
