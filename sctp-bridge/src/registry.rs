use std::fmt;

use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;

use crate::{socket::SocketRef, Error};

/// Opaque identity of a socket owned by a [`Bridge`](crate::Bridge)
///
/// Identities are issued in increasing order starting at 1 and never reused, so a stale handle
/// can never reach a socket created after it was retired.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SocketHandle(pub(crate) u64);

impl SocketHandle {
    /// Representation handed across the [`boundary`](crate::boundary)
    pub fn as_raw(self) -> i64 {
        self.0 as i64
    }

    /// Reconstruct a handle from its raw representation
    ///
    /// Returns `None` for values that can never have been issued.
    pub fn from_raw(raw: i64) -> Option<Self> {
        u64::try_from(raw).ok().filter(|&x| x > 0).map(Self)
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Live sockets by handle
pub(crate) struct Registry<S: proto::Socket> {
    sockets: FxHashMap<SocketHandle, Entry<S>>,
    next_id: u64,
}

pub(crate) struct Entry<S: proto::Socket> {
    pub(crate) socket: SocketRef<S>,
    /// Task running the socket's driver; completes once the socket is drained
    pub(crate) driver: JoinHandle<()>,
}

impl<S: proto::Socket> Registry<S> {
    pub(crate) fn new() -> Self {
        Self {
            sockets: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Reserve the identity for the next socket
    pub(crate) fn next_handle(&mut self) -> SocketHandle {
        let handle = SocketHandle(self.next_id);
        self.next_id += 1;
        handle
    }

    pub(crate) fn insert(&mut self, handle: SocketHandle, entry: Entry<S>) {
        debug_assert!(handle.0 < self.next_id, "handle was not reserved");
        self.sockets.insert(handle, entry);
    }

    pub(crate) fn get(&self, handle: SocketHandle) -> Result<SocketRef<S>, Error> {
        self.sockets
            .get(&handle)
            .map(|x| x.socket.clone())
            .ok_or(Error::InvalidHandle)
    }

    /// Retire `handle`; its identity is never issued again
    pub(crate) fn remove(&mut self, handle: SocketHandle) -> Option<Entry<S>> {
        self.sockets.remove(&handle)
    }

    /// Whether `handle` was issued at some point, live or retired
    pub(crate) fn was_issued(&self, handle: SocketHandle) -> bool {
        handle.0 > 0 && handle.0 < self.next_id
    }

    pub(crate) fn len(&self) -> usize {
        self.sockets.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub(crate) fn handles(&self) -> Vec<SocketHandle> {
        let mut handles = self.sockets.keys().copied().collect::<Vec<_>>();
        handles.sort_unstable();
        handles
    }
}
