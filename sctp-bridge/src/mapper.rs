use std::net::SocketAddr;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::SocketHandle;

/// Remote transport addresses and the sockets they talk to
///
/// Lets the transport demultiplex by source address when it does not track handles itself.
#[derive(Debug, Default)]
pub(crate) struct Mapper {
    remotes: FxHashMap<SocketAddr, SocketHandle>,
}

impl Mapper {
    pub(crate) fn register(&mut self, remote: SocketAddr, handle: SocketHandle) {
        if let Some(previous) = self.remotes.insert(remote, handle) {
            if previous != handle {
                warn!(%remote, %previous, %handle, "remote remapped to another socket");
            }
        }
    }

    pub(crate) fn unregister(&mut self, remote: &SocketAddr) -> Option<SocketHandle> {
        let handle = self.remotes.remove(remote);
        if handle.is_none() {
            debug!(%remote, "remote was not registered");
        }
        handle
    }

    pub(crate) fn locate(&self, remote: &SocketAddr) -> Option<SocketHandle> {
        self.remotes.get(remote).copied()
    }

    /// Drop every mapping to `handle`
    pub(crate) fn forget(&mut self, handle: SocketHandle) {
        self.remotes.retain(|_, x| *x != handle);
    }
}
