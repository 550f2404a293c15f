//! Flat entry points over a process-wide [`Bridge`]
//!
//! These functions mirror the narrow interface a foreign caller binds to: plain integers and
//! booleans in and out, failures reported as sentinels (`false`, `0`, `-1`, and
//! [`WOULD_BLOCK`] for a full send buffer) and logged at `debug`. Handles are positive `i64`s;
//! `0` is never a valid handle.
//!
//! The process-wide bridge is created on first use with [`BridgeConfig::default`] and runs the
//! `sctp-proto` engine. Rust callers that want several independent bridges, or typed errors, use
//! [`Bridge`] directly.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use proto::{PrPolicy, SendOptions, ShutdownMode};
use tracing::debug;

use crate::{ports::Ports, Bridge, BridgeConfig, Error, Event, NetworkLink, SocketHandle};

pub use proto::{IPPROTO_SCTP, MSG_NOTIFICATION};

/// Returned by [`send`] while the socket's send buffer is full
///
/// Unlike `-1`, the call may succeed if retried once the peer acknowledged outstanding data.
pub const WOULD_BLOCK: i32 = -2;

/// The process-wide bridge
pub fn global() -> &'static Bridge {
    static BRIDGE: OnceLock<Bridge> = OnceLock::new();
    BRIDGE.get_or_init(|| Bridge::new(BridgeConfig::default()))
}

fn report<T>(op: &'static str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(x) => Some(x),
        Err(e) => {
            debug!(op, "{}", e);
            None
        }
    }
}

fn handle(raw: i64) -> Result<SocketHandle, Error> {
    SocketHandle::from_raw(raw).ok_or(Error::InvalidHandle)
}

fn port(raw: i32) -> Result<u16, Error> {
    if !Ports::is_valid(raw.into()) {
        return Err(Error::InvalidPort);
    }
    u16::try_from(raw).map_err(|_| Error::InvalidPort)
}

/// Bring the engine up on `local_port`
pub fn init(local_port: i32) -> bool {
    report("init", port(local_port).and_then(|p| global().init(p))).is_some()
}

/// Tear the engine down; fails while sockets are open
pub fn finish() -> bool {
    report("finish", global().finish()).is_some()
}

/// Close every socket, wait up to `timeout_ms` for them to drain, then finish
pub fn shutdown_all(timeout_ms: u64) -> bool {
    report(
        "shutdown all",
        global().shutdown_all(Duration::from_millis(timeout_ms)),
    )
    .is_some()
}

/// Create a socket; returns its handle, or `0` on failure
pub fn create_socket(protocol: i32) -> i64 {
    report("create socket", global().create_socket(protocol))
        .map_or(0, SocketHandle::as_raw)
}

/// Create a socket on a fixed local port; returns its handle, or `0` on failure
pub fn create_socket_on(protocol: i32, local_port: i32) -> i64 {
    let result = port(local_port).and_then(|p| global().create_socket_on(protocol, p));
    report("create socket", result).map_or(0, SocketHandle::as_raw)
}

/// Make a socket passive
pub fn listen(raw: i64) {
    report("listen", handle(raw).and_then(|h| global().listen(h)));
}

/// Whether an incoming association was accepted
pub fn accept(raw: i64) -> bool {
    report("accept", handle(raw).and_then(|h| global().accept(h))).unwrap_or(false)
}

/// Start connecting to `remote_port`; completion is reported through the event channel
pub fn connect(raw: i64, remote_port: i32) -> bool {
    let result = handle(raw).and_then(|h| global().connect(h, port(remote_port)?));
    report("connect", result).is_some()
}

/// Send `payload[offset..offset + length]`
///
/// `pr_policy` is one of the `SCTP_PR_SCTP_*` codes ([`PrPolicy::NONE`], [`PrPolicy::TTL`],
/// [`PrPolicy::RTX`]) and `pr_limit` its lifetime in milliseconds or retransmission count.
/// Returns the number of bytes accepted, `0` if the message was rejected, [`WOULD_BLOCK`] if
/// the send buffer is full, or `-1` on any other error.
#[allow(clippy::too_many_arguments)]
pub fn send(
    raw: i64,
    payload: &[u8],
    offset: i32,
    length: i32,
    ordered: bool,
    sid: i32,
    ppid: i32,
    pr_policy: i32,
    pr_limit: i32,
) -> i32 {
    let result = (|| {
        let range = buffer_range(payload.len(), offset, length)?;
        let options = SendOptions {
            stream_id: u16::try_from(sid).map_err(|_| Error::InvalidArgument)?,
            ppid: ppid as u32,
            unordered: !ordered,
            pr_policy: PrPolicy::from_raw(pr_policy, pr_limit).ok_or(Error::InvalidArgument)?,
        };
        global().send(handle(raw)?, &payload[range], &options)
    })();
    send_result(result)
}

fn send_result(result: Result<usize, Error>) -> i32 {
    match result {
        // Bounded by `length`, which is an i32
        Ok(n) => n as i32,
        Err(Error::WouldBlock) => {
            debug!(op = "send", "{}", Error::WouldBlock);
            WOULD_BLOCK
        }
        Err(e) => {
            debug!(op = "send", "{}", e);
            -1
        }
    }
}

/// Disable receiving (`1`), sending (`2`) or both (`3`)
pub fn shutdown(raw: i64, how: i32) {
    let result = handle(raw).and_then(|h| {
        let mode = ShutdownMode::from_raw(how).ok_or(Error::InvalidArgument)?;
        global().shutdown(h, mode)
    });
    report("shutdown", result);
}

/// Close a socket and retire its handle
pub fn close(raw: i64) {
    report("close", handle(raw).and_then(|h| global().close(h)));
}

/// Feed `payload[offset..offset + length]` to a socket as a received packet
pub fn inject_packet(raw: i64, payload: &[u8], offset: i32, length: i32) {
    let result = buffer_range(payload.len(), offset, length)
        .and_then(|range| global().inject_packet(handle(raw)?, payload, range.start, range.len()));
    report("inject packet", result);
}

/// Set where a socket's outbound packets go
pub fn set_link(raw: i64, link: Arc<dyn NetworkLink>) -> bool {
    report("set link", handle(raw).and_then(|h| global().set_link(h, link))).is_some()
}

/// Wait up to `timeout_ms` for the next event of a socket
///
/// Returns `None` on timeout, for unknown handles, and once the socket is closed and drained.
pub fn next_event(raw: i64, timeout_ms: u64) -> Option<Event> {
    let events = report("next event", handle(raw).and_then(|h| global().events(h)))?;
    events.recv_timeout(Duration::from_millis(timeout_ms))
}

fn buffer_range(len: usize, offset: i32, length: i32) -> Result<std::ops::Range<usize>, Error> {
    let offset = usize::try_from(offset).map_err(|_| Error::InvalidArgument)?;
    let length = usize::try_from(length).map_err(|_| Error::InvalidArgument)?;
    let end = offset.checked_add(length).ok_or(Error::InvalidArgument)?;
    if end > len {
        return Err(Error::InvalidArgument);
    }
    Ok(offset..end)
}
