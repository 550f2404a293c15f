use std::{
    collections::VecDeque,
    pin::pin,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use proto::ReceivedData;
use tokio::sync::Notify;

use crate::SocketState;

/// Something that happened on a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message or protocol notification arrived
    ///
    /// Notifications carry [`MSG_NOTIFICATION`](crate::MSG_NOTIFICATION) in
    /// [`ReceivedData::flags`], exactly as the engine reported them.
    Data(ReceivedData),
    /// The socket moved to a new lifecycle state
    StateChanged {
        /// Previous state
        from: SocketState,
        /// Current state
        to: SocketState,
    },
}

/// The ordered event channel of one socket
///
/// Producers never block: the capacity is only consulted by the packet injection path, which
/// refuses new packets while the queue is full. A std `Mutex` is used here because blocking
/// consumers wait on a `Condvar`.
#[derive(Debug)]
pub(crate) struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    notify: Notify,
    capacity: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<Event>,
    /// The socket reached `CLOSED`; nothing will be pushed any more
    closed: bool,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("event queue poisoned")
    }

    pub(crate) fn push(&self, event: Event) {
        self.lock().events.push_back(event);
        self.wake_all();
    }

    /// Wake every consumer; blocked waits return once the queue is drained
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.wake_all();
    }

    fn wake_all(&self) {
        self.available.notify_all();
        self.notify.notify_waiters();
    }

    pub(crate) fn is_full(&self) -> bool {
        self.lock().events.len() >= self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().events.len()
    }

    fn try_recv(&self) -> Option<Event> {
        self.lock().events.pop_front()
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.closed {
                return None;
            }
            state = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    self.available
                        .wait_timeout(state, remaining)
                        .expect("event queue poisoned")
                        .0
                }
                // Timeout too large to represent; wait until woken
                None => self.available.wait(state).expect("event queue poisoned"),
            };
        }
    }

    async fn recv(&self) -> Option<Event> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking so a push in between is not missed
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Block until the socket reached `CLOSED` or `deadline` passed; returns whether it closed
    pub(crate) fn wait_closed(&self, deadline: Instant) -> bool {
        let mut state = self.lock();
        while !state.closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .available
                .wait_timeout(state, remaining)
                .expect("event queue poisoned")
                .0;
        }
        true
    }

    fn is_finished(&self) -> bool {
        let state = self.lock();
        state.closed && state.events.is_empty()
    }
}

/// Consumer side of a socket's event channel
///
/// Obtained from [`Bridge::events`](crate::Bridge::events). The receiver stays usable after the
/// handle is closed, so events queued before the close can still be drained. Waits end early
/// when the socket reaches [`SocketState::Closed`] and no events are left.
#[derive(Debug, Clone)]
pub struct EventReceiver(pub(crate) Arc<EventQueue>);

impl EventReceiver {
    /// Take the next event without waiting
    pub fn try_recv(&self) -> Option<Event> {
        self.0.try_recv()
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Returns `None` on timeout, or once the socket is closed and every event was taken.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.0.recv_timeout(timeout)
    }

    /// Wait for the next event
    ///
    /// Resolves to `None` once the socket is closed and every event was taken. Dropping the
    /// future cancels the wait without losing events.
    pub async fn recv(&self) -> Option<Event> {
        self.0.recv().await
    }

    /// Number of events waiting to be taken
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no events are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the socket is closed and every event was taken
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}
