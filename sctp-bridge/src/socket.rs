use std::{
    fmt,
    future::Future,
    ops::Deref,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Instant,
};

use bytes::Bytes;
use proto::{SendError, SendOptions, ShutdownMode, Socket, SocketError};
use tokio::time::{sleep_until, Instant as TokioInstant, Sleep};
use tracing::{debug, debug_span, info_span, trace, warn};

use crate::{
    events::{Event, EventQueue},
    mutex::Mutex,
    Error, NetworkLink, SocketHandle, SocketState,
};

/// Shared ownership of one socket's state
pub(crate) struct SocketRef<S: Socket>(Arc<Mutex<SocketInner<S>>>);

impl<S: Socket> SocketRef<S> {
    pub(crate) fn new(
        handle: SocketHandle,
        socket: S,
        events: Arc<EventQueue>,
        link: Option<Arc<dyn NetworkLink>>,
    ) -> Self {
        Self(Arc::new(Mutex::new(SocketInner {
            handle,
            socket,
            state: SocketState::New,
            accepted: false,
            events,
            link,
            driver: None,
            timer: None,
            timer_deadline: None,
        })))
    }
}

impl<S: Socket> Clone for SocketRef<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S: Socket> Deref for SocketRef<S> {
    type Target = Mutex<SocketInner<S>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub(crate) struct SocketInner<S: Socket> {
    pub(crate) handle: SocketHandle,
    pub(crate) socket: S,
    pub(crate) state: SocketState,
    /// An association was taken from a listening socket
    accepted: bool,
    pub(crate) events: Arc<EventQueue>,
    pub(crate) link: Option<Arc<dyn NetworkLink>>,
    driver: Option<Waker>,
    timer: Option<Pin<Box<Sleep>>>,
    timer_deadline: Option<TokioInstant>,
}

impl<S: Socket> SocketInner<S> {
    pub(crate) fn listen(&mut self) -> Result<(), Error> {
        if self.state != SocketState::New {
            return Err(Error::InvalidState);
        }
        self.socket.listen().map_err(socket_error)?;
        self.transition(SocketState::Listening);
        Ok(())
    }

    pub(crate) fn connect(&mut self, remote_port: u16) -> Result<(), Error> {
        if self.state != SocketState::New {
            return Err(Error::InvalidState);
        }
        if remote_port == 0 {
            return Err(Error::InvalidPort);
        }
        self.socket
            .connect(Instant::now(), remote_port)
            .map_err(socket_error)?;
        self.transition(SocketState::Connecting);
        self.process_engine_events();
        self.wake();
        Ok(())
    }

    pub(crate) fn accept(&mut self) -> Result<bool, Error> {
        match self.state {
            SocketState::Listening => {
                if !self.socket.accept() {
                    return Ok(false);
                }
                self.accepted = true;
                self.transition(SocketState::Established);
                Ok(true)
            }
            SocketState::Established if self.accepted => Ok(true),
            _ => Err(Error::InvalidState),
        }
    }

    pub(crate) fn send(&mut self, data: &[u8], options: &SendOptions) -> Result<usize, Error> {
        if self.state != SocketState::Established {
            return Err(Error::InvalidState);
        }
        let accepted = match self.socket.send(Instant::now(), data, options) {
            Ok(n) => n,
            Err(SendError::WouldBlock) => return Err(Error::WouldBlock),
            Err(SendError::NotConnected) => return Err(Error::InvalidState),
        };
        if accepted > data.len() {
            warn!(accepted, len = data.len(), "engine over-reported a send, clamping");
        }
        let accepted = accepted.min(data.len());
        if accepted == 0 {
            debug!(len = data.len(), "message rejected by the engine");
        }
        self.process_engine_events();
        self.wake();
        Ok(accepted)
    }

    pub(crate) fn shutdown(&mut self, mode: ShutdownMode) -> Result<(), Error> {
        if !matches!(
            self.state,
            SocketState::Established | SocketState::Connecting
        ) {
            return Err(Error::InvalidState);
        }
        self.socket
            .shutdown(Instant::now(), mode)
            .map_err(socket_error)?;
        self.transition(SocketState::ShuttingDown);
        self.process_engine_events();
        self.wake();
        Ok(())
    }

    /// Close the association and move to `CLOSED`
    ///
    /// Returns whether this call performed the transition.
    pub(crate) fn close(&mut self) -> bool {
        // Whatever the engine reported so far is delivered ahead of the close
        self.process_engine_events();
        if self.state == SocketState::Closed {
            return false;
        }
        self.socket.close(Instant::now());
        self.process_engine_events();
        self.transition(SocketState::Closed);
        // Let the driver flush whatever the engine queued and exit
        self.wake();
        true
    }

    pub(crate) fn inject(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == SocketState::Closed {
            trace!(len = packet.len(), "socket closed, dropping packet");
            return Ok(());
        }
        if self.events.is_full() {
            debug!(len = packet.len(), "event queue full, refusing packet");
            return Err(Error::WouldBlock);
        }
        trace!(len = packet.len(), "injecting packet");
        self.socket.handle_packet(Instant::now(), packet);
        self.process_engine_events();
        self.wake();
        Ok(())
    }

    fn transition(&mut self, to: SocketState) {
        let from = self.state;
        if from == to || from == SocketState::Closed {
            return;
        }
        debug!(handle = %self.handle, %from, %to, "state changed");
        self.state = to;
        self.events.push(Event::StateChanged { from, to });
        if to == SocketState::Closed {
            self.events.close();
        }
    }

    /// Turn engine events into state transitions and queued events, in order
    fn process_engine_events(&mut self) {
        while let Some(event) = self.socket.poll_event() {
            match event {
                proto::Event::Data(data) if self.state == SocketState::Closed => {
                    trace!(len = data.data.len(), "socket closed, dropping data");
                }
                proto::Event::Data(data) => {
                    trace!(len = data.data.len(), flags = data.flags, "data received");
                    self.events.push(Event::Data(data));
                }
                proto::Event::Connected => {
                    if self.state == SocketState::Connecting {
                        self.transition(SocketState::Established);
                    }
                }
                proto::Event::Incoming => trace!("association waiting to be accepted"),
                proto::Event::ShutdownReceived => {
                    if self.state == SocketState::Established {
                        self.transition(SocketState::ShuttingDown);
                    }
                }
                proto::Event::Lost { reason } => {
                    debug!(handle = %self.handle, ?reason, "association lost");
                    self.transition(SocketState::Closed);
                }
            }
        }
    }

    fn drive_transmit(&mut self, out: &mut Vec<Bytes>) {
        while let Some(packet) = self.socket.poll_transmit() {
            out.push(packet);
        }
    }

    fn drive_timer(&mut self, cx: &mut Context) -> bool {
        // Check whether we need to (re)set the timer. If so, we must poll again to ensure the
        // timer is registered with the runtime (and check whether it's already expired).
        match self.socket.poll_timeout().map(TokioInstant::from_std) {
            Some(deadline) => {
                if let Some(delay) = &mut self.timer {
                    if self.timer_deadline != Some(deadline) {
                        delay.as_mut().reset(deadline);
                    }
                } else {
                    self.timer = Some(Box::pin(sleep_until(deadline)));
                }
                self.timer_deadline = Some(deadline);
            }
            None => {
                self.timer_deadline = None;
                return false;
            }
        }

        let delay = match &mut self.timer {
            Some(delay) => delay.as_mut(),
            None => return false,
        };
        if delay.poll(cx).is_pending() {
            return false;
        }

        // A timer expired, which may produce transmits and set new timers
        self.socket.handle_timeout(Instant::now());
        self.timer_deadline = None;
        true
    }

    /// Wake up the driver task to process timers and transmits
    pub(crate) fn wake(&mut self) {
        if let Some(x) = self.driver.take() {
            x.wake();
        }
    }
}

impl<S: Socket> fmt::Debug for SocketInner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketInner")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("socket", &self.socket)
            .field("has_link", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

fn socket_error(e: SocketError) -> Error {
    match e {
        SocketError::InvalidState => Error::InvalidState,
        SocketError::InvalidPort => Error::InvalidPort,
    }
}

/// A future that drives the engine side of one socket
///
/// Runs the socket's timers and hands every outbound packet to its link. It completes once the
/// socket is closed and has nothing left to transmit.
#[must_use = "socket drivers must be spawned for their sockets to function"]
pub(crate) struct SocketDriver<S: Socket>(pub(crate) SocketRef<S>);

impl<S: Socket> Future for SocketDriver<S> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let mut transmits = Vec::new();
        let (handle, link, drained) = {
            let inner = &mut *self.0.lock("poll");
            let span = info_span!("drive", handle = inner.handle.0);
            let _guard = span.enter();

            loop {
                inner.drive_transmit(&mut transmits);
                // If a timer expires, there might be more to transmit. When we transmit
                // something, we might need to reset a timer. Hence, we must loop until neither
                // happens.
                let keep_going = inner.drive_timer(cx);
                inner.process_engine_events();
                if !keep_going || inner.socket.is_drained() {
                    break;
                }
            }

            let drained = inner.socket.is_drained();
            if !drained {
                inner.driver = Some(cx.waker().clone());
            }
            (inner.handle, inner.link.clone(), drained)
        };

        // The link may call back into the bridge, so no lock is held here
        if !transmits.is_empty() {
            let span = debug_span!("transmit", %handle, count = transmits.len());
            let _guard = span.enter();
            match link {
                Some(link) => {
                    for packet in transmits {
                        if let Err(e) = link.send(handle, packet) {
                            warn!("link failed to send packet: {}", e);
                        }
                    }
                }
                None => debug!("no link set, dropping outbound packets"),
            }
        }

        if drained {
            debug!(%handle, "socket drained, driver finished");
            return Poll::Ready(());
        }
        Poll::Pending
    }
}
