use std::{
    fmt,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use proto::{Endpoint, Engine, SendOptions, ShutdownMode, Socket, IPPROTO_SCTP};
use tokio::{runtime::Runtime, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    events::{EventQueue, EventReceiver},
    mapper::Mapper,
    mutex::{Mutex, RwLock},
    ports::Ports,
    registry::{Entry, Registry},
    socket::{SocketDriver, SocketRef},
    BridgeConfig, Error, NetworkLink, SocketHandle, SocketState,
};

/// Owner of the protocol engine and every socket created through it
///
/// All methods take `&self` and may be called concurrently from any thread. Operations on a
/// socket lock only that socket after a shared lookup in the socket table; creating and retiring
/// handles, `init` and `finish` take a bridge-wide lock for a short time. Where both are held,
/// the bridge-wide lock is taken first.
///
/// Blocking methods ([`close`](Self::close) with a linger, [`shutdown_all`](Self::shutdown_all))
/// must not be called from within an async context.
pub struct Bridge<E: Engine = Endpoint> {
    config: BridgeConfig,
    pub(crate) global: Mutex<Global<E>>,
    sockets: RwLock<Sockets<E::Socket>>,
}

pub(crate) struct Global<E: Engine> {
    running: Option<Running<E>>,
    default_link: Option<Arc<dyn NetworkLink>>,
}

struct Sockets<S: Socket> {
    /// Mirrors `Global::running`, so lookups need not take the bridge-wide lock
    initialized: bool,
    /// Outlives `running` so handle identities stay unique across re-initialization
    registry: Registry<S>,
}

/// Everything that exists between `init` and `finish`
struct Running<E: Engine> {
    engine: E,
    runtime: Runtime,
    ports: Ports,
    mapper: Mapper,
}

impl Bridge {
    /// Create a bridge running the `sctp-proto` engine
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_engine(config)
    }
}

impl<E: Engine> Bridge<E> {
    /// Create a bridge running the engine `E`
    ///
    /// The engine is not started until [`init`](Self::init).
    pub fn with_engine(config: BridgeConfig) -> Self {
        Self {
            config,
            global: Mutex::new(Global {
                running: None,
                default_link: None,
            }),
            sockets: RwLock::new(Sockets {
                initialized: false,
                registry: Registry::new(),
            }),
        }
    }

    /// Bring the engine up, tunnelling SCTP through `local_port`
    pub fn init(&self, local_port: u16) -> Result<(), Error> {
        let mut global = self.global.lock("init");
        if global.running.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if local_port == 0 {
            return Err(Error::InvalidPort);
        }

        let mut engine_config = self.config.engine.clone();
        engine_config.encapsulation_port(local_port);
        let engine = E::start(&engine_config)?;
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.engine_threads)
            .thread_name("sctp-engine")
            .enable_time()
            .build()
        {
            Ok(x) => x,
            Err(e) => {
                engine.stop();
                return Err(proto::EngineError::Start(e.to_string()).into());
            }
        };

        global.running = Some(Running {
            engine,
            runtime,
            ports: Ports::default(),
            mapper: Mapper::default(),
        });
        self.sockets.write("init").initialized = true;
        info!(port = local_port, "SCTP engine initialized");
        Ok(())
    }

    /// Tear the engine down
    ///
    /// Fails with [`Error::SocketsStillOpen`] rather than waiting while any handle is live; see
    /// [`shutdown_all`](Self::shutdown_all) for closing everything first. Once finished, the
    /// bridge may be initialized again.
    pub fn finish(&self) -> Result<(), Error> {
        let running = {
            let mut global = self.global.lock("finish");
            if global.running.is_none() {
                return Err(Error::NotInitialized);
            }
            let mut sockets = self.sockets.write("finish");
            if !sockets.registry.is_empty() {
                debug!(open = sockets.registry.len(), "refusing to finish");
                return Err(Error::SocketsStillOpen);
            }
            sockets.initialized = false;
            global.running.take()
        };
        if let Some(running) = running {
            running.stop();
        }
        info!("SCTP engine finished");
        Ok(())
    }

    /// Close every socket, give their drivers up to `timeout` to flush, then finish
    ///
    /// `timeout` bounds the whole call: lingering sockets share it rather than each waiting for
    /// the full [`linger`](BridgeConfig::linger).
    pub fn shutdown_all(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let handles = {
            let sockets = self.sockets.read("shutdown all");
            if !sockets.initialized {
                return Err(Error::NotInitialized);
            }
            sockets.registry.handles()
        };
        debug!(count = handles.len(), "closing all sockets");

        let mut drivers = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.retire(handle, Some(deadline)) {
                Ok(Some(driver)) => drivers.push(driver),
                // Closed concurrently
                Ok(None) | Err(Error::InvalidHandle) => {}
                Err(e) => return Err(e),
            }
        }

        if tokio::runtime::Handle::try_current().is_ok() {
            warn!("called from an async context, not waiting for drivers");
        } else if let Some(runtime) = self.runtime_handle() {
            let flushed = runtime.block_on(tokio::time::timeout_at(deadline.into(), async {
                for driver in drivers {
                    let _ = driver.await;
                }
            }));
            if flushed.is_err() {
                debug!("timed out waiting for sockets to drain");
            }
        }

        self.finish()
    }

    /// Whether [`init`](Self::init) succeeded and [`finish`](Self::finish) was not called since
    pub fn is_initialized(&self) -> bool {
        self.global.lock("is initialized").running.is_some()
    }

    /// Create a socket on a random port from the dynamic range
    ///
    /// `protocol` must be [`IPPROTO_SCTP`].
    pub fn create_socket(&self, protocol: i32) -> Result<SocketHandle, Error> {
        self.create(protocol, None)
    }

    /// Create a socket bound to a specific local SCTP port
    pub fn create_socket_on(&self, protocol: i32, port: u16) -> Result<SocketHandle, Error> {
        self.create(protocol, Some(port))
    }

    fn create(&self, protocol: i32, port: Option<u16>) -> Result<SocketHandle, Error> {
        let mut guard = self.global.lock("create socket");
        let global = &mut *guard;
        let running = global.running.as_mut().ok_or(Error::NotInitialized)?;
        if protocol != IPPROTO_SCTP {
            return Err(Error::InvalidArgument);
        }

        let port = match port {
            Some(port) => {
                running.ports.reserve(port)?;
                port
            }
            None => running.ports.reserve_dynamic()?,
        };
        let socket = match running.engine.socket(port) {
            Ok(x) => x,
            Err(e) => {
                running.ports.release(port);
                return Err(e.into());
            }
        };

        let mut sockets = self.sockets.write("create socket");
        let handle = sockets.registry.next_handle();
        let events = Arc::new(EventQueue::new(self.config.event_queue_capacity));
        let socket = SocketRef::new(handle, socket, events, global.default_link.clone());
        let driver = running.runtime.spawn(SocketDriver(socket.clone()));
        sockets.registry.insert(handle, Entry { socket, driver });
        info!(%handle, port, "socket created");
        Ok(handle)
    }

    /// Make the socket passive
    pub fn listen(&self, handle: SocketHandle) -> Result<(), Error> {
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("listen");
        inner.listen()
    }

    /// Take an incoming association, if one is ready
    ///
    /// Never blocks. Once an association was taken, further calls keep returning `true`.
    pub fn accept(&self, handle: SocketHandle) -> Result<bool, Error> {
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("accept");
        inner.accept()
    }

    /// Start connecting to the peer bound to `remote_port`
    ///
    /// Returns once the handshake was started; the outcome arrives as a
    /// [`StateChanged`](crate::Event::StateChanged) event to `ESTABLISHED` or `CLOSED`.
    pub fn connect(&self, handle: SocketHandle, remote_port: u16) -> Result<(), Error> {
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("connect");
        inner.connect(remote_port)
    }

    /// Queue one message
    ///
    /// Returns the number of bytes accepted, which never exceeds `data.len()`. Zero means the
    /// engine rejected the message outright (empty, too large, or on an unknown stream).
    pub fn send(
        &self,
        handle: SocketHandle,
        data: &[u8],
        options: &SendOptions,
    ) -> Result<usize, Error> {
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("send");
        inner.send(data, options)
    }

    /// Disable receiving, sending, or both
    pub fn shutdown(&self, handle: SocketHandle, mode: ShutdownMode) -> Result<(), Error> {
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("shutdown");
        inner.shutdown(mode)
    }

    /// Close the socket and retire its handle
    ///
    /// Idempotent: closing a handle that was already closed succeeds without effect. With a
    /// non-zero [`linger`](BridgeConfig::linger), an established association is first shut down
    /// gracefully for at most that long.
    pub fn close(&self, handle: SocketHandle) -> Result<(), Error> {
        self.retire(handle, None).map(|_| ())
    }

    /// Close `handle`, returning its driver task if this call retired it
    ///
    /// A graceful shutdown never waits past `deadline`.
    fn retire(
        &self,
        handle: SocketHandle,
        deadline: Option<Instant>,
    ) -> Result<Option<JoinHandle<()>>, Error> {
        let socket = {
            let sockets = self.sockets.read("close");
            if !sockets.initialized {
                return Err(Error::NotInitialized);
            }
            match sockets.registry.get(handle) {
                Ok(x) => x,
                Err(_) if sockets.registry.was_issued(handle) => return Ok(None),
                Err(e) => return Err(e),
            }
        };

        self.linger(&socket, deadline);
        let port = {
            let mut inner = socket.lock("close");
            inner.close();
            inner.socket.local_port()
        };

        let mut global = self.global.lock("retire");
        let entry = match self.sockets.write("retire").registry.remove(handle) {
            Some(x) => x,
            // Lost a race with another close
            None => return Ok(None),
        };
        if let Some(running) = global.running.as_mut() {
            running.ports.release(port);
            running.mapper.forget(handle);
        }
        info!(%handle, "socket closed");
        Ok(Some(entry.driver))
    }

    fn linger(&self, socket: &SocketRef<E::Socket>, deadline: Option<Instant>) {
        if self.config.linger.is_zero() {
            return;
        }
        let until = Instant::now() + self.config.linger;
        let until = deadline.map_or(until, |deadline| deadline.min(until));
        let events = {
            let mut inner = socket.lock("linger");
            if inner.state != SocketState::Established {
                return;
            }
            if let Err(e) = inner.shutdown(ShutdownMode::Both) {
                debug!("graceful shutdown failed: {}", e);
                return;
            }
            inner.events.clone()
        };
        if !events.wait_closed(until) {
            debug!("linger expired, closing association");
        }
    }

    /// Feed `buf[offset..offset + len]` to the socket as a packet received from the network
    ///
    /// Packets injected for the same handle reach the engine in call order. Fails with
    /// [`Error::WouldBlock`] without touching the engine while the handle's event queue is full.
    pub fn inject_packet(
        &self,
        handle: SocketHandle,
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> Result<(), Error> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or(Error::InvalidArgument)?;
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("inject");
        inner.inject(&buf[offset..end])
    }

    /// Inject a packet into the socket registered for `remote`
    pub fn inject_from(&self, remote: SocketAddr, packet: &[u8]) -> Result<SocketHandle, Error> {
        let handle = self.locate(remote)?.ok_or(Error::InvalidHandle)?;
        self.inject_packet(handle, packet, 0, packet.len())?;
        Ok(handle)
    }

    /// Route packets from `remote` to `handle`
    pub fn register_remote(&self, remote: SocketAddr, handle: SocketHandle) -> Result<(), Error> {
        let mut global = self.global.lock("register remote");
        let running = global.running.as_mut().ok_or(Error::NotInitialized)?;
        self.sockets.read("register remote").registry.get(handle)?;
        running.mapper.register(remote, handle);
        Ok(())
    }

    /// Stop routing packets from `remote`, returning the handle it was mapped to
    pub fn unregister_remote(&self, remote: SocketAddr) -> Result<Option<SocketHandle>, Error> {
        let mut global = self.global.lock("unregister remote");
        let running = global.running.as_mut().ok_or(Error::NotInitialized)?;
        Ok(running.mapper.unregister(&remote))
    }

    /// The socket packets from `remote` are routed to
    pub fn locate(&self, remote: SocketAddr) -> Result<Option<SocketHandle>, Error> {
        let global = self.global.lock("locate");
        let running = global.running.as_ref().ok_or(Error::NotInitialized)?;
        Ok(running.mapper.locate(&remote))
    }

    /// Set where the socket's outbound packets go
    pub fn set_link(&self, handle: SocketHandle, link: Arc<dyn NetworkLink>) -> Result<(), Error> {
        let socket = self.lookup(handle)?;
        let mut inner = socket.lock("set link");
        inner.link = Some(link);
        inner.wake();
        Ok(())
    }

    /// Link given to sockets created from now on
    pub fn set_default_link(&self, link: Option<Arc<dyn NetworkLink>>) {
        self.global.lock("set default link").default_link = link;
    }

    /// The consumer side of the socket's event channel
    pub fn events(&self, handle: SocketHandle) -> Result<EventReceiver, Error> {
        let socket = self.lookup(handle)?;
        let inner = socket.lock("events");
        Ok(EventReceiver(inner.events.clone()))
    }

    /// Current lifecycle state of the socket
    pub fn state(&self, handle: SocketHandle) -> Result<SocketState, Error> {
        let socket = self.lookup(handle)?;
        let inner = socket.lock("state");
        Ok(inner.state)
    }

    /// Local SCTP port the socket is bound to
    pub fn local_port(&self, handle: SocketHandle) -> Result<u16, Error> {
        let socket = self.lookup(handle)?;
        let inner = socket.lock("local port");
        Ok(inner.socket.local_port())
    }

    /// Bytes sent but not yet acknowledged by the peer
    pub fn buffered_amount(&self, handle: SocketHandle) -> Result<usize, Error> {
        let socket = self.lookup(handle)?;
        let inner = socket.lock("buffered amount");
        Ok(inner.socket.buffered_amount())
    }

    /// Number of live handles
    pub fn open_sockets(&self) -> usize {
        self.sockets.read("open sockets").registry.len()
    }

    pub(crate) fn lookup(&self, handle: SocketHandle) -> Result<SocketRef<E::Socket>, Error> {
        let sockets = self.sockets.read("lookup");
        if !sockets.initialized {
            return Err(Error::NotInitialized);
        }
        sockets.registry.get(handle)
    }

    fn runtime_handle(&self) -> Option<tokio::runtime::Handle> {
        let global = self.global.lock("runtime handle");
        global.running.as_ref().map(|x| x.runtime.handle().clone())
    }
}

impl<E: Engine> Running<E> {
    fn stop(self) {
        self.engine.stop();
        // Drivers of sockets that were closed but not yet drained are dropped here
        self.runtime.shutdown_background();
    }
}

impl<E: Engine> Drop for Bridge<E> {
    fn drop(&mut self) {
        let running = self.global.lock("drop").running.take();
        self.sockets.write("drop").initialized = false;
        if let Some(running) = running {
            debug!("bridge dropped while initialized");
            running.stop();
        }
    }
}

impl<E: Engine> fmt::Debug for Bridge<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("open_sockets", &self.open_sockets())
            .finish()
    }
}
