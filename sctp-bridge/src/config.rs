use std::time::Duration;

use proto::EngineConfig;

/// Parameters governing a [`Bridge`](crate::Bridge)
///
/// Default values should be suitable for most uses.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub(crate) event_queue_capacity: usize,
    pub(crate) engine_threads: usize,
    pub(crate) linger: Duration,
    pub(crate) engine: EngineConfig,
}

impl BridgeConfig {
    /// Maximum number of undelivered events per handle
    ///
    /// Once a handle's queue is full, injected packets are refused with
    /// [`Error::WouldBlock`](crate::Error::WouldBlock) until the caller drains it. Events raised by
    /// timers and local calls are queued regardless.
    pub fn event_queue_capacity(&mut self, value: usize) -> &mut Self {
        self.event_queue_capacity = value.max(1);
        self
    }

    /// Number of worker threads running socket drivers
    pub fn engine_threads(&mut self, value: usize) -> &mut Self {
        self.engine_threads = value.max(1);
        self
    }

    /// How long `close` waits for a graceful shutdown before closing it outright
    ///
    /// Zero, the default, closes the association immediately.
    pub fn linger(&mut self, value: Duration) -> &mut Self {
        self.linger = value;
        self
    }

    /// Engine parameters; the encapsulation port is replaced by the one passed to `init`
    pub fn engine(&mut self, value: EngineConfig) -> &mut Self {
        self.engine = value;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            engine_threads: 1,
            linger: Duration::ZERO,
            engine: EngineConfig::default(),
        }
    }
}
