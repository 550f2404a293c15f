use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::{config::EngineConfig, shared::EngineError, socket::SctpSocket, Engine};

/// The engine backed by the `sctp-proto` crate
///
/// Sockets it creates are independent [`SctpSocket`]s sharing one
/// [`AssociationConfig`](crate::AssociationConfig). Packets are not demultiplexed here: whoever
/// owns the sockets routes each packet to the socket bound to its destination port.
#[derive(Debug)]
pub struct Endpoint {
    config: EngineConfig,
    running: AtomicBool,
}

impl Endpoint {
    /// The configuration the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether [`Engine::stop`] has not been called yet
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Engine for Endpoint {
    type Socket = SctpSocket;

    fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.encapsulation_port == 0 {
            return Err(EngineError::Start("encapsulation port must not be 0".into()));
        }
        debug!(port = config.encapsulation_port, "starting sctp-proto engine");
        Ok(Self {
            config: config.clone(),
            running: AtomicBool::new(true),
        })
    }

    fn socket(&self, local_port: u16) -> Result<SctpSocket, EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        Ok(SctpSocket::new(self.config.association.clone(), local_port))
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("sctp-proto engine stopped");
        }
    }
}
