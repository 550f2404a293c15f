use std::sync::Arc;

/// Parameters governing the stack as a whole
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) encapsulation_port: u16,
    pub(crate) association: Arc<AssociationConfig>,
}

impl EngineConfig {
    /// Create a configuration tunnelling SCTP through `encapsulation_port`
    pub fn new(encapsulation_port: u16) -> Self {
        Self {
            encapsulation_port,
            association: Arc::new(AssociationConfig::default()),
        }
    }

    /// UDP port SCTP packets are encapsulated in
    pub fn encapsulation_port(&mut self, value: u16) -> &mut Self {
        self.encapsulation_port = value;
        self
    }

    /// Parameters applied to every socket the engine creates
    pub fn association_config(&mut self, value: Arc<AssociationConfig>) -> &mut Self {
        self.association = value;
        self
    }

    /// The configured encapsulation port
    pub fn get_encapsulation_port(&self) -> u16 {
        self.encapsulation_port
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(9899)
    }
}

/// Limits applied to each socket before data reaches the protocol stack
///
/// Default values follow usrsctp defaults.
#[derive(Debug, Clone)]
pub struct AssociationConfig {
    pub(crate) send_buffer_size: usize,
    pub(crate) max_message_size: usize,
}

impl AssociationConfig {
    /// Maximum number of unacknowledged bytes a socket buffers before `send` would block
    pub fn send_buffer_size(&mut self, value: usize) -> &mut Self {
        self.send_buffer_size = value;
        self
    }

    /// Largest message `send` accepts; bigger messages are refused
    pub fn max_message_size(&mut self, value: usize) -> &mut Self {
        self.max_message_size = value;
        self
    }
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: 256 * 1024,
            max_message_size: 64 * 1024,
        }
    }
}
