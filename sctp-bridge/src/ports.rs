use rand::Rng;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::Error;

/// Default UDP port SCTP is tunnelled through
pub const SCTP_TUNNELING_PORT: u16 = 9899;
/// First port of the dynamic range handed out to sockets created without a port
pub const MIN_DYNAMIC_PORT: u16 = 49152;
/// Highest valid port
pub const MAX_PORT: u16 = u16::MAX;

/// Local SCTP ports in use
#[derive(Debug, Default)]
pub(crate) struct Ports {
    used: FxHashSet<u16>,
}

impl Ports {
    /// Whether a raw value is a usable port number
    pub(crate) fn is_valid(port: i64) -> bool {
        (0..=i64::from(MAX_PORT)).contains(&port)
    }

    /// Claim a specific port
    pub(crate) fn reserve(&mut self, port: u16) -> Result<(), Error> {
        if port == 0 || !self.used.insert(port) {
            return Err(Error::InvalidPort);
        }
        debug!(port, "port reserved");
        Ok(())
    }

    /// Claim a random unused port from the dynamic range
    pub(crate) fn reserve_dynamic(&mut self) -> Result<u16, Error> {
        let range = MIN_DYNAMIC_PORT..=MAX_PORT;
        if range.clone().all(|x| self.used.contains(&x)) {
            return Err(Error::InvalidPort);
        }
        let mut rng = rand::thread_rng();
        loop {
            let port = rng.gen_range(range.clone());
            if self.used.insert(port) {
                debug!(port, "dynamic port reserved");
                return Ok(port);
            }
        }
    }

    pub(crate) fn release(&mut self, port: u16) {
        if self.used.remove(&port) {
            debug!(port, "port released");
        }
    }

    pub(crate) fn is_used(&self, port: u16) -> bool {
        self.used.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_range() {
        assert!(Ports::is_valid(0));
        assert!(Ports::is_valid(65535));
        assert!(!Ports::is_valid(65536));
        assert!(!Ports::is_valid(-1));
    }

    #[test]
    fn fixed_ports_are_exclusive() {
        let mut ports = Ports::default();
        ports.reserve(5000).unwrap();
        assert_eq!(ports.reserve(5000), Err(Error::InvalidPort));
        assert_eq!(ports.reserve(0), Err(Error::InvalidPort));
        ports.release(5000);
        assert!(!ports.is_used(5000));
        ports.reserve(5000).unwrap();
    }

    #[test]
    fn dynamic_ports_avoid_used_ones() {
        let mut ports = Ports::default();
        for port in MIN_DYNAMIC_PORT..MAX_PORT {
            ports.reserve(port).unwrap();
        }
        assert_eq!(ports.reserve_dynamic(), Ok(MAX_PORT));
        assert_eq!(ports.reserve_dynamic(), Err(Error::InvalidPort));
    }
}
