//! OSC datagram transport contract.
//!
//! Socket handling lives outside the core.  A robot's OSC link is described by
//! an [`OscEndpoint`] and handed to a shared [`OscTransport`], which binds it,
//! delivers datagrams to the registered [`InboundSink`], and can hand out a
//! replacement port when the requested one is taken.

use swarm_types::SwarmError;

use crate::inbound::InboundSink;

/// Address and port an OSC link listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OscEndpoint {
    pub address: String,
    pub port: u16,
}

impl OscEndpoint {
    /// Build a validated endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::InvalidConfig`] for an empty address or port 0.
    pub fn new(address: impl Into<String>, port: u16) -> Result<Self, SwarmError> {
        let endpoint = Self {
            address: address.into(),
            port,
        };
        endpoint.validate()?;
        Ok(endpoint)
    }

    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.address.trim().is_empty() {
            return Err(SwarmError::InvalidConfig("OSC address must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SwarmError::InvalidConfig(format!(
                "OSC port 0 is not valid for {}",
                self.address
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for OscEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The shared pool of OSC sockets.
pub trait OscTransport: Send {
    /// Bind `endpoint` and start delivering its datagrams to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::PortConflict`] when the port is already bound.
    fn register(&mut self, endpoint: &OscEndpoint, sink: InboundSink) -> Result<(), SwarmError>;

    /// Unbind `endpoint`.  No-op when it is not registered.
    fn unregister(&mut self, endpoint: &OscEndpoint);

    /// Pick a free port for `endpoint`'s address and return the new endpoint.
    fn reassign_port(&mut self, endpoint: &OscEndpoint) -> Result<OscEndpoint, SwarmError>;

    /// Resume delivery for a registered `endpoint`, routing to `sink`.
    fn listen(&mut self, endpoint: &OscEndpoint, sink: InboundSink) -> Result<(), SwarmError>;

    /// Stop delivery for `endpoint` while keeping its port bound.
    fn close(&mut self, endpoint: &OscEndpoint);
}
