//! In-process simulated transports for CI and headless runs.
//!
//! [`SimBluetoothLink`] behaves like a robot shell on the far side of a serial
//! link: argument-less commands naming a known field are answered with
//! `<field>=<value>\r\n`, commands with an argument update that field.
//! [`SimOscTransport`] models a socket pool with an optional set of ports that
//! some other process already holds.
//!
//! Both expose a cloneable handle so tests can inspect and drive them after
//! they have been boxed into a pool.
//!
//! # Example
//!
//! ```rust
//! use swarm_link::sim::SimBluetoothLink;
//! use swarm_link::{BluetoothLink, InboundQueue, LinkKind};
//! use swarm_types::RobotId;
//!
//! let mut queue = InboundQueue::new();
//! let mut link = SimBluetoothLink::new("metabot-01").with_field("alt", 42);
//! link.set_listener(Some(queue.sink(RobotId(1), LinkKind::Bluetooth)));
//!
//! link.send(b"alt\r\n").unwrap();
//! assert_eq!(queue.drain()[0].bytes, b"alt=42\r\n".to_vec());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use swarm_types::SwarmError;

use crate::bluetooth::BluetoothLink;
use crate::inbound::InboundSink;
use crate::osc::{OscEndpoint, OscTransport};

/// First port handed out by [`SimOscTransport::reassign_port`].
const FIRST_SPARE_PORT: u16 = 57_120;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not wedge the other handles.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated Bluetooth link
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimBluetoothState {
    sent: Vec<Vec<u8>>,
    fields: BTreeMap<String, String>,
    listener: Option<InboundSink>,
    fail_sends: bool,
}

/// A simulated robot shell behind a Bluetooth link.
pub struct SimBluetoothLink {
    name: String,
    state: Arc<Mutex<SimBluetoothState>>,
}

impl SimBluetoothLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// A link preloaded with the full set of Metabot telemetry fields.
    pub fn metabot(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_field("h", 0)
            .with_field("r", 0)
            .with_field("dx", 0)
            .with_field("dy", 0)
            .with_field("alt", 15)
            .with_field("freq", 2)
            .with_text_field("version", "1.1.1")
    }

    pub fn with_field(self, name: &str, value: i64) -> Self {
        self.with_text_field(name, &value.to_string())
    }

    pub fn with_text_field(self, name: &str, value: &str) -> Self {
        lock(&self.state)
            .fields
            .insert(name.to_string(), value.to_string());
        self
    }

    /// A handle that observes and controls this link after it is boxed.
    pub fn handle(&self) -> SimBluetoothHandle {
        SimBluetoothHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl BluetoothLink for SimBluetoothLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SwarmError> {
        let mut state = lock(&self.state);
        if state.fail_sends {
            return Err(SwarmError::Transport {
                link: self.name.clone(),
                details: "simulated radio failure".to_string(),
            });
        }
        state.sent.push(bytes.to_vec());

        let line = String::from_utf8_lossy(bytes);
        let mut parts = line.trim_end_matches(['\r', '\n']).splitn(2, ' ');
        let name = parts.next().unwrap_or_default().to_string();
        match parts.next() {
            Some(arg) => {
                if state.fields.contains_key(&name) {
                    state.fields.insert(name, arg.trim().to_string());
                }
            }
            None => {
                let reply = state
                    .fields
                    .get(&name)
                    .map(|value| format!("{name}={value}\r\n"));
                if let (Some(reply), Some(sink)) = (reply, state.listener.as_ref()) {
                    sink.deliver(reply.as_bytes());
                }
            }
        }
        Ok(())
    }

    fn set_listener(&mut self, sink: Option<InboundSink>) {
        lock(&self.state).listener = sink;
    }
}

/// Test-side view of a [`SimBluetoothLink`].
#[derive(Clone)]
pub struct SimBluetoothHandle {
    state: Arc<Mutex<SimBluetoothState>>,
}

impl SimBluetoothHandle {
    /// Every frame written to the link so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent.clone()
    }

    /// Frames written so far, decoded as trimmed text lines.
    pub fn sent_lines(&self) -> Vec<String> {
        lock(&self.state)
            .sent
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).trim_end().to_string())
            .collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.state).listener.is_some()
    }

    /// Current value of a simulated robot field.
    pub fn field(&self, name: &str) -> Option<String> {
        lock(&self.state).fields.get(name).cloned()
    }

    /// Push unsolicited bytes to whoever listens on the link.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        match lock(&self.state).listener.as_ref() {
            Some(sink) => sink.deliver(bytes),
            None => false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated OSC transport
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimOscState {
    /// Ports bound through this transport; `Some` while delivering.
    bound: BTreeMap<u16, Option<InboundSink>>,
    /// Ports held by some other process.
    foreign: BTreeSet<u16>,
    register_attempts: usize,
    next_spare: u16,
}

/// A simulated OSC socket pool.
pub struct SimOscTransport {
    state: Arc<Mutex<SimOscState>>,
}

impl SimOscTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimOscState {
                next_spare: FIRST_SPARE_PORT,
                ..SimOscState::default()
            })),
        }
    }

    pub fn handle(&self) -> SimOscHandle {
        SimOscHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimOscTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl OscTransport for SimOscTransport {
    fn register(&mut self, endpoint: &OscEndpoint, sink: InboundSink) -> Result<(), SwarmError> {
        let mut state = lock(&self.state);
        state.register_attempts += 1;
        if state.foreign.contains(&endpoint.port) || state.bound.contains_key(&endpoint.port) {
            return Err(SwarmError::PortConflict {
                address: endpoint.address.clone(),
                port: endpoint.port,
            });
        }
        state.bound.insert(endpoint.port, Some(sink));
        Ok(())
    }

    fn unregister(&mut self, endpoint: &OscEndpoint) {
        lock(&self.state).bound.remove(&endpoint.port);
    }

    fn reassign_port(&mut self, endpoint: &OscEndpoint) -> Result<OscEndpoint, SwarmError> {
        let mut state = lock(&self.state);
        // Only ports bound through this pool are known; foreign holders show
        // up as a conflict at bind time.
        let mut port = state.next_spare;
        while state.bound.contains_key(&port) {
            port = port.checked_add(1).ok_or_else(|| {
                SwarmError::InvalidConfig("no spare OSC port left".to_string())
            })?;
        }
        state.next_spare = port.saturating_add(1);
        Ok(OscEndpoint {
            address: endpoint.address.clone(),
            port,
        })
    }

    fn listen(&mut self, endpoint: &OscEndpoint, sink: InboundSink) -> Result<(), SwarmError> {
        match lock(&self.state).bound.get_mut(&endpoint.port) {
            Some(slot) => {
                *slot = Some(sink);
                Ok(())
            }
            None => Err(SwarmError::Transport {
                link: endpoint.to_string(),
                details: "port is not registered".to_string(),
            }),
        }
    }

    fn close(&mut self, endpoint: &OscEndpoint) {
        if let Some(slot) = lock(&self.state).bound.get_mut(&endpoint.port) {
            *slot = None;
        }
    }
}

/// Test-side view of a [`SimOscTransport`].
#[derive(Clone)]
pub struct SimOscHandle {
    state: Arc<Mutex<SimOscState>>,
}

impl SimOscHandle {
    /// Mark `port` as held by another process.
    pub fn occupy(&self, port: u16) {
        lock(&self.state).foreign.insert(port);
    }

    /// The port the next reassignment will try first.
    pub fn next_spare_port(&self) -> u16 {
        lock(&self.state).next_spare
    }

    pub fn is_bound(&self, port: u16) -> bool {
        lock(&self.state).bound.contains_key(&port)
    }

    pub fn is_listening(&self, port: u16) -> bool {
        matches!(lock(&self.state).bound.get(&port), Some(Some(_)))
    }

    pub fn register_attempts(&self) -> usize {
        lock(&self.state).register_attempts
    }

    /// Deliver a datagram to the listener on `port`.  Returns `false` when no
    /// one is listening.
    pub fn inject(&self, port: u16, bytes: &[u8]) -> bool {
        match lock(&self.state).bound.get(&port) {
            Some(Some(sink)) => sink.deliver(bytes),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::{InboundQueue, LinkKind};
    use swarm_types::RobotId;

    #[test]
    fn sim_bluetooth_answers_queries() {
        let mut queue = InboundQueue::new();
        let mut link = SimBluetoothLink::metabot("metabot-01");
        link.set_listener(Some(queue.sink(RobotId(1), LinkKind::Bluetooth)));

        link.send(b"version\r\n").unwrap();
        link.send(b"freq\r\n").unwrap();

        let frames = queue.drain();
        assert_eq!(frames[0].bytes, b"version=1.1.1\r\n".to_vec());
        assert_eq!(frames[1].bytes, b"freq=2\r\n".to_vec());
    }

    #[test]
    fn sim_bluetooth_commands_update_fields() {
        let mut queue = InboundQueue::new();
        let mut link = SimBluetoothLink::metabot("metabot-01");
        let handle = link.handle();
        link.set_listener(Some(queue.sink(RobotId(1), LinkKind::Bluetooth)));

        link.send(b"dx 50\r\n").unwrap();
        assert_eq!(handle.field("dx").as_deref(), Some("50"));
        // Setting a value produces no reply.
        assert!(queue.drain().is_empty());
        assert_eq!(handle.sent_lines(), vec!["dx 50".to_string()]);
    }

    #[test]
    fn sim_bluetooth_failure_mode() {
        let mut link = SimBluetoothLink::new("metabot-01");
        let handle = link.handle();
        handle.fail_sends(true);
        assert!(matches!(
            link.send(b"start\r\n"),
            Err(SwarmError::Transport { .. })
        ));
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn sim_osc_conflicts_on_foreign_and_bound_ports() {
        let queue = InboundQueue::new();
        let mut osc = SimOscTransport::new();
        let handle = osc.handle();
        handle.occupy(9000);

        let busy = OscEndpoint::new("127.0.0.1", 9000).unwrap();
        let sink = queue.sink(RobotId(1), LinkKind::Osc);
        assert!(matches!(
            osc.register(&busy, sink.clone()),
            Err(SwarmError::PortConflict { port: 9000, .. })
        ));

        let free = OscEndpoint::new("127.0.0.1", 9001).unwrap();
        osc.register(&free, sink.clone()).unwrap();
        assert!(osc.register(&free, sink).is_err());
        assert_eq!(handle.register_attempts(), 3);
    }

    #[test]
    fn sim_osc_reassign_skips_bound_ports() {
        let queue = InboundQueue::new();
        let mut osc = SimOscTransport::new();
        let handle = osc.handle();
        let sink = queue.sink(RobotId(1), LinkKind::Osc);
        let first_spare = OscEndpoint::new("127.0.0.1", FIRST_SPARE_PORT).unwrap();
        osc.register(&first_spare, sink).unwrap();

        let ep = OscEndpoint::new("127.0.0.1", 9000).unwrap();
        let moved = osc.reassign_port(&ep).unwrap();
        assert_eq!(moved.address, "127.0.0.1");
        assert_eq!(moved.port, FIRST_SPARE_PORT + 1);
        assert_eq!(handle.next_spare_port(), FIRST_SPARE_PORT + 2);
    }

    #[test]
    fn sim_osc_close_and_listen() {
        let mut queue = InboundQueue::new();
        let mut osc = SimOscTransport::new();
        let handle = osc.handle();
        let ep = OscEndpoint::new("127.0.0.1", 9100).unwrap();
        osc.register(&ep, queue.sink(RobotId(1), LinkKind::Osc)).unwrap();
        assert!(handle.inject(9100, b"dx 10"));

        osc.close(&ep);
        assert!(handle.is_bound(9100));
        assert!(!handle.is_listening(9100));
        assert!(!handle.inject(9100, b"dx 20"));

        osc.listen(&ep, queue.sink(RobotId(1), LinkKind::Osc)).unwrap();
        assert!(handle.inject(9100, b"dx 30"));
        assert_eq!(queue.drain().len(), 2);

        osc.unregister(&ep);
        assert!(!handle.is_bound(9100));
        assert!(osc.listen(&ep, queue.sink(RobotId(1), LinkKind::Osc)).is_err());
    }
}
