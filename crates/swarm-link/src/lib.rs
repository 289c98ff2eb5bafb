//! `swarm-link` – device links and fleet plumbing.
//!
//! Everything between a robot entity and the outside world passes through
//! this crate.  Transports themselves (radio, sockets) are collaborators
//! behind traits; the crate owns who may use which link and when.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe [`EventBus`] built on
//!   Tokio broadcast channels.
//! - [`inbound`] – [`InboundQueue`]: buffers bytes delivered by transport
//!   callbacks until the control loop drains them at a tick boundary.
//! - [`bluetooth`] – [`BluetoothPool`]: arena of exclusive point-to-point
//!   links with an availability flag per link.
//! - [`osc`] – [`OscTransport`]: the datagram transport contract and
//!   [`OscEndpoint`] validation.
//! - [`channel`] – [`DeviceChannel`]: per-robot façade combining an optional
//!   Bluetooth link with an OSC link.
//! - [`sim`] – in-process simulated transports for tests and headless runs.

pub mod bluetooth;
pub mod bus;
pub mod channel;
pub mod inbound;
pub mod osc;
pub mod sim;

pub use bluetooth::{BluetoothLink, BluetoothPool, LinkId};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use channel::{BluetoothOptions, DeviceChannel, LinkHub};
pub use inbound::{InboundFrame, InboundQueue, InboundSink, LinkKind};
pub use osc::{OscEndpoint, OscTransport};
