//! [`DeviceChannel`] – per-robot communication façade.
//!
//! A channel combines an optional, exclusively held Bluetooth link (commands
//! out, query responses in) with an OSC link (orders in).  Links themselves
//! live in the fleet-wide [`LinkHub`]; the channel only remembers which ones
//! belong to its robot, so every operation takes the hub by `&mut`.
//!
//! # OSC port conflicts
//!
//! [`DeviceChannel::enable_osc`] retries **exactly once**: when the first
//! registration reports [`SwarmError::PortConflict`], the transport is asked
//! for a replacement port and registration is attempted again.  A second
//! failure is returned to the caller.

use swarm_types::{RobotId, SwarmError};
use tracing::{debug, info, warn};

use crate::bluetooth::{BluetoothPool, LinkId};
use crate::inbound::{InboundQueue, InboundSink, LinkKind};
use crate::osc::{OscEndpoint, OscTransport};

/// Fleet-wide link resources: the Bluetooth pool, the OSC socket pool, and the
/// inbound queue every link callback feeds.
pub struct LinkHub {
    pub bluetooth: BluetoothPool,
    pub osc: Box<dyn OscTransport>,
    pub inbound: InboundQueue,
}

impl LinkHub {
    pub fn new(osc: Box<dyn OscTransport>) -> Self {
        Self {
            bluetooth: BluetoothPool::new(),
            osc,
            inbound: InboundQueue::new(),
        }
    }

    fn sink(&self, robot: RobotId, link: LinkKind) -> InboundSink {
        self.inbound.sink(robot, link)
    }
}

/// Requested Bluetooth change for [`DeviceChannel::modify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothOptions {
    /// Drop the current link and run without Bluetooth.
    None,
    /// Switch to the given pooled link.
    Link(LinkId),
}

#[derive(Debug, Default)]
struct OscLink {
    endpoint: Option<OscEndpoint>,
    registered: bool,
    listening: bool,
}

/// The links owned by a single robot.
#[derive(Debug)]
pub struct DeviceChannel {
    owner: RobotId,
    bluetooth: Option<LinkId>,
    osc: OscLink,
}

impl DeviceChannel {
    pub fn new(owner: RobotId) -> Self {
        Self {
            owner,
            bluetooth: None,
            osc: OscLink::default(),
        }
    }

    pub fn bluetooth_link(&self) -> Option<LinkId> {
        self.bluetooth
    }

    pub fn osc_endpoint(&self) -> Option<&OscEndpoint> {
        self.osc.endpoint.as_ref()
    }

    pub fn is_osc_listening(&self) -> bool {
        self.osc.listening
    }

    /// Claim `link` from the pool and route its inbound bytes to this robot.
    ///
    /// Any link this channel held before is returned to the pool first.
    ///
    /// # Errors
    ///
    /// [`SwarmError::LinkUnavailable`] when another robot holds `link`.
    pub fn assign_bluetooth(&mut self, hub: &mut LinkHub, link: LinkId) -> Result<(), SwarmError> {
        if self.bluetooth == Some(link) {
            return Ok(());
        }
        self.release_bluetooth(hub);
        let sink = hub.sink(self.owner, LinkKind::Bluetooth);
        hub.bluetooth.claim(link, self.owner, sink)?;
        self.bluetooth = Some(link);
        Ok(())
    }

    /// Store the OSC configuration.  Does not bind or listen.
    ///
    /// # Errors
    ///
    /// - [`SwarmError::InvalidConfig`] for an empty address or port 0.
    /// - [`SwarmError::InvalidConfig`] when the link is already enabled; use
    ///   [`modify`][Self::modify] to move an active link.
    pub fn set_up_osc(&mut self, endpoint: OscEndpoint) -> Result<(), SwarmError> {
        endpoint.validate()?;
        if self.osc.registered {
            return Err(SwarmError::InvalidConfig(format!(
                "OSC link for {} is already enabled on {}",
                self.owner,
                self.osc.endpoint.as_ref().map(ToString::to_string).unwrap_or_default()
            )));
        }
        self.osc.endpoint = Some(endpoint);
        Ok(())
    }

    /// Register the configured OSC endpoint with the transport and start
    /// listening, retrying once on a new port if the first one is taken.
    ///
    /// A link that is already registered keeps its port; delivery resumes if
    /// it was stopped.
    pub fn enable_osc(&mut self, hub: &mut LinkHub) -> Result<(), SwarmError> {
        if self.osc.registered {
            if !self.osc.listening {
                self.switch_osc_state(hub)?;
            }
            debug!(robot = %self.owner, "OSC link already enabled");
            return Ok(());
        }
        let endpoint = self.osc.endpoint.clone().ok_or_else(|| {
            SwarmError::InvalidConfig(format!("no OSC endpoint configured for {}", self.owner))
        })?;

        let sink = hub.sink(self.owner, LinkKind::Osc);
        let bound = match hub.osc.register(&endpoint, sink.clone()) {
            Ok(()) => endpoint,
            Err(SwarmError::PortConflict { address, port }) => {
                let moved = hub.osc.reassign_port(&endpoint)?;
                warn!(
                    robot = %self.owner,
                    address = %address,
                    port,
                    new_port = moved.port,
                    "OSC port in use; retrying on reassigned port"
                );
                hub.osc.register(&moved, sink)?;
                moved
            }
            Err(e) => return Err(e),
        };

        info!(robot = %self.owner, endpoint = %bound, "OSC link enabled");
        self.osc.endpoint = Some(bound);
        self.osc.registered = true;
        self.osc.listening = true;
        Ok(())
    }

    /// Toggle OSC delivery.  Returns the new listening state.
    ///
    /// # Errors
    ///
    /// [`SwarmError::InvalidConfig`] when the link was never enabled.
    pub fn switch_osc_state(&mut self, hub: &mut LinkHub) -> Result<bool, SwarmError> {
        let endpoint = match (&self.osc.endpoint, self.osc.registered) {
            (Some(endpoint), true) => endpoint.clone(),
            _ => {
                return Err(SwarmError::InvalidConfig(format!(
                    "OSC link for {} is not enabled",
                    self.owner
                )));
            }
        };

        if self.osc.listening {
            hub.osc.close(&endpoint);
            self.osc.listening = false;
        } else {
            let sink = hub.sink(self.owner, LinkKind::Osc);
            hub.osc.listen(&endpoint, sink)?;
            self.osc.listening = true;
        }
        debug!(robot = %self.owner, listening = self.osc.listening, "OSC state switched");
        Ok(self.osc.listening)
    }

    /// Release the Bluetooth link and stop OSC delivery.  Safe to call on a
    /// channel that never had either link.
    pub fn disable(&mut self, hub: &mut LinkHub) {
        self.release_bluetooth(hub);
        if let (Some(endpoint), true) = (&self.osc.endpoint, self.osc.listening) {
            hub.osc.close(endpoint);
        }
        self.osc.listening = false;
    }

    /// Release the Bluetooth link, stop OSC delivery, and unbind the OSC
    /// port.  Used when the robot leaves the fleet.
    pub fn shutdown(&mut self, hub: &mut LinkHub) {
        self.disable(hub);
        if let (Some(endpoint), true) = (&self.osc.endpoint, self.osc.registered) {
            hub.osc.unregister(endpoint);
        }
        self.osc.registered = false;
    }

    /// Reconfigure the channel's links.  Bluetooth is applied before OSC.
    ///
    /// * `bluetooth` – release the current link first, then claim the new one
    ///   or stay without Bluetooth.
    /// * `osc` – close, unregister, apply the new endpoint, then
    ///   [`enable_osc`][Self::enable_osc] (so the port-conflict retry still
    ///   applies).
    ///
    /// # Errors
    ///
    /// The change is not atomic.  A failed Bluetooth claim leaves the channel
    /// without Bluetooth and OSC untouched.  A failed OSC enable keeps the
    /// Bluetooth change and leaves the channel with the new endpoint stored
    /// but not registered.
    pub fn modify(
        &mut self,
        hub: &mut LinkHub,
        osc: Option<OscEndpoint>,
        bluetooth: Option<BluetoothOptions>,
    ) -> Result<(), SwarmError> {
        if let Some(endpoint) = &osc {
            endpoint.validate()?;
        }

        match bluetooth {
            Some(BluetoothOptions::None) => self.release_bluetooth(hub),
            Some(BluetoothOptions::Link(link)) => {
                self.release_bluetooth(hub);
                self.assign_bluetooth(hub, link)?;
            }
            None => {}
        }

        if let Some(endpoint) = osc {
            if let Some(current) = self.osc.endpoint.take() {
                if self.osc.listening {
                    hub.osc.close(&current);
                }
                if self.osc.registered {
                    hub.osc.unregister(&current);
                }
            }
            self.osc.registered = false;
            self.osc.listening = false;
            self.osc.endpoint = Some(endpoint);
            self.enable_osc(hub)?;
        }
        Ok(())
    }

    /// Write `bytes` on the robot's Bluetooth link.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Transport`] when no link is held or the radio fails.
    pub fn send(&self, hub: &mut LinkHub, bytes: &[u8]) -> Result<(), SwarmError> {
        match self.bluetooth {
            Some(link) => hub.bluetooth.send(link, bytes),
            None => Err(SwarmError::Transport {
                link: format!("{}/bluetooth", self.owner),
                details: "no bluetooth link assigned".to_string(),
            }),
        }
    }

    fn release_bluetooth(&mut self, hub: &mut LinkHub) {
        if let Some(link) = self.bluetooth.take() {
            hub.bluetooth.release(link, self.owner);
        }
    }
}
