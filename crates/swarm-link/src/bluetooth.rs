//! [`BluetoothPool`] – arena of exclusive point-to-point links.
//!
//! Bluetooth links are discovered and paired outside the core, then handed to
//! the pool.  A link is shared by the whole fleet but may be *held* by at most
//! one robot at a time: claiming flips its `available` flag off and installs
//! the claimant's inbound callback; releasing flips it back on before anyone
//! else may claim it.  All claims go through the pool, which needs `&mut`
//! access, so check-and-set is atomic with respect to other claimants.

use swarm_types::{RobotId, SwarmError};
use tracing::{debug, warn};

use crate::inbound::InboundSink;

/// A point-to-point serial link to one physical robot.
///
/// Implementations wrap the actual radio.  The pool is the only caller.
pub trait BluetoothLink: Send {
    /// Human-readable name, e.g. the paired device name `"metabot-07"`.
    fn name(&self) -> &str;

    /// Write `bytes` to the link.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Transport`] when the radio reports a failure.
    fn send(&mut self, bytes: &[u8]) -> Result<(), SwarmError>;

    /// Install (or with `None`, remove) the callback that receives inbound
    /// bytes.
    fn set_listener(&mut self, sink: Option<InboundSink>);
}

/// Index of a link inside a [`BluetoothPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub usize);

struct PooledLink {
    link: Box<dyn BluetoothLink>,
    available: bool,
    owner: Option<RobotId>,
}

/// Owner of every Bluetooth link in the fleet.
#[derive(Default)]
pub struct BluetoothPool {
    links: Vec<PooledLink>,
}

impl BluetoothPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a discovered link to the pool.  New links start available.
    pub fn add(&mut self, link: Box<dyn BluetoothLink>) -> LinkId {
        self.links.push(PooledLink {
            link,
            available: true,
            owner: None,
        });
        LinkId(self.links.len() - 1)
    }

    /// Look a link up by its device name.
    pub fn find(&self, name: &str) -> Option<LinkId> {
        self.links
            .iter()
            .position(|entry| entry.link.name() == name)
            .map(LinkId)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn name(&self, id: LinkId) -> Result<&str, SwarmError> {
        Ok(self.entry(id)?.link.name())
    }

    pub fn is_available(&self, id: LinkId) -> Result<bool, SwarmError> {
        Ok(self.entry(id)?.available)
    }

    /// The robot currently holding `id`, if any.
    pub fn owner(&self, id: LinkId) -> Result<Option<RobotId>, SwarmError> {
        Ok(self.entry(id)?.owner)
    }

    /// Claim `id` for `owner` and route its inbound bytes to `sink`.
    ///
    /// # Errors
    ///
    /// - [`SwarmError::UnknownLink`] – `id` is not in the pool.
    /// - [`SwarmError::LinkUnavailable`] – another robot holds the link.
    pub fn claim(&mut self, id: LinkId, owner: RobotId, sink: InboundSink) -> Result<(), SwarmError> {
        let entry = self.entry_mut(id)?;
        if !entry.available {
            return Err(SwarmError::LinkUnavailable {
                link: entry.link.name().to_string(),
            });
        }
        entry.available = false;
        entry.owner = Some(owner);
        entry.link.set_listener(Some(sink));
        debug!(link = entry.link.name(), robot = %owner, "bluetooth link claimed");
        Ok(())
    }

    /// Return `id` to the pool.  Only the current owner may release a link;
    /// anything else is logged and ignored.
    pub fn release(&mut self, id: LinkId, owner: RobotId) {
        let Ok(entry) = self.entry_mut(id) else {
            warn!(link = id.0, robot = %owner, "release of unknown bluetooth link ignored");
            return;
        };
        if entry.owner != Some(owner) {
            warn!(
                link = entry.link.name(),
                robot = %owner,
                holder = ?entry.owner,
                "release by non-owner ignored"
            );
            return;
        }
        entry.link.set_listener(None);
        entry.owner = None;
        entry.available = true;
        debug!(link = entry.link.name(), robot = %owner, "bluetooth link released");
    }

    /// Write `bytes` on link `id`.
    pub fn send(&mut self, id: LinkId, bytes: &[u8]) -> Result<(), SwarmError> {
        self.entry_mut(id)?.link.send(bytes)
    }

    fn entry(&self, id: LinkId) -> Result<&PooledLink, SwarmError> {
        self.links.get(id.0).ok_or(SwarmError::UnknownLink(id.0))
    }

    fn entry_mut(&mut self, id: LinkId) -> Result<&mut PooledLink, SwarmError> {
        self.links.get_mut(id.0).ok_or(SwarmError::UnknownLink(id.0))
    }
}
