//! Buffered inbound path from transport callbacks to the control loop.
//!
//! Transports deliver bytes on their own threads, whenever data arrives.  The
//! control loop must never observe those writes mid-tick, so every callback
//! only pushes an [`InboundFrame`] into an unbounded queue; the loop calls
//! [`InboundQueue::drain`] at the start of each tick and applies the frames
//! before any supervisor reads robot state.

use swarm_types::RobotId;
use tokio::sync::mpsc;
use tracing::debug;

/// Which link a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Bluetooth,
    Osc,
}

/// Raw bytes received for one robot on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub robot: RobotId,
    pub link: LinkKind,
    pub bytes: Vec<u8>,
}

/// Callback handle given to a transport.  Cheap to clone; safe to call from
/// any thread.
#[derive(Debug, Clone)]
pub struct InboundSink {
    robot: RobotId,
    link: LinkKind,
    sender: mpsc::UnboundedSender<InboundFrame>,
}

impl InboundSink {
    pub fn robot(&self) -> RobotId {
        self.robot
    }

    pub fn link(&self) -> LinkKind {
        self.link
    }

    /// Queue `bytes` for the next tick.  Returns `false` when the queue has
    /// been dropped (the fleet is shutting down).
    pub fn deliver(&self, bytes: &[u8]) -> bool {
        let frame = InboundFrame {
            robot: self.robot,
            link: self.link,
            bytes: bytes.to_vec(),
        };
        if self.sender.send(frame).is_err() {
            debug!(robot = %self.robot, link = ?self.link, "inbound queue closed; frame dropped");
            return false;
        }
        true
    }
}

/// Multi-producer queue of inbound frames, drained on the tick path.
#[derive(Debug)]
pub struct InboundQueue {
    sender: mpsc::UnboundedSender<InboundFrame>,
    receiver: mpsc::UnboundedReceiver<InboundFrame>,
}

impl InboundQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    /// Create a sink that tags every delivered frame with `robot` and `link`.
    pub fn sink(&self, robot: RobotId, link: LinkKind) -> InboundSink {
        InboundSink {
            robot,
            link,
            sender: self.sender.clone(),
        }
    }

    /// Take every frame queued so far, in arrival order.
    pub fn drain(&mut self) -> Vec<InboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
