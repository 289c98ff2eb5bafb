//! The [`Supervisor`] contract.
//!
//! A supervisor names a subset of the fleet's robots and computes their new
//! velocities once per tick.  It never owns or mutates a robot directly:
//! [`Supervisor::step`] reads a start-of-tick [`Snapshot`] and returns the
//! velocity writes, which the registry applies afterwards.  That makes a step
//! idempotent within a tick and independent of iteration order.

use std::collections::{BTreeMap, BTreeSet};

use swarm_robot::{EntityOrder, Kinematics};
use swarm_types::{RobotId, SupervisorMessage, Vec3};

use crate::kind::SupervisorKind;

/// Position and velocity of the supervised robots, taken at tick start.
pub type Snapshot = BTreeMap<RobotId, Kinematics>;

/// A velocity a supervisor wants written to a robot.
pub type VelocityUpdate = (RobotId, Vec3);

/// State every supervisor variant carries.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorCore {
    name: String,
    robots: BTreeSet<RobotId>,
    /// Half-extents of the volume robots are kept in, centred on the origin.
    bounds: Vec3,
}

impl SupervisorCore {
    pub fn new(name: impl Into<String>, bounds: Vec3) -> Self {
        Self {
            name: name.into(),
            robots: BTreeSet::new(),
            bounds,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn robots(&self) -> &BTreeSet<RobotId> {
        &self.robots
    }

    pub fn bounds(&self) -> Vec3 {
        self.bounds
    }

    /// Per-axis `|position.axis| > bounds.axis`.
    pub fn out_of_bounds(&self, position: Vec3) -> [bool; 3] {
        [
            position.x.abs() > self.bounds.x,
            position.y.abs() > self.bounds.y,
            position.z.abs() > self.bounds.z,
        ]
    }

    /// The snapshot entries for robots this supervisor holds.
    pub fn members<'a>(&self, snapshot: &'a Snapshot) -> Vec<(RobotId, &'a Kinematics)> {
        snapshot
            .iter()
            .filter(|(id, _)| self.robots.contains(id))
            .map(|(id, kinematics)| (*id, kinematics))
            .collect()
    }
}

/// Common contract of all supervisor variants.
pub trait Supervisor: Send {
    fn core(&self) -> &SupervisorCore;

    fn core_mut(&mut self) -> &mut SupervisorCore;

    fn kind(&self) -> SupervisorKind;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn owns(&self, robot: RobotId) -> bool {
        self.core().robots.contains(&robot)
    }

    /// Returns `false` if the robot was already held.
    fn add_robot(&mut self, robot: RobotId) -> bool {
        self.core_mut().robots.insert(robot)
    }

    /// Returns `false` if the robot was not held.
    fn remove_robot(&mut self, robot: RobotId) -> bool {
        self.core_mut().robots.remove(&robot)
    }

    /// Compute this tick's velocity writes from the start-of-tick snapshot.
    ///
    /// Robots missing from `snapshot` are skipped.
    fn step(&self, snapshot: &Snapshot) -> Vec<VelocityUpdate>;

    /// Filter an order addressed to one of this supervisor's robots.
    ///
    /// Returning `None` vetoes the order.  The default forwards orders for
    /// owned robots unchanged and drops the rest.
    fn on_entity_order(&mut self, order: EntityOrder) -> Option<EntityOrder> {
        self.owns(order.robot).then_some(order)
    }

    /// React to a control message addressed to the supervisor itself.
    fn on_osc_message(&mut self, _message: &SupervisorMessage) {}
}
