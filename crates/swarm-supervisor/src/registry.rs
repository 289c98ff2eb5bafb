//! [`SupervisorRegistry`] – ordered set of supervisors, ticked at a fixed
//! cadence.
//!
//! One [`SupervisorRegistry::tick`] runs these phases in order:
//!
//! 1. Deliver queued supervisor control messages to `on_osc_message`.
//! 2. Apply the fleet's buffered inbound traffic.  Each resulting order is
//!    offered to the owning supervisor's `on_entity_order` and, unless
//!    vetoed, executed with duplicate suppression.  Orders for unsupervised
//!    robots execute directly.
//! 3. Take one kinematics snapshot of the fleet, run every supervisor's
//!    `step` against it in registration order, then write the velocities.
//! 4. Advance outstanding telemetry polls.
//!
//! Nothing in a tick blocks.  Faults of a single robot are logged and the
//! tick carries on.

use std::time::Instant;

use swarm_link::{EventBus, Topic, TopicReceiver};
use swarm_robot::{CommandOutcome, EntityOrder, Fleet};
use swarm_types::{Event, EventPayload, RobotId, SupervisorMessage, SwarmError};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, instrument, warn};

use crate::supervisor::Supervisor;

const CONTROL_SOURCE: &str = "swarm-supervisor::control";

/// Sends control messages to supervisors by name.  Cheap to clone; usable
/// from any thread.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    bus: EventBus,
}

impl ControlHandle {
    /// Queue `message` for the supervisor called `supervisor`.  It is
    /// delivered at the start of the next tick.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Channel`] when the registry has been dropped.
    pub fn send(&self, supervisor: &str, message: SupervisorMessage) -> Result<(), SwarmError> {
        let payload = EventPayload::SupervisorControl {
            supervisor: supervisor.to_string(),
            message,
        };
        self.bus
            .publish_to(Topic::SupervisorControl, Event::new(CONTROL_SOURCE, payload))
            .map(|_| ())
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub control_messages: usize,
    pub orders_executed: usize,
    pub orders_vetoed: usize,
    pub velocity_updates: usize,
    pub polls_finished: usize,
}

pub struct SupervisorRegistry {
    supervisors: Vec<Box<dyn Supervisor>>,
    bus: EventBus,
    control: TopicReceiver,
}

impl SupervisorRegistry {
    /// Create an empty registry listening for control messages on `bus`.
    pub fn new(bus: &EventBus) -> Self {
        Self {
            supervisors: Vec::new(),
            bus: bus.clone(),
            control: bus.subscribe_to(Topic::SupervisorControl),
        }
    }

    /// Add a supervisor.  Supervisors step in registration order.
    ///
    /// # Errors
    ///
    /// [`SwarmError::InvalidConfig`] when the name is already taken.
    pub fn register(&mut self, supervisor: Box<dyn Supervisor>) -> Result<(), SwarmError> {
        if self.get(supervisor.name()).is_some() {
            return Err(SwarmError::InvalidConfig(format!(
                "supervisor '{}' is already registered",
                supervisor.name()
            )));
        }
        debug!(supervisor = supervisor.name(), kind = %supervisor.kind(), "supervisor registered");
        self.supervisors.push(supervisor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Supervisor> {
        self.supervisors
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Supervisor + 'static)> {
        self.supervisors
            .iter_mut()
            .find(|s| s.name() == name)
            .map(|s| s.as_mut())
    }

    /// The first registered supervisor holding `robot`.
    pub fn supervisor_for(&self, robot: RobotId) -> Option<&dyn Supervisor> {
        self.supervisors
            .iter()
            .find(|s| s.owns(robot))
            .map(|s| s.as_ref())
    }

    /// Hand `robot` to the named supervisor.
    pub fn assign(&mut self, supervisor: &str, robot: RobotId) -> Result<(), SwarmError> {
        let target = self
            .get_mut(supervisor)
            .ok_or_else(|| SwarmError::InvalidConfig(format!("no supervisor named '{supervisor}'")))?;
        target.add_robot(robot);
        Ok(())
    }

    /// Drop `robot` from every supervisor.  Returns how many held it.
    pub fn release(&mut self, robot: RobotId) -> usize {
        self.supervisors
            .iter_mut()
            .map(|s| s.remove_robot(robot))
            .filter(|removed| *removed)
            .count()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.supervisors.iter().map(|s| s.name())
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            bus: self.bus.clone(),
        }
    }

    /// Run one control tick against `fleet`.
    #[instrument(level = "debug", skip_all)]
    pub fn tick(&mut self, fleet: &mut Fleet, now: Instant) -> TickReport {
        let mut report = TickReport {
            control_messages: self.deliver_control_messages(),
            ..TickReport::default()
        };

        for order in fleet.apply_inbound() {
            match self.route_order(order) {
                Some(order) => {
                    let robot = order.robot;
                    match fleet.execute_command(robot, order.command, true) {
                        Ok(CommandOutcome::Sent) => report.orders_executed += 1,
                        Ok(CommandOutcome::Suppressed) => {}
                        Ok(CommandOutcome::SendFailed(e)) | Err(e) => {
                            debug!(robot = %robot, error = %e, "order not executed");
                        }
                    }
                }
                None => report.orders_vetoed += 1,
            }
        }

        let snapshot = fleet.snapshot(fleet.ids());
        let updates: Vec<_> = self
            .supervisors
            .iter()
            .flat_map(|supervisor| supervisor.step(&snapshot))
            .collect();
        for (robot, velocity) in updates {
            match fleet.set_velocity(robot, velocity) {
                Ok(()) => report.velocity_updates += 1,
                Err(e) => warn!(robot = %robot, error = %e, "velocity update dropped"),
            }
        }

        report.polls_finished = fleet.advance_polls(now).len();
        report
    }

    fn route_order(&mut self, order: EntityOrder) -> Option<EntityOrder> {
        let robot = order.robot;
        match self.supervisors.iter_mut().find(|s| s.owns(robot)) {
            Some(supervisor) => {
                let forwarded = supervisor.on_entity_order(order);
                if forwarded.is_none() {
                    debug!(robot = %robot, supervisor = supervisor.name(), "order vetoed");
                }
                forwarded
            }
            None => Some(order),
        }
    }

    fn deliver_control_messages(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let event = match self.control.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "supervisor control messages lost");
                    continue;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            };
            let EventPayload::SupervisorControl { supervisor, message } = event.payload else {
                continue;
            };
            match self.get_mut(&supervisor) {
                Some(target) => {
                    target.on_osc_message(&message);
                    delivered += 1;
                }
                None => warn!(supervisor = %supervisor, address = %message.address, "control message for unknown supervisor"),
            }
        }
        delivered
    }
}
