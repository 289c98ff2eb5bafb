//! [`Fleet`] – owner of every [`RobotEntity`] and of the shared link hub.
//!
//! Supervisors never hold entities.  They name robots by [`RobotId`] and go
//! through the fleet for snapshots and velocity writes.
//!
//! Inbound transport traffic sits in the hub's [`InboundQueue`] until
//! [`Fleet::apply_inbound`] drains it.  The control loop calls that at the
//! start of each tick, so nothing a transport callback delivers can change an
//! entity between a supervisor's snapshot and its velocity write.
//!
//! Notifications go out on the [`EventBus`]:
//!
//! | Event | Topic |
//! |---|---|
//! | `CommandSent` / `CommandFailed` | [`Topic::Commands`] |
//! | `TelemetryReady` | [`Topic::Telemetry`] |
//! | `TelemetryTimeout`, `LinkFault` | [`Topic::SystemAlerts`] |
//!
//! [`InboundQueue`]: swarm_link::InboundQueue

use std::collections::BTreeMap;
use std::time::Instant;

use swarm_link::{
    BluetoothLink, BluetoothOptions, EventBus, LinkHub, LinkId, LinkKind, OscEndpoint,
    OscTransport, Topic,
};
use swarm_types::{Command, Event, EventPayload, RobotId, SwarmError, Vec3};
use tracing::{debug, info, warn};

use crate::entity::{CommandOutcome, Kinematics, RobotEntity, RobotProfile};
use crate::order::EntityOrder;
use crate::poll::{PollSettings, PollStatus};
use crate::telemetry::TelemetryField;

const EVENT_SOURCE: &str = "swarm-robot::fleet";

/// Links to attach when a robot is set up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceOptions {
    pub bluetooth: Option<LinkId>,
    pub osc: Option<OscEndpoint>,
}

/// Partial update for [`Fleet::modify`].  `None` leaves that part alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotModification {
    pub profile: Option<RobotProfile>,
    pub osc: Option<OscEndpoint>,
    pub bluetooth: Option<BluetoothOptions>,
}

pub struct Fleet {
    robots: BTreeMap<RobotId, RobotEntity>,
    hub: LinkHub,
    bus: EventBus,
    poll_settings: PollSettings,
}

impl Fleet {
    pub fn new(osc: Box<dyn OscTransport>, bus: EventBus, poll_settings: PollSettings) -> Self {
        Self {
            robots: BTreeMap::new(),
            hub: LinkHub::new(osc),
            bus,
            poll_settings,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn hub(&self) -> &LinkHub {
        &self.hub
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll_settings
    }

    /// Put a Bluetooth link into the shared pool.
    pub fn add_bluetooth_link(&mut self, link: Box<dyn BluetoothLink>) -> LinkId {
        self.hub.bluetooth.add(link)
    }

    pub fn find_bluetooth_link(&self, name: &str) -> Option<LinkId> {
        self.hub.bluetooth.find(name)
    }

    /// Create a robot without links.
    ///
    /// # Errors
    ///
    /// [`SwarmError::InvalidConfig`] when `id` is already in the fleet.
    pub fn spawn(&mut self, id: RobotId, profile: RobotProfile) -> Result<(), SwarmError> {
        if self.robots.contains_key(&id) {
            return Err(SwarmError::InvalidConfig(format!("{id} already exists")));
        }
        info!(robot = %id, name = %profile.name, "robot spawned");
        self.robots.insert(id, RobotEntity::new(id, profile));
        Ok(())
    }

    /// Attach links to a robot: claim the Bluetooth link, then configure and
    /// enable OSC.  Errors are surfaced to the caller.
    pub fn set_up_device(&mut self, id: RobotId, options: DeviceOptions) -> Result<(), SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        if let Some(link) = options.bluetooth {
            robot.channel_mut().assign_bluetooth(&mut self.hub, link)?;
        }
        if let Some(endpoint) = options.osc {
            let channel = robot.channel_mut();
            channel.set_up_osc(endpoint)?;
            channel.enable_osc(&mut self.hub)?;
        }
        Ok(())
    }

    pub fn robot(&self, id: RobotId) -> Option<&RobotEntity> {
        self.robots.get(&id)
    }

    pub fn robot_mut(&mut self, id: RobotId) -> Option<&mut RobotEntity> {
        self.robots.get_mut(&id)
    }

    pub fn contains(&self, id: RobotId) -> bool {
        self.robots.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = RobotId> + '_ {
        self.robots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }

    /// Execute a command on one robot and announce the result.
    ///
    /// # Errors
    ///
    /// Only [`SwarmError::UnknownRobot`]; send failures come back as
    /// [`CommandOutcome::SendFailed`].
    pub fn execute_command(
        &mut self,
        id: RobotId,
        command: Command,
        verify_dedup: bool,
    ) -> Result<CommandOutcome, SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        let outcome = robot.execute_command(&mut self.hub, command.clone(), verify_dedup);
        self.announce(id, command, &outcome);
        Ok(outcome)
    }

    pub fn toggle_running(&mut self, id: RobotId) -> Result<CommandOutcome, SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        let command = if robot.is_started() {
            Command::stop()
        } else {
            Command::start()
        };
        let outcome = robot.toggle_running(&mut self.hub);
        self.announce(id, command, &outcome);
        Ok(outcome)
    }

    pub fn modify_basic_value(
        &mut self,
        id: RobotId,
        field: TelemetryField,
        value: i64,
    ) -> Result<CommandOutcome, SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        let outcome = robot.modify_basic_value(&mut self.hub, field, value)?;
        self.announce(id, Command::new(field.key(), Some(value as f32)), &outcome);
        Ok(outcome)
    }

    /// Start a telemetry refresh on one robot.  Each query is announced.
    pub fn poll_telemetry(&mut self, id: RobotId, now: Instant) -> Result<(), SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        let outcomes = robot.poll_telemetry(&mut self.hub, self.poll_settings, now);
        for (query, outcome) in outcomes {
            self.announce(id, query, &outcome);
        }
        Ok(())
    }

    /// Start a telemetry refresh on every robot.
    pub fn poll_all(&mut self, now: Instant) {
        let ids: Vec<RobotId> = self.robots.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.poll_telemetry(id, now) {
                warn!(robot = %id, error = %e, "telemetry refresh not started");
            }
        }
    }

    /// Apply buffered inbound traffic.
    ///
    /// Bluetooth bytes update telemetry in place.  OSC datagrams are decoded
    /// into orders and returned for routing; malformed ones raise a
    /// `LinkFault` alert.  Frames for robots no longer in the fleet are
    /// dropped.
    pub fn apply_inbound(&mut self) -> Vec<EntityOrder> {
        let mut orders = Vec::new();
        for frame in self.hub.inbound.drain() {
            let Some(robot) = self.robots.get_mut(&frame.robot) else {
                debug!(robot = %frame.robot, "inbound frame for departed robot dropped");
                continue;
            };
            match frame.link {
                LinkKind::Bluetooth => {
                    robot.ingest_bluetooth(&frame.bytes);
                }
                LinkKind::Osc => match EntityOrder::decode(frame.robot, &frame.bytes) {
                    Ok(order) => orders.push(order),
                    Err(e) => {
                        warn!(robot = %frame.robot, error = %e, "malformed OSC order dropped");
                        self.publish(
                            Topic::SystemAlerts,
                            EventPayload::LinkFault {
                                robot: frame.robot,
                                details: e.to_string(),
                            },
                        );
                    }
                },
            }
        }
        orders
    }

    /// Advance every outstanding telemetry poll.  Returns the robots whose
    /// poll finished (ready or timed out) at `now`.
    pub fn advance_polls(&mut self, now: Instant) -> Vec<(RobotId, PollStatus)> {
        let mut finished = Vec::new();
        for (id, robot) in &mut self.robots {
            match robot.check_poll(now) {
                Some(PollStatus::Pending) | None => {}
                Some(status) => finished.push((*id, status)),
            }
        }

        for (id, status) in &finished {
            match status {
                PollStatus::Ready(snapshot) => {
                    info!(robot = %id, version = %snapshot.version, "telemetry ready");
                    self.publish(
                        Topic::Telemetry,
                        EventPayload::TelemetryReady {
                            robot: *id,
                            telemetry: snapshot.clone(),
                        },
                    );
                }
                PollStatus::TimedOut => {
                    let error = SwarmError::TelemetryTimeout { robot: *id };
                    warn!(robot = %id, error = %error, "telemetry poll abandoned");
                    self.publish(Topic::SystemAlerts, EventPayload::TelemetryTimeout { robot: *id });
                }
                PollStatus::Pending => {}
            }
        }
        finished
    }

    /// Position and velocity of every robot in `ids` that is in the fleet.
    pub fn snapshot<I>(&self, ids: I) -> BTreeMap<RobotId, Kinematics>
    where
        I: IntoIterator<Item = RobotId>,
    {
        ids.into_iter()
            .filter_map(|id| self.robots.get(&id).map(|robot| (id, robot.kinematics())))
            .collect()
    }

    pub fn kinematics(&self, id: RobotId) -> Result<Kinematics, SwarmError> {
        self.robots
            .get(&id)
            .map(RobotEntity::kinematics)
            .ok_or(SwarmError::UnknownRobot(id))
    }

    pub fn set_velocity(&mut self, id: RobotId, velocity: Vec3) -> Result<(), SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        robot.set_velocity(velocity);
        Ok(())
    }

    /// Position write-back for the external physics consumer.
    pub fn set_position(&mut self, id: RobotId, position: Vec3) -> Result<(), SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        robot.set_position(position);
        Ok(())
    }

    pub fn switch_osc_state(&mut self, id: RobotId) -> Result<bool, SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        robot.channel_mut().switch_osc_state(&mut self.hub)
    }

    pub fn modify(&mut self, id: RobotId, change: RobotModification) -> Result<(), SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        robot.modify(&mut self.hub, change.profile, change.osc, change.bluetooth)
    }

    /// Cancel the robot's poll and release its links.  It stays in the fleet.
    pub fn disable(&mut self, id: RobotId) -> Result<(), SwarmError> {
        let robot = self.robots.get_mut(&id).ok_or(SwarmError::UnknownRobot(id))?;
        robot.disable(&mut self.hub);
        info!(robot = %id, "robot disabled");
        Ok(())
    }

    pub fn disable_all(&mut self) {
        for robot in self.robots.values_mut() {
            robot.disable(&mut self.hub);
        }
    }

    /// Take a robot out of the fleet, releasing its links and OSC port.
    pub fn remove(&mut self, id: RobotId) -> Result<RobotEntity, SwarmError> {
        let mut robot = self.robots.remove(&id).ok_or(SwarmError::UnknownRobot(id))?;
        robot.shutdown(&mut self.hub);
        info!(robot = %id, "robot removed");
        Ok(robot)
    }

    fn announce(&self, robot: RobotId, command: Command, outcome: &CommandOutcome) {
        match outcome {
            CommandOutcome::Sent => {
                self.publish(Topic::Commands, EventPayload::CommandSent { robot, command });
            }
            CommandOutcome::SendFailed(e) => self.publish(
                Topic::Commands,
                EventPayload::CommandFailed {
                    robot,
                    command,
                    details: e.to_string(),
                },
            ),
            CommandOutcome::Suppressed => {}
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(EVENT_SOURCE, payload)) {
            debug!(?topic, error = %e, "event not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swarm_link::sim::{SimBluetoothHandle, SimBluetoothLink, SimOscHandle, SimOscTransport};

    use super::*;

    struct Rig {
        fleet: Fleet,
        osc: SimOscHandle,
        radio: SimBluetoothHandle,
        link: LinkId,
    }

    fn rig() -> Rig {
        let transport = SimOscTransport::new();
        let osc = transport.handle();
        let mut fleet = Fleet::new(Box::new(transport), EventBus::default(), PollSettings::default());
        let sim = SimBluetoothLink::metabot("metabot-01");
        let radio = sim.handle();
        let link = fleet.add_bluetooth_link(Box::new(sim));
        fleet.spawn(RobotId(1), RobotProfile::named("alpha")).unwrap();
        fleet
            .set_up_device(
                RobotId(1),
                DeviceOptions {
                    bluetooth: Some(link),
                    osc: Some(OscEndpoint::new("127.0.0.1", 9001).unwrap()),
                },
            )
            .unwrap();
        Rig { fleet, osc, radio, link }
    }

    #[test]
    fn spawn_rejects_duplicate_ids() {
        let mut rig = rig();
        assert!(matches!(
            rig.fleet.spawn(RobotId(1), RobotProfile::named("again")),
            Err(SwarmError::InvalidConfig(_))
        ));
        assert_eq!(rig.fleet.len(), 1);
    }

    #[test]
    fn unknown_robot_is_reported() {
        let mut rig = rig();
        assert!(matches!(
            rig.fleet.execute_command(RobotId(42), Command::stop(), false),
            Err(SwarmError::UnknownRobot(RobotId(42)))
        ));
    }

    #[test]
    fn set_up_device_surfaces_claimed_link() {
        let mut rig = rig();
        rig.fleet.spawn(RobotId(2), RobotProfile::named("beta")).unwrap();
        let result = rig.fleet.set_up_device(
            RobotId(2),
            DeviceOptions {
                bluetooth: Some(rig.link),
                osc: None,
            },
        );
        assert!(matches!(result, Err(SwarmError::LinkUnavailable { .. })));

        rig.fleet.disable(RobotId(1)).unwrap();
        rig.fleet
            .set_up_device(
                RobotId(2),
                DeviceOptions {
                    bluetooth: Some(rig.link),
                    osc: None,
                },
            )
            .unwrap();
    }

    #[test]
    fn command_events_are_published() {
        let mut rig = rig();
        let mut commands = rig.fleet.bus().subscribe_to(Topic::Commands);

        rig.fleet
            .execute_command(RobotId(1), Command::new("dx", Some(50.0)), true)
            .unwrap();
        rig.fleet
            .execute_command(RobotId(1), Command::new("dx", Some(50.0)), true)
            .unwrap();
        rig.radio.fail_sends(true);
        rig.fleet
            .execute_command(RobotId(1), Command::new("dy", Some(10.0)), true)
            .unwrap();

        assert!(matches!(
            commands.try_recv().unwrap().payload,
            EventPayload::CommandSent { .. }
        ));
        // The suppressed duplicate produces no event.
        assert!(matches!(
            commands.try_recv().unwrap().payload,
            EventPayload::CommandFailed { .. }
        ));
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn poll_queries_are_announced() {
        let mut rig = rig();
        let mut commands = rig.fleet.bus().subscribe_to(Topic::Commands);
        rig.radio.fail_sends(true);
        rig.fleet.poll_all(Instant::now());

        let mut failed = Vec::new();
        while let Ok(event) = commands.try_recv() {
            match event.payload {
                EventPayload::CommandFailed { robot, command, .. } => {
                    assert_eq!(robot, RobotId(1));
                    failed.push(command);
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
        assert_eq!(failed.len(), 7);
        assert_eq!(failed[0], Command::query("h"));
        assert_eq!(failed[6], Command::query("version"));
    }

    #[test]
    fn non_finite_orders_never_reach_velocity() {
        let mut rig = rig();
        assert!(rig.osc.inject(9001, b"dx NaN"));
        assert!(rig.osc.inject(9001, b"dx inf"));
        assert!(rig.fleet.apply_inbound().is_empty());

        let outcome = rig
            .fleet
            .execute_command(RobotId(1), Command::new("dy", Some(f32::NAN)), false)
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::SendFailed(SwarmError::Parse(_))));
        assert_eq!(rig.fleet.kinematics(RobotId(1)).unwrap().velocity, Vec3::zero());
    }

    #[test]
    fn inbound_responses_wait_for_tick_boundary() {
        let mut rig = rig();
        let now = Instant::now();
        rig.fleet.poll_telemetry(RobotId(1), now).unwrap();

        let robot = rig.fleet.robot(RobotId(1)).unwrap();
        assert_eq!(robot.telemetry().remaining(), 7);

        assert!(rig.fleet.apply_inbound().is_empty());
        let robot = rig.fleet.robot(RobotId(1)).unwrap();
        assert_eq!(robot.telemetry().get(TelemetryField::Alt), Some(15));
    }

    #[tokio::test]
    async fn telemetry_ready_is_published() {
        let mut rig = rig();
        let mut telemetry = rig.fleet.bus().subscribe_to(Topic::Telemetry);
        let t0 = Instant::now();
        rig.fleet.poll_all(t0);
        rig.fleet.apply_inbound();

        assert!(rig.fleet.advance_polls(t0 + Duration::from_millis(500)).is_empty());
        let finished = rig.fleet.advance_polls(t0 + Duration::from_millis(1500));
        assert_eq!(finished.len(), 1);

        let event = telemetry.recv().await.unwrap();
        match event.payload {
            EventPayload::TelemetryReady { robot, telemetry } => {
                assert_eq!(robot, RobotId(1));
                assert_eq!(telemetry.fields["freq"], 2);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn silent_robot_times_out() {
        let transport = SimOscTransport::new();
        let settings = PollSettings {
            timeout: Some(Duration::from_secs(2)),
            ..PollSettings::default()
        };
        let mut fleet = Fleet::new(Box::new(transport), EventBus::default(), settings);
        // A link that knows no fields never answers a query.
        let link = fleet.add_bluetooth_link(Box::new(SimBluetoothLink::new("mute")));
        fleet.spawn(RobotId(3), RobotProfile::named("mute")).unwrap();
        fleet
            .set_up_device(RobotId(3), DeviceOptions { bluetooth: Some(link), osc: None })
            .unwrap();
        let mut alerts = fleet.bus().subscribe_to(Topic::SystemAlerts);

        let t0 = Instant::now();
        fleet.poll_telemetry(RobotId(3), t0).unwrap();
        fleet.apply_inbound();
        assert!(fleet.advance_polls(t0 + Duration::from_millis(1500)).is_empty());
        let finished = fleet.advance_polls(t0 + Duration::from_millis(2500));
        assert_eq!(finished, vec![(RobotId(3), PollStatus::TimedOut)]);
        assert!(matches!(
            alerts.try_recv().unwrap().payload,
            EventPayload::TelemetryTimeout { robot: RobotId(3) }
        ));
        assert!(!fleet.robot(RobotId(3)).unwrap().is_polling());
    }

    #[test]
    fn osc_datagrams_become_orders() {
        let mut rig = rig();
        let mut alerts = rig.fleet.bus().subscribe_to(Topic::SystemAlerts);
        assert!(rig.osc.inject(9001, b"dx 30"));
        assert!(rig.osc.inject(9001, b"dx thirty"));

        let orders = rig.fleet.apply_inbound();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].command, Command::new("dx", Some(30.0)));
        assert!(matches!(
            alerts.try_recv().unwrap().payload,
            EventPayload::LinkFault { robot: RobotId(1), .. }
        ));
    }

    #[test]
    fn frames_for_removed_robot_are_dropped() {
        let mut rig = rig();
        rig.fleet.poll_telemetry(RobotId(1), Instant::now()).unwrap();
        let removed = rig.fleet.remove(RobotId(1)).unwrap();
        assert!(!removed.is_polling());
        assert!(rig.fleet.apply_inbound().is_empty());
        assert!(!rig.osc.is_bound(9001));
        assert!(rig.fleet.hub().bluetooth.is_available(rig.link).unwrap());
    }

    #[test]
    fn snapshot_skips_unknown_ids() {
        let mut rig = rig();
        rig.fleet
            .set_velocity(RobotId(1), Vec3::new(1.0, 0.0, 0.0))
            .unwrap();
        let snapshot = rig.fleet.snapshot([RobotId(1), RobotId(7)]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&RobotId(1)].velocity, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn modify_switches_profile_and_osc() {
        let mut rig = rig();
        rig.fleet
            .modify(
                RobotId(1),
                RobotModification {
                    profile: Some(RobotProfile::named("renamed")),
                    osc: Some(OscEndpoint::new("127.0.0.1", 9002).unwrap()),
                    bluetooth: None,
                },
            )
            .unwrap();
        assert_eq!(rig.fleet.robot(RobotId(1)).unwrap().name(), "renamed");
        assert!(rig.osc.is_listening(9002));
        assert!(!rig.osc.is_bound(9001));
        assert!(!rig.fleet.switch_osc_state(RobotId(1)).unwrap());
    }

    #[test]
    fn toggle_running_is_announced() {
        let mut rig = rig();
        let mut commands = rig.fleet.bus().subscribe_to(Topic::Commands);
        rig.fleet.toggle_running(RobotId(1)).unwrap();
        match commands.try_recv().unwrap().payload {
            EventPayload::CommandSent { command, .. } => assert_eq!(command, Command::start()),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
