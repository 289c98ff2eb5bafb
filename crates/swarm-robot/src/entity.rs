//! [`RobotEntity`] – one robot: identity, kinematics, telemetry, and links.
//!
//! The entity never integrates its own position.  Supervisors write velocity
//! once per tick and an external physics consumer writes position back.
//!
//! # Command execution
//!
//! [`RobotEntity::execute_command`] is the single path for outbound traffic.
//! With duplicate suppression enabled, a command structurally equal to the
//! head of the [`CommandHistory`] is dropped before it reaches the link.
//! Send failures are logged and reported as [`CommandOutcome::SendFailed`];
//! they never propagate as errors, and neither history nor velocity changes.
//!
//! Movement commands carry a kinematic side effect:
//!
//! | Command | Effect |
//! |---|---|
//! | `dx <v>` | `velocity.x = v / VELOCITY_FACTOR` |
//! | `dy <v>` | `velocity.z = v / VELOCITY_FACTOR` |

use std::time::Instant;

use serde::{Deserialize, Serialize};
use swarm_link::{BluetoothOptions, DeviceChannel, LinkHub, OscEndpoint};
use swarm_types::{Command, RobotId, SwarmError, Vec3};
use tracing::{debug, info, warn};

use crate::history::CommandHistory;
use crate::poll::{PollSettings, PollStatus, TelemetryPoll};
use crate::telemetry::{Telemetry, TelemetryField};

/// Divisor between a `dx`/`dy` argument and the resulting velocity component.
pub const VELOCITY_FACTOR: f32 = 10.0;

/// Longest unterminated Bluetooth response kept while waiting for `\n`.
pub const MAX_LINE_BYTES: usize = 256;

/// Cosmetic description of a robot's body.  Not read by control logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    pub name: String,
    #[serde(default = "default_size")]
    pub size: f32,
    #[serde(default = "default_circumference")]
    pub circumference: f32,
    #[serde(default = "default_legs")]
    pub legs: u8,
}

fn default_size() -> f32 {
    1.0
}

fn default_circumference() -> f32 {
    1.0
}

fn default_legs() -> u8 {
    4
}

impl RobotProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: default_size(),
            circumference: default_circumference(),
            legs: default_legs(),
        }
    }
}

/// Position and velocity of a robot at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// What [`RobotEntity::execute_command`] did with a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Written to the link and recorded in history.
    Sent,
    /// Identical to the previous command; nothing was sent or recorded.
    Suppressed,
    /// The link rejected the write.  Nothing was recorded.
    SendFailed(SwarmError),
}

/// Split a `key=value` response line into its parts.
///
/// The trailing line terminator is stripped.  Surrounding whitespace around
/// the key and the value is ignored.
///
/// # Errors
///
/// [`SwarmError::Parse`] when there is no `=` or the key is empty.
pub fn parse_response(raw: &str) -> Result<(&str, &str), SwarmError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| SwarmError::Parse(format!("expected key=value, got {line:?}")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(SwarmError::Parse(format!("missing key in {line:?}")));
    }
    Ok((key, value.trim()))
}

#[derive(Debug)]
pub struct RobotEntity {
    id: RobotId,
    profile: RobotProfile,
    kinematics: Kinematics,
    history: CommandHistory,
    telemetry: Telemetry,
    channel: DeviceChannel,
    started: bool,
    poll: Option<TelemetryPoll>,
    /// Bluetooth bytes received since the last complete line.
    line_buffer: Vec<u8>,
}

impl RobotEntity {
    pub fn new(id: RobotId, profile: RobotProfile) -> Self {
        Self {
            id,
            profile,
            kinematics: Kinematics::default(),
            history: CommandHistory::new(),
            telemetry: Telemetry::new(),
            channel: DeviceChannel::new(id),
            started: false,
            poll: None,
            line_buffer: Vec::new(),
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn profile(&self) -> &RobotProfile {
        &self.profile
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn kinematics(&self) -> Kinematics {
        self.kinematics
    }

    pub fn position(&self) -> Vec3 {
        self.kinematics.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.kinematics.velocity
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.kinematics.position = position;
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.kinematics.velocity = velocity;
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut DeviceChannel {
        &mut self.channel
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// `true` while a telemetry poll is outstanding.
    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Send `command` to the robot and record it.
    ///
    /// With `verify_dedup`, a command equal to the most recent one is
    /// suppressed.  See the module docs for kinematic side effects.
    ///
    /// A command whose argument is NaN or infinite is refused before it
    /// reaches the link and reported as [`CommandOutcome::SendFailed`].
    pub fn execute_command(
        &mut self,
        hub: &mut LinkHub,
        command: Command,
        verify_dedup: bool,
    ) -> CommandOutcome {
        if let Some(value) = command.argument()
            && !value.is_finite()
        {
            let error = SwarmError::Parse(format!("non-finite argument in '{command}'"));
            warn!(robot = %self.id, error = %error, "command refused");
            return CommandOutcome::SendFailed(error);
        }
        if verify_dedup && self.history.head() == &command {
            debug!(robot = %self.id, command = %command, "duplicate command suppressed");
            return CommandOutcome::Suppressed;
        }

        if let Err(e) = self.channel.send(hub, &command.encode()) {
            warn!(robot = %self.id, command = %command, error = %e, "command send failed");
            return CommandOutcome::SendFailed(e);
        }

        match (command.name(), command.argument()) {
            ("dx", Some(value)) => self.kinematics.velocity.x = value / VELOCITY_FACTOR,
            ("dy", Some(value)) => self.kinematics.velocity.z = value / VELOCITY_FACTOR,
            _ => {}
        }
        debug!(robot = %self.id, command = %command, "command sent");
        self.history.add(command);
        CommandOutcome::Sent
    }

    /// Send `stop` when running, `start` otherwise.  Never suppressed.
    ///
    /// The running flag only flips when the send succeeds.
    pub fn toggle_running(&mut self, hub: &mut LinkHub) -> CommandOutcome {
        let command = if self.started {
            Command::stop()
        } else {
            Command::start()
        };
        let outcome = self.execute_command(hub, command, false);
        if outcome == CommandOutcome::Sent {
            self.started = !self.started;
            info!(robot = %self.id, started = self.started, "gait toggled");
        }
        outcome
    }

    /// Operator edit of a numeric field: write it locally, then send the
    /// matching command with duplicate suppression.
    ///
    /// # Errors
    ///
    /// [`SwarmError::InvalidConfig`] for the `version` field, which is
    /// read-only.
    pub fn modify_basic_value(
        &mut self,
        hub: &mut LinkHub,
        field: TelemetryField,
        value: i64,
    ) -> Result<CommandOutcome, SwarmError> {
        if field == TelemetryField::Version {
            return Err(SwarmError::InvalidConfig(
                "firmware version cannot be modified".to_string(),
            ));
        }
        self.telemetry.set(field, &value.to_string())?;
        Ok(self.execute_command(hub, Command::new(field.key(), Some(value as f32)), true))
    }

    /// Apply a single `key=value` response to telemetry.
    ///
    /// Returns `Ok(false)` when no refresh is pending; the response is
    /// ignored in that case.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Parse`] for a malformed line, an unknown key, or a
    /// non-integer numeric value.  Telemetry is left untouched.
    pub fn update_from_response(&mut self, raw: &str) -> Result<bool, SwarmError> {
        if !self.telemetry.is_pending() {
            debug!(robot = %self.id, response = raw.trim_end(), "response outside refresh ignored");
            return Ok(false);
        }
        let (key, value) = parse_response(raw)?;
        let field = TelemetryField::from_key(key)
            .ok_or_else(|| SwarmError::Parse(format!("unknown telemetry key '{key}'")))?;
        self.telemetry.record(field, value)
    }

    /// Feed raw Bluetooth bytes.  Complete lines are applied with
    /// [`update_from_response`][Self::update_from_response]; a trailing
    /// partial line is kept for the next call.  Returns the number of lines
    /// that updated telemetry.
    ///
    /// Lines are framed on raw bytes and decoded only once complete, so a
    /// character split across frames survives.  A partial line longer than
    /// [`MAX_LINE_BYTES`] is discarded.
    pub fn ingest_bluetooth(&mut self, bytes: &[u8]) -> usize {
        self.line_buffer.extend_from_slice(bytes);

        let mut applied = 0;
        while let Some(end) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line_buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            if line.trim().is_empty() {
                continue;
            }
            match self.update_from_response(&line) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => warn!(robot = %self.id, error = %e, "dropping malformed response"),
            }
        }

        if self.line_buffer.len() > MAX_LINE_BYTES {
            warn!(
                robot = %self.id,
                buffered = self.line_buffer.len(),
                "unterminated response discarded"
            );
            self.line_buffer.clear();
        }
        applied
    }

    /// Start a telemetry refresh: query every tracked field (no duplicate
    /// suppression) and arm a completion poll.
    ///
    /// A poll already in progress is replaced.  Returns each query with
    /// its outcome, in send order.
    pub fn poll_telemetry(
        &mut self,
        hub: &mut LinkHub,
        settings: PollSettings,
        now: Instant,
    ) -> Vec<(Command, CommandOutcome)> {
        self.telemetry.begin_refresh();
        let outcomes = TelemetryField::QUERY_ORDER
            .into_iter()
            .map(|field| {
                let query = Command::query(field.key());
                let outcome = self.execute_command(hub, query.clone(), false);
                (query, outcome)
            })
            .collect();
        self.poll = Some(TelemetryPoll::start(settings, now));
        debug!(robot = %self.id, "telemetry refresh requested");
        outcomes
    }

    /// Advance the outstanding poll, if any.  The poll is dropped once it
    /// completes or times out.
    pub fn check_poll(&mut self, now: Instant) -> Option<PollStatus> {
        let poll = self.poll.as_mut()?;
        let status = poll.check(now, &mut self.telemetry);
        if status != PollStatus::Pending {
            self.poll = None;
        }
        Some(status)
    }

    /// Apply a partial reconfiguration.
    pub fn modify(
        &mut self,
        hub: &mut LinkHub,
        profile: Option<RobotProfile>,
        osc: Option<OscEndpoint>,
        bluetooth: Option<BluetoothOptions>,
    ) -> Result<(), SwarmError> {
        if let Some(profile) = profile {
            info!(robot = %self.id, from = %self.profile.name, to = %profile.name, "profile updated");
            self.profile = profile;
        }
        if osc.is_some() || bluetooth.is_some() {
            self.channel.modify(hub, osc, bluetooth)?;
        }
        Ok(())
    }

    /// Cancel any outstanding poll and release both links.
    pub fn disable(&mut self, hub: &mut LinkHub) {
        self.cancel_poll();
        self.channel.disable(hub);
    }

    /// Like [`disable`][Self::disable], and also unbinds the OSC port.
    pub fn shutdown(&mut self, hub: &mut LinkHub) {
        self.cancel_poll();
        self.channel.shutdown(hub);
    }

    fn cancel_poll(&mut self) {
        if self.poll.take().is_some() {
            debug!(robot = %self.id, "telemetry poll cancelled");
        }
        self.telemetry.cancel_refresh();
        self.line_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swarm_link::sim::{SimBluetoothHandle, SimBluetoothLink, SimOscTransport};

    use super::*;

    fn setup() -> (LinkHub, RobotEntity, SimBluetoothHandle) {
        let mut hub = LinkHub::new(Box::new(SimOscTransport::new()));
        let sim = SimBluetoothLink::metabot("metabot-01");
        let radio = sim.handle();
        let link = hub.bluetooth.add(Box::new(sim));
        let mut robot = RobotEntity::new(RobotId(1), RobotProfile::named("alpha"));
        robot.channel_mut().assign_bluetooth(&mut hub, link).unwrap();
        (hub, robot, radio)
    }

    /// Move everything the simulated link answered into the entity.
    fn deliver(hub: &mut LinkHub, robot: &mut RobotEntity) {
        for frame in hub.inbound.drain() {
            robot.ingest_bluetooth(&frame.bytes);
        }
    }

    #[test]
    fn duplicate_command_is_sent_once() {
        let (mut hub, mut robot, radio) = setup();
        let dx = Command::new("dx", Some(50.0));

        assert_eq!(robot.execute_command(&mut hub, dx.clone(), true), CommandOutcome::Sent);
        assert_eq!(robot.execute_command(&mut hub, dx, true), CommandOutcome::Suppressed);
        assert_eq!(radio.sent_lines(), vec!["dx 50"]);
        assert_eq!(robot.history().len(), 2);
    }

    #[test]
    fn dedup_disabled_sends_every_time() {
        let (mut hub, mut robot, radio) = setup();
        let dx = Command::new("dx", Some(50.0));
        robot.execute_command(&mut hub, dx.clone(), false);
        robot.execute_command(&mut hub, dx, false);
        assert_eq!(radio.sent().len(), 2);
        assert_eq!(robot.history().len(), 3);
    }

    #[test]
    fn movement_commands_set_velocity() {
        let (mut hub, mut robot, _) = setup();
        robot.execute_command(&mut hub, Command::new("dx", Some(50.0)), true);
        assert_eq!(robot.velocity().x, 5.0);

        robot.execute_command(&mut hub, Command::new("dy", Some(-30.0)), true);
        assert_eq!(robot.velocity().z, -3.0);
        assert_eq!(robot.velocity().y, 0.0);
    }

    #[test]
    fn other_commands_have_no_kinematic_effect() {
        let (mut hub, mut robot, radio) = setup();
        robot.execute_command(&mut hub, Command::new("h", Some(20.0)), true);
        assert_eq!(robot.velocity(), Vec3::zero());
        assert_eq!(radio.sent_lines(), vec!["h 20"]);
    }

    #[test]
    fn send_failure_is_absorbed() {
        let (mut hub, mut robot, radio) = setup();
        radio.fail_sends(true);

        let outcome = robot.execute_command(&mut hub, Command::new("dx", Some(50.0)), true);
        assert!(matches!(outcome, CommandOutcome::SendFailed(SwarmError::Transport { .. })));
        assert_eq!(robot.velocity(), Vec3::zero());
        assert_eq!(robot.history().len(), 1);
        assert_eq!(robot.history().head(), &Command::start());
    }

    #[test]
    fn non_finite_argument_is_refused() {
        let (mut hub, mut robot, radio) = setup();
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let outcome = robot.execute_command(&mut hub, Command::new("dx", Some(value)), false);
            assert!(matches!(outcome, CommandOutcome::SendFailed(SwarmError::Parse(_))));
        }
        assert!(radio.sent().is_empty());
        assert_eq!(robot.velocity(), Vec3::zero());
        assert_eq!(robot.history().len(), 1);
    }

    #[test]
    fn command_without_link_fails_softly() {
        let mut hub = LinkHub::new(Box::new(SimOscTransport::new()));
        let mut robot = RobotEntity::new(RobotId(9), RobotProfile::named("loose"));
        let outcome = robot.execute_command(&mut hub, Command::stop(), false);
        assert!(matches!(outcome, CommandOutcome::SendFailed(_)));
    }

    #[test]
    fn parse_response_strips_terminator() {
        assert_eq!(parse_response("alt=15\r\n").unwrap(), ("alt", "15"));
        assert_eq!(parse_response("version=1.1.1\n").unwrap(), ("version", "1.1.1"));
        assert!(parse_response("garbage\r\n").is_err());
        assert!(parse_response("=3").is_err());
    }

    #[test]
    fn responses_outside_refresh_are_ignored() {
        let (_, mut robot, _) = setup();
        assert!(!robot.update_from_response("h=40\r\n").unwrap());
        assert_eq!(robot.telemetry().get(TelemetryField::H), Some(0));
    }

    #[test]
    fn unknown_key_is_parse_error() {
        let (mut hub, mut robot, _) = setup();
        robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());
        hub.inbound.drain();
        assert!(matches!(
            robot.update_from_response("battery=90\r\n"),
            Err(SwarmError::Parse(_))
        ));
        assert_eq!(robot.telemetry().remaining(), Telemetry::EXPECTED_WRITES);
    }

    #[test]
    fn poll_queries_every_field_and_completes() {
        let (mut hub, mut robot, radio) = setup();
        let t0 = Instant::now();
        robot.poll_telemetry(&mut hub, PollSettings::default(), t0);

        assert_eq!(
            radio.sent_lines(),
            vec!["h", "r", "alt", "freq", "dx", "dy", "version"]
        );
        deliver(&mut hub, &mut robot);
        assert_eq!(robot.check_poll(t0 + Duration::from_millis(100)), Some(PollStatus::Pending));

        match robot.check_poll(t0 + Duration::from_millis(1500)) {
            Some(PollStatus::Ready(snapshot)) => {
                assert_eq!(snapshot.fields["alt"], 15);
                assert_eq!(snapshot.version, "1.1.1");
            }
            other => panic!("expected ready telemetry, got {other:?}"),
        }
        assert!(!robot.is_polling());
        assert_eq!(robot.check_poll(t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn poll_reports_every_query_outcome() {
        let (mut hub, mut robot, radio) = setup();
        radio.fail_sends(true);
        let outcomes = robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());
        assert_eq!(outcomes.len(), 7);
        assert_eq!(outcomes[0].0, Command::query("h"));
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, CommandOutcome::SendFailed(_))));
    }

    #[test]
    fn repeated_poll_is_not_suppressed() {
        let (mut hub, mut robot, radio) = setup();
        let now = Instant::now();
        robot.poll_telemetry(&mut hub, PollSettings::default(), now);
        robot.poll_telemetry(&mut hub, PollSettings::default(), now);
        assert_eq!(radio.sent().len(), 14);
    }

    #[test]
    fn line_framing_handles_split_frames() {
        let (mut hub, mut robot, _) = setup();
        robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());
        hub.inbound.drain();

        assert_eq!(robot.ingest_bluetooth(b"h=4"), 0);
        assert_eq!(robot.ingest_bluetooth(b"2\r\nr=7\r\nalt"), 2);
        assert_eq!(robot.telemetry().get(TelemetryField::H), Some(42));
        assert_eq!(robot.telemetry().get(TelemetryField::R), Some(7));
        assert_eq!(robot.telemetry().remaining(), 5);
    }

    #[test]
    fn line_framing_keeps_characters_split_across_frames() {
        let (mut hub, mut robot, _) = setup();
        robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());
        hub.inbound.drain();

        // "β" is 0xCE 0xB2; the frame boundary falls between the two bytes.
        assert_eq!(robot.ingest_bluetooth(b"version=2.0-\xCE"), 0);
        assert_eq!(robot.ingest_bluetooth(b"\xB2\r\n"), 1);
        assert_eq!(robot.telemetry().version(), "2.0-β");
    }

    #[test]
    fn unterminated_junk_is_capped() {
        let (mut hub, mut robot, _) = setup();
        robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());
        hub.inbound.drain();

        let junk = vec![b'x'; MAX_LINE_BYTES + 1];
        assert_eq!(robot.ingest_bluetooth(&junk), 0);
        // The junk was dropped, so the next line parses on its own.
        assert_eq!(robot.ingest_bluetooth(b"h=42\r\n"), 1);
        assert_eq!(robot.telemetry().get(TelemetryField::H), Some(42));
    }

    #[test]
    fn malformed_line_does_not_block_following_lines() {
        let (mut hub, mut robot, _) = setup();
        robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());
        hub.inbound.drain();

        assert_eq!(robot.ingest_bluetooth(b"h=high\r\nr=3\r\n"), 1);
        assert_eq!(robot.telemetry().get(TelemetryField::H), Some(0));
        assert_eq!(robot.telemetry().get(TelemetryField::R), Some(3));
    }

    #[test]
    fn disable_cancels_poll_and_releases_link() {
        let (mut hub, mut robot, radio) = setup();
        let link = robot.channel().bluetooth_link().unwrap();
        robot.poll_telemetry(&mut hub, PollSettings::default(), Instant::now());

        robot.disable(&mut hub);
        assert!(!robot.is_polling());
        assert!(!robot.telemetry().is_pending());
        assert!(hub.bluetooth.is_available(link).unwrap());
        assert!(!radio.has_listener());
    }

    #[test]
    fn toggle_running_alternates_start_and_stop() {
        let (mut hub, mut robot, radio) = setup();
        assert_eq!(robot.toggle_running(&mut hub), CommandOutcome::Sent);
        assert!(robot.is_started());
        assert_eq!(robot.toggle_running(&mut hub), CommandOutcome::Sent);
        assert!(!robot.is_started());
        assert_eq!(radio.sent_lines(), vec!["start", "stop"]);
    }

    #[test]
    fn toggle_running_keeps_state_on_failure() {
        let (mut hub, mut robot, radio) = setup();
        radio.fail_sends(true);
        assert!(matches!(robot.toggle_running(&mut hub), CommandOutcome::SendFailed(_)));
        assert!(!robot.is_started());
    }

    #[test]
    fn modify_basic_value_writes_locally_and_sends() {
        let (mut hub, mut robot, radio) = setup();
        let outcome = robot
            .modify_basic_value(&mut hub, TelemetryField::Alt, 30)
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Sent);
        assert_eq!(robot.telemetry().get(TelemetryField::Alt), Some(30));
        assert_eq!(radio.field("alt").as_deref(), Some("30"));

        let again = robot
            .modify_basic_value(&mut hub, TelemetryField::Alt, 30)
            .unwrap();
        assert_eq!(again, CommandOutcome::Suppressed);
        assert!(robot
            .modify_basic_value(&mut hub, TelemetryField::Version, 2)
            .is_err());
    }

    #[test]
    fn modify_updates_profile_and_links() {
        let (mut hub, mut robot, _) = setup();
        let old = robot.channel().bluetooth_link().unwrap();
        robot
            .modify(
                &mut hub,
                Some(RobotProfile::named("beta")),
                Some(OscEndpoint::new("127.0.0.1", 9100).unwrap()),
                Some(BluetoothOptions::None),
            )
            .unwrap();
        assert_eq!(robot.name(), "beta");
        assert!(robot.channel().is_osc_listening());
        assert!(hub.bluetooth.is_available(old).unwrap());
    }
}
