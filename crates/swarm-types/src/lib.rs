use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod vec3;

pub use vec3::Vec3;

/// Stable identifier of a robot in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(pub u32);

impl std::fmt::Display for RobotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "robot-{}", self.0)
    }
}

/// An immutable request sent to a robot: a command name plus an optional
/// numeric argument.
///
/// Equality is structural, which is what duplicate-command suppression relies
/// on: `dx 50` equals `dx 50`, but not `dx 40` nor the bare query `dx`.
///
/// ```
/// use swarm_types::Command;
///
/// let cmd = Command::new("dx", Some(50.0));
/// assert_eq!(cmd.encode(), b"dx 50\r\n".to_vec());
/// assert_eq!(Command::query("version").encode(), b"version\r\n".to_vec());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    argument: Option<f32>,
}

impl Command {
    /// Name of the command every robot's history is seeded with.
    pub const START: &'static str = "start";
    /// Name of the command that halts a robot's gait.
    pub const STOP: &'static str = "stop";

    pub fn new(name: impl Into<String>, argument: Option<f32>) -> Self {
        Self {
            name: name.into(),
            argument,
        }
    }

    /// A command without argument.  Sent alone, a field name asks the robot
    /// to report that field's current value.
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn start() -> Self {
        Self::query(Self::START)
    }

    pub fn stop() -> Self {
        Self::query(Self::STOP)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument(&self) -> Option<f32> {
        self.argument
    }

    /// Serialise to the robot shell's line format: `<name>[ <argument>]\r\n`.
    pub fn encode(&self) -> Vec<u8> {
        match self.argument {
            Some(arg) => format!("{} {}\r\n", self.name, arg).into_bytes(),
            None => format!("{}\r\n", self.name).into_bytes(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.argument {
            Some(arg) => write!(f, "{} {}", self.name, arg),
            None => f.write_str(&self.name),
        }
    }
}

/// Full copy of a robot's telemetry at the moment a refresh cycle completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub fields: BTreeMap<String, i64>,
    pub version: String,
}

/// A control message addressed to a supervisor as a whole rather than to one
/// of its robots, in OSC style: an address pattern plus numeric arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorMessage {
    pub address: String,
    #[serde(default)]
    pub args: Vec<f32>,
}

impl SupervisorMessage {
    pub fn new(address: impl Into<String>, args: Vec<f32>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }
}

/// Unified event wrapper for the fleet event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "swarm-robot::fleet"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the fleet event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Every tracked field was refreshed after a telemetry poll.
    TelemetryReady {
        robot: RobotId,
        telemetry: TelemetrySnapshot,
    },
    /// A telemetry poll was abandoned without a complete refresh.
    TelemetryTimeout { robot: RobotId },
    CommandSent { robot: RobotId, command: Command },
    CommandFailed {
        robot: RobotId,
        command: Command,
        details: String,
    },
    LinkFault { robot: RobotId, details: String },
    /// Delivered to the named supervisor's control hook at the next tick.
    SupervisorControl {
        supervisor: String,
        message: SupervisorMessage,
    },
}

/// Error type spanning link ownership, transport, parsing, and control faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwarmError {
    #[error("Bluetooth link '{link}' is already claimed")]
    LinkUnavailable { link: String },

    #[error("Bluetooth link #{0} is not in the pool")]
    UnknownLink(usize),

    #[error("OSC port {port} on {address} is already bound")]
    PortConflict { address: String, port: u16 },

    #[error("Transport error on {link}: {details}")]
    Transport { link: String, details: String },

    #[error("Malformed response: {0}")]
    Parse(String),

    #[error("Supervisor '{supervisor}' has a single robot; flocking averages are undefined")]
    LoneBoid { supervisor: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Telemetry refresh for {robot} timed out")]
    TelemetryTimeout { robot: RobotId },

    #[error("Unknown robot: {0}")]
    UnknownRobot(RobotId),

    #[error("Channel error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_equality_is_structural() {
        assert_eq!(Command::new("dx", Some(50.0)), Command::new("dx", Some(50.0)));
        assert_ne!(Command::new("dx", Some(50.0)), Command::new("dx", Some(40.0)));
        assert_ne!(Command::new("dx", Some(50.0)), Command::query("dx"));
        assert_ne!(Command::new("dx", Some(50.0)), Command::new("dy", Some(50.0)));
    }

    #[test]
    fn command_encoding_keeps_fractional_arguments() {
        assert_eq!(Command::new("dy", Some(-3.5)).encode(), b"dy -3.5\r\n".to_vec());
        assert_eq!(Command::start().encode(), b"start\r\n".to_vec());
    }

    #[test]
    fn command_serialization_roundtrip() {
        let cmd = Command::new("h", Some(12.0));
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn event_roundtrip() {
        let mut fields = BTreeMap::new();
        fields.insert("alt".to_string(), 42);
        let event = Event::new(
            "swarm-robot::fleet",
            EventPayload::TelemetryReady {
                robot: RobotId(3),
                telemetry: TelemetrySnapshot {
                    fields,
                    version: "1.1.1".to_string(),
                },
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        match back.payload {
            EventPayload::TelemetryReady { robot, telemetry } => {
                assert_eq!(robot, RobotId(3));
                assert_eq!(telemetry.fields["alt"], 42);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn swarm_error_display() {
        let err = SwarmError::LinkUnavailable {
            link: "metabot-07".to_string(),
        };
        assert!(err.to_string().contains("metabot-07"));

        let err = SwarmError::PortConflict {
            address: "127.0.0.1".to_string(),
            port: 9000,
        };
        assert!(err.to_string().contains("9000"));
    }

    #[test]
    fn robot_id_display() {
        assert_eq!(RobotId(7).to_string(), "robot-7");
    }
}
