//! `swarm-robot` – robot entities and the fleet that owns them.
//!
//! # Modules
//!
//! - [`history`] – [`CommandHistory`]: bounded log of executed commands used
//!   for duplicate suppression.
//! - [`telemetry`] – [`Telemetry`]: named telemetry fields plus the explicit
//!   refresh-cycle state machine (`Idle → Polling → Ready`).
//! - [`poll`] – [`TelemetryPoll`]: deadline-driven completion check for an
//!   outstanding telemetry refresh.
//! - [`entity`] – [`RobotEntity`]: identity, kinematic state, telemetry,
//!   history, and device channel of one robot.
//! - [`order`] – [`EntityOrder`]: a command addressed to one robot, decoded
//!   from an inbound OSC datagram.
//! - [`fleet`] – [`Fleet`]: owner of every entity and of the shared link
//!   resources; applies buffered inbound traffic at tick boundaries.

pub mod entity;
pub mod fleet;
pub mod history;
pub mod order;
pub mod poll;
pub mod telemetry;

pub use entity::{CommandOutcome, Kinematics, RobotEntity, RobotProfile, VELOCITY_FACTOR};
pub use fleet::{DeviceOptions, Fleet, RobotModification};
pub use history::CommandHistory;
pub use order::EntityOrder;
pub use poll::{PollSettings, PollStatus, TelemetryPoll};
pub use telemetry::{RefreshState, Telemetry, TelemetryField};
