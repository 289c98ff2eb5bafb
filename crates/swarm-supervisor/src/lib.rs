//! `swarm-supervisor` – per-tick velocity control for groups of robots.
//!
//! # Modules
//!
//! - [`supervisor`] – the [`Supervisor`] contract shared by every variant,
//!   plus [`SupervisorCore`] (name, robot set, bounding volume).
//! - [`simple`] – [`SimpleSupervisor`]: bounces robots off the bounding
//!   volume.
//! - [`boids`] – [`BoidSupervisor`]: flocking (cohesion, alignment,
//!   bounding, optional separation and herding).
//! - [`kind`] – [`SupervisorKind`] and the configuration-driven factory.
//! - [`registry`] – [`SupervisorRegistry`]: runs the tick for every
//!   supervisor against a [`Fleet`][swarm_robot::Fleet].

pub mod boids;
pub mod kind;
pub mod registry;
pub mod simple;
pub mod supervisor;

pub use boids::{BoidRules, BoidSupervisor};
pub use kind::{SupervisorKind, build_supervisor};
pub use registry::{ControlHandle, SupervisorRegistry, TickReport};
pub use simple::SimpleSupervisor;
pub use supervisor::{Snapshot, Supervisor, SupervisorCore, VelocityUpdate};
