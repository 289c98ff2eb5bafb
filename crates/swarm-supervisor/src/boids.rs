//! [`BoidSupervisor`] – flocking over the supervised robots.
//!
//! Each tick, for every boid `b`, four contributions are computed from the
//! start-of-tick snapshot:
//!
//! | Rule | Contribution |
//! |---|---|
//! | Cohesion (v1) | `(mean position of the others − b.position) / 10` |
//! | Separation (v2) | `Σ −(other.position − b.position)` over others closer than 100 |
//! | Alignment (v3) | `(mean velocity of the others − b.velocity) / 8` |
//! | Bounding (v4) | `±10` on each axis beyond `bounds − 25`, pointing inward |
//!
//! The new velocity is `b.velocity + v1 + v3 + v4`.  Separation is computed
//! but only added when [`BoidRules::apply_separation`] is set.  A herd target,
//! when set, adds [`BoidSupervisor::tend_to_place`] as well.
//!
//! A boid with no flock-mates has no mean to move toward: cohesion and
//! alignment report [`SwarmError::LoneBoid`] and contribute zero, while
//! bounding still applies.
//!
//! Flocking is gated by a `free_boids` flag.  It starts set, is cleared by
//! [`BoidSupervisor::pause`], and any control message sets it again.

use swarm_robot::Kinematics;
use swarm_types::{RobotId, SupervisorMessage, SwarmError, Vec3};
use tracing::{debug, info};

use crate::kind::SupervisorKind;
use crate::supervisor::{Snapshot, Supervisor, SupervisorCore, VelocityUpdate};

const COHESION_DIVISOR: f32 = 10.0;
const ALIGNMENT_DIVISOR: f32 = 8.0;
const SEPARATION_RADIUS: f32 = 100.0;
const BOUNDING_MARGIN: f32 = 25.0;
const BOUNDING_PUSH: f32 = 10.0;
const HERD_DIVISOR: f32 = 100.0;

/// Control address that sets (three args) or clears (no args) the herd
/// target.
pub const HERD_ADDRESS: &str = "/herd";

/// Which optional rules take part in the velocity update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoidRules {
    pub apply_separation: bool,
}

#[derive(Debug, Clone)]
pub struct BoidSupervisor {
    core: SupervisorCore,
    rules: BoidRules,
    free_boids: bool,
    herd_target: Option<Vec3>,
}

type Member<'a> = (RobotId, &'a Kinematics);

impl BoidSupervisor {
    pub fn new(name: impl Into<String>, bounds: Vec3) -> Self {
        Self::with_rules(name, bounds, BoidRules::default())
    }

    pub fn with_rules(name: impl Into<String>, bounds: Vec3, rules: BoidRules) -> Self {
        Self {
            core: SupervisorCore::new(name, bounds),
            rules,
            free_boids: true,
            herd_target: None,
        }
    }

    pub fn rules(&self) -> BoidRules {
        self.rules
    }

    pub fn is_free(&self) -> bool {
        self.free_boids
    }

    /// Stop flocking until the next control message.
    pub fn pause(&mut self) {
        self.free_boids = false;
        info!(supervisor = self.core.name(), "flocking paused");
    }

    pub fn herd_target(&self) -> Option<Vec3> {
        self.herd_target
    }

    pub fn set_herd_target(&mut self, target: Option<Vec3>) {
        self.herd_target = target;
    }

    /// Steering toward `target`: `(target − b.position) / 100`.
    pub fn tend_to_place(boid: &Kinematics, target: Vec3) -> Vec3 {
        (target - boid.position) / HERD_DIVISOR
    }

    /// Mean of `value` over every member except `boid`.
    fn mean_of_others<F>(&self, boid: RobotId, members: &[Member<'_>], value: F) -> Result<Vec3, SwarmError>
    where
        F: Fn(&Kinematics) -> Vec3,
    {
        let others: Vec<Vec3> = members
            .iter()
            .filter(|(id, _)| *id != boid)
            .map(|(_, kinematics)| value(kinematics))
            .collect();
        if others.is_empty() {
            return Err(SwarmError::LoneBoid {
                supervisor: self.core.name().to_string(),
            });
        }
        let count = others.len() as f32;
        Ok(others.into_iter().sum::<Vec3>() / count)
    }

    fn cohesion(&self, boid: Member<'_>, members: &[Member<'_>]) -> Result<Vec3, SwarmError> {
        let center = self.mean_of_others(boid.0, members, |k| k.position)?;
        Ok((center - boid.1.position) / COHESION_DIVISOR)
    }

    fn separation(&self, boid: Member<'_>, members: &[Member<'_>]) -> Vec3 {
        members
            .iter()
            .filter(|(id, _)| *id != boid.0)
            .filter(|(_, other)| other.position.distance(boid.1.position) < SEPARATION_RADIUS)
            .map(|(_, other)| -(other.position - boid.1.position))
            .sum()
    }

    fn alignment(&self, boid: Member<'_>, members: &[Member<'_>]) -> Result<Vec3, SwarmError> {
        let heading = self.mean_of_others(boid.0, members, |k| k.velocity)?;
        Ok((heading - boid.1.velocity) / ALIGNMENT_DIVISOR)
    }

    fn bounding(&self, boid: &Kinematics) -> Vec3 {
        let limit = self.core.bounds() - Vec3::splat(BOUNDING_MARGIN);
        let push = |position: f32, limit: f32| {
            if position < -limit {
                BOUNDING_PUSH
            } else if position > limit {
                -BOUNDING_PUSH
            } else {
                0.0
            }
        };
        Vec3::new(
            push(boid.position.x, limit.x),
            push(boid.position.y, limit.y),
            push(boid.position.z, limit.z),
        )
    }

    fn or_zero(result: Result<Vec3, SwarmError>) -> Vec3 {
        result.unwrap_or_else(|e| {
            debug!(error = %e, "flock rule skipped");
            Vec3::zero()
        })
    }
}

impl Supervisor for BoidSupervisor {
    fn core(&self) -> &SupervisorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SupervisorCore {
        &mut self.core
    }

    fn kind(&self) -> SupervisorKind {
        SupervisorKind::Boids
    }

    fn step(&self, snapshot: &Snapshot) -> Vec<VelocityUpdate> {
        if !self.free_boids {
            return Vec::new();
        }
        let members = self.core.members(snapshot);
        members
            .iter()
            .map(|&boid| {
                let v1 = Self::or_zero(self.cohesion(boid, &members));
                let v3 = Self::or_zero(self.alignment(boid, &members));
                let v4 = self.bounding(boid.1);

                let mut velocity = boid.1.velocity + v1 + v3 + v4;
                if self.rules.apply_separation {
                    velocity += self.separation(boid, &members);
                }
                if let Some(target) = self.herd_target {
                    velocity += Self::tend_to_place(boid.1, target);
                }
                (boid.0, velocity)
            })
            .collect()
    }

    fn on_osc_message(&mut self, message: &SupervisorMessage) {
        if message.address == HERD_ADDRESS {
            self.herd_target = match message.args.as_slice() {
                [x, y, z] => Some(Vec3::new(*x, *y, *z)),
                _ => None,
            };
            debug!(supervisor = self.core.name(), target = ?self.herd_target, "herd target updated");
        }
        if !self.free_boids {
            info!(supervisor = self.core.name(), "flocking resumed");
        }
        self.free_boids = true;
    }
}
