//! Supervisor variants selectable from configuration.

use serde::{Deserialize, Serialize};
use swarm_types::Vec3;

use crate::boids::BoidSupervisor;
use crate::simple::SimpleSupervisor;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    Simple,
    Boids,
}

impl std::fmt::Display for SupervisorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorKind::Simple => f.write_str("simple"),
            SupervisorKind::Boids => f.write_str("boids"),
        }
    }
}

/// Build an empty supervisor of the given kind.
pub fn build_supervisor(kind: SupervisorKind, name: impl Into<String>, bounds: Vec3) -> Box<dyn Supervisor> {
    match kind {
        SupervisorKind::Simple => Box::new(SimpleSupervisor::new(name, bounds)),
        SupervisorKind::Boids => Box::new(BoidSupervisor::new(name, bounds)),
    }
}
