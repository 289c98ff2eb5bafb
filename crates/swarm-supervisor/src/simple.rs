//! [`SimpleSupervisor`] – bounce robots off the walls of the bounding volume.

use swarm_types::Vec3;

use crate::kind::SupervisorKind;
use crate::supervisor::{Snapshot, Supervisor, SupervisorCore, VelocityUpdate};

/// Negates each velocity component whose axis is out of bounds.  Robots do
/// not interact.
#[derive(Debug, Clone)]
pub struct SimpleSupervisor {
    core: SupervisorCore,
}

impl SimpleSupervisor {
    pub fn new(name: impl Into<String>, bounds: Vec3) -> Self {
        Self {
            core: SupervisorCore::new(name, bounds),
        }
    }
}

impl Supervisor for SimpleSupervisor {
    fn core(&self) -> &SupervisorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SupervisorCore {
        &mut self.core
    }

    fn kind(&self) -> SupervisorKind {
        SupervisorKind::Simple
    }

    fn step(&self, snapshot: &Snapshot) -> Vec<VelocityUpdate> {
        self.core
            .members(snapshot)
            .into_iter()
            .filter_map(|(id, kinematics)| {
                let [x, y, z] = self.core.out_of_bounds(kinematics.position);
                if !(x || y || z) {
                    return None;
                }
                let v = kinematics.velocity;
                let bounced = Vec3::new(
                    if x { -v.x } else { v.x },
                    if y { -v.y } else { v.y },
                    if z { -v.z } else { v.z },
                );
                Some((id, bounced))
            })
            .collect()
    }
}
