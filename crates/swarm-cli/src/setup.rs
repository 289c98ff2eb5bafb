//! Builds a simulated fleet and its supervisors from a [`Config`].

use swarm_link::sim::{SimBluetoothLink, SimOscTransport};
use swarm_link::{EventBus, OscEndpoint};
use swarm_robot::{DeviceOptions, Fleet};
use swarm_supervisor::{SupervisorRegistry, build_supervisor};
use swarm_types::{RobotId, SwarmError};
use tracing::info;

use crate::config::Config;

pub struct Swarm {
    pub fleet: Fleet,
    pub registry: SupervisorRegistry,
}

/// Spawn every configured robot on simulated links, then register the
/// supervisors.  `config` must already be validated.
pub fn build(config: &Config, bus: &EventBus) -> Result<Swarm, SwarmError> {
    let mut fleet = Fleet::new(
        Box::new(SimOscTransport::new()),
        bus.clone(),
        config.poll_settings(),
    );
    for name in &config.bluetooth_links {
        fleet.add_bluetooth_link(Box::new(SimBluetoothLink::metabot(name.clone())));
    }

    for robot in &config.robots {
        let id = RobotId(robot.id);
        fleet.spawn(id, robot.profile.clone())?;

        let bluetooth = match &robot.bluetooth {
            Some(name) => Some(fleet.find_bluetooth_link(name).ok_or_else(|| {
                SwarmError::InvalidConfig(format!("unknown bluetooth link '{name}'"))
            })?),
            None => None,
        };
        let osc = robot
            .osc
            .as_ref()
            .map(|osc| OscEndpoint::new(osc.address.clone(), osc.port))
            .transpose()?;
        fleet.set_up_device(id, DeviceOptions { bluetooth, osc })?;
    }

    let mut registry = SupervisorRegistry::new(bus);
    for sup in &config.supervisors {
        let mut supervisor = build_supervisor(sup.kind, sup.name.clone(), sup.bounds());
        for id in &sup.robots {
            supervisor.add_robot(RobotId(*id));
        }
        registry.register(supervisor)?;
    }

    info!(
        robots = fleet.len(),
        supervisors = registry.len(),
        "swarm assembled"
    );
    Ok(Swarm { fleet, registry })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn demo_config_builds_linked_fleet() {
        let bus = EventBus::default();
        let swarm = build(&Config::demo(), &bus).expect("build");

        assert_eq!(swarm.fleet.len(), 4);
        assert_eq!(swarm.registry.len(), 2);
        let robot = swarm.fleet.robot(RobotId(3)).unwrap();
        assert!(robot.channel().bluetooth_link().is_some());
        assert!(robot.channel().is_osc_listening());
        assert_eq!(
            swarm.registry.supervisor_for(RobotId(3)).unwrap().name(),
            "arena"
        );
    }

    #[test]
    fn built_swarm_ticks() {
        let bus = EventBus::default();
        let mut swarm = build(&Config::demo(), &bus).expect("build");
        swarm.fleet.poll_all(Instant::now());
        let report = swarm.registry.tick(&mut swarm.fleet, Instant::now());
        // Two flocking robots at the origin still receive a velocity each.
        assert_eq!(report.velocity_updates, 2);
    }

    #[test]
    fn robot_without_links_is_allowed() {
        let mut cfg = Config::demo();
        cfg.robots[0].bluetooth = None;
        cfg.robots[0].osc = None;
        let swarm = build(&cfg, &EventBus::default()).expect("build");
        assert!(swarm.fleet.robot(RobotId(1)).unwrap().channel().bluetooth_link().is_none());
    }
}
