//! `swarm` – runs a supervised robot fleet at a fixed tick cadence.
//!
//! 1. Loads `~/.swarm/config.toml` (or `$SWARM_CONFIG`), writing a demo
//!    fleet there on first run.
//! 2. Builds the fleet on simulated Bluetooth/OSC transports, starts every
//!    robot's gait, and requests one telemetry refresh per robot.
//! 3. Ticks the supervisor registry every `tick_interval_ms`, integrating
//!    positions from the resulting velocities.
//! 4. On Ctrl-C, disables every robot and exits.

mod config;
mod observability;
mod setup;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use colored::Colorize;
use swarm_link::{EventBus, Topic};
use swarm_robot::{CommandOutcome, Fleet};
use swarm_types::{EventPayload, SwarmError};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Ticks between periodic status lines.
const REPORT_EVERY: u64 = 600;

fn main() {
    let _guard = observability::init_tracing("swarm");
    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the fleet …".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let cfg = load_config();
    if let Err(e) = cfg.validate() {
        eprintln!("{}: {}", "Config error".red(), e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Runtime error".red(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, shutdown)) {
        eprintln!("{}: {}", "Fleet error".red(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ Fleet disabled. Bye.".green());
}

fn load_config() -> Config {
    let path = config::config_path();
    match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let cfg = config::fallback();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  No config found; wrote demo fleet to {}",
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Could not write demo config".yellow(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using the demo fleet.");
            config::fallback()
        }
    }
}

async fn run(cfg: Config, shutdown: Arc<AtomicBool>) -> Result<(), SwarmError> {
    let bus = EventBus::default();
    tokio::spawn(report_events(bus.clone()));

    let setup::Swarm {
        mut fleet,
        mut registry,
    } = setup::build(&cfg, &bus)?;

    start_fleet(&mut fleet);
    fleet.poll_all(Instant::now());

    let tick = cfg.tick_interval();
    let dt = tick.as_secs_f32();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    println!(
        "  Running {} robot(s) under {} supervisor(s) every {} ms. Press Ctrl-C to stop.",
        fleet.len(),
        registry.len(),
        cfg.tick_interval_ms
    );

    let mut ticks: u64 = 0;
    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;
        let report = registry.tick(&mut fleet, Instant::now());
        integrate_positions(&mut fleet, dt)?;

        ticks += 1;
        debug!(tick = ticks, ?report, "tick complete");
        if ticks % REPORT_EVERY == 0 {
            for id in fleet.ids().collect::<Vec<_>>() {
                let k = fleet.kinematics(id)?;
                info!(robot = %id, position = %k.position, velocity = %k.velocity, "status");
            }
        }
    }

    fleet.disable_all();
    info!(ticks, "control loop stopped");
    Ok(())
}

/// Start every robot's gait.  A robot whose link refuses is left stopped.
fn start_fleet(fleet: &mut Fleet) {
    for id in fleet.ids().collect::<Vec<_>>() {
        match fleet.toggle_running(id) {
            Ok(CommandOutcome::Sent) => {}
            Ok(outcome) => warn!(robot = %id, ?outcome, "robot not started"),
            Err(e) => warn!(robot = %id, error = %e, "robot not started"),
        }
    }
}

/// Euler step standing in for the physics engine that owns positions.
fn integrate_positions(fleet: &mut Fleet, dt: f32) -> Result<(), SwarmError> {
    for id in fleet.ids().collect::<Vec<_>>() {
        let k = fleet.kinematics(id)?;
        fleet.set_position(id, k.position + k.velocity * dt)?;
    }
    Ok(())
}

/// Print operator-facing notifications from the bus.
async fn report_events(bus: EventBus) {
    let mut telemetry_rx = bus.subscribe_to(Topic::Telemetry);
    let mut alerts_rx = bus.subscribe_to(Topic::SystemAlerts);
    loop {
        let event = tokio::select! {
            event = telemetry_rx.recv() => event,
            event = alerts_rx.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "operator report fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.payload {
            EventPayload::TelemetryReady { robot, telemetry } => {
                let fields = telemetry
                    .fields
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!(
                    "  {} {} v{} {}",
                    "telemetry".cyan(),
                    robot.to_string().bold(),
                    telemetry.version,
                    fields.dimmed()
                );
            }
            EventPayload::TelemetryTimeout { robot } => {
                println!("  {} {} did not answer", "timeout".yellow(), robot);
            }
            EventPayload::LinkFault { robot, details } => {
                println!("  {} {}: {}", "link fault".red(), robot, details);
            }
            _ => {}
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  swarm – supervised robot fleet".bold().cyan());
    println!("{}", "  ──────────────────────────────".dimmed());
}
