//! Fleet configuration – reads/writes `~/.swarm/config.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarm_robot::{PollSettings, RobotProfile};
use swarm_supervisor::SupervisorKind;
use swarm_types::{SwarmError, Vec3};

/// Telemetry poll timing.  `timeout_ms = 0` polls until the robot answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_first_check_ms")]
    pub first_check_ms: u64,
    #[serde(default = "default_recheck_ms")]
    pub recheck_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub id: u32,
    #[serde(flatten)]
    pub profile: RobotProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc: Option<OscConfig>,
    /// Name of an entry in `bluetooth_links`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluetooth: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub name: String,
    pub kind: SupervisorKind,
    /// Half-extents of the bounding volume.
    pub bounds: [f32; 3],
    #[serde(default)]
    pub robots: Vec<u32>,
}

impl SupervisorConfig {
    pub fn bounds(&self) -> Vec3 {
        let [x, y, z] = self.bounds;
        Vec3::new(x, y, z)
    }
}

/// Persisted fleet configuration stored in `~/.swarm/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Control loop period.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Names of the Bluetooth links in the shared pool.
    #[serde(default)]
    pub bluetooth_links: Vec<String>,

    #[serde(default)]
    pub robots: Vec<RobotConfig>,

    #[serde(default)]
    pub supervisors: Vec<SupervisorConfig>,
}

fn default_tick_interval_ms() -> u64 {
    16
}
fn default_first_check_ms() -> u64 {
    1500
}
fn default_recheck_ms() -> u64 {
    1000
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            first_check_ms: default_first_check_ms(),
            recheck_ms: default_recheck_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            telemetry: TelemetryConfig::default(),
            bluetooth_links: Vec::new(),
            robots: Vec::new(),
            supervisors: Vec::new(),
        }
    }
}

impl Config {
    /// A small demo fleet: four robots, two flocking and two bouncing.
    pub fn demo() -> Self {
        let robots = (1..=4u32)
            .map(|id| RobotConfig {
                id,
                profile: RobotProfile::named(format!("metabot-{id:02}")),
                osc: Some(OscConfig {
                    address: "127.0.0.1".to_string(),
                    port: 9000 + id as u16,
                }),
                bluetooth: Some(format!("bt-metabot-{id:02}")),
            })
            .collect::<Vec<_>>();
        Self {
            bluetooth_links: robots.iter().filter_map(|r| r.bluetooth.clone()).collect(),
            robots,
            supervisors: vec![
                SupervisorConfig {
                    name: "flock".to_string(),
                    kind: SupervisorKind::Boids,
                    bounds: [500.0, 50.0, 500.0],
                    robots: vec![1, 2],
                },
                SupervisorConfig {
                    name: "arena".to_string(),
                    kind: SupervisorKind::Simple,
                    bounds: [300.0, 50.0, 300.0],
                    robots: vec![3, 4],
                },
            ],
            ..Self::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            first_check: Duration::from_millis(self.telemetry.first_check_ms),
            recheck: Duration::from_millis(self.telemetry.recheck_ms),
            timeout: (self.telemetry.timeout_ms > 0)
                .then(|| Duration::from_millis(self.telemetry.timeout_ms)),
        }
    }

    /// Check cross-references before the fleet is built.
    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.tick_interval_ms == 0 {
            return Err(SwarmError::InvalidConfig("tick_interval_ms must be positive".to_string()));
        }

        let links: BTreeSet<&str> = self.bluetooth_links.iter().map(String::as_str).collect();
        if links.len() != self.bluetooth_links.len() {
            return Err(SwarmError::InvalidConfig("duplicate bluetooth link name".to_string()));
        }

        let mut ids = BTreeSet::new();
        let mut claimed = BTreeSet::new();
        for robot in &self.robots {
            if !ids.insert(robot.id) {
                return Err(SwarmError::InvalidConfig(format!("duplicate robot id {}", robot.id)));
            }
            if let Some(link) = &robot.bluetooth {
                if !links.contains(link.as_str()) {
                    return Err(SwarmError::InvalidConfig(format!(
                        "robot {} uses unknown bluetooth link '{link}'",
                        robot.id
                    )));
                }
                if !claimed.insert(link.as_str()) {
                    return Err(SwarmError::InvalidConfig(format!(
                        "bluetooth link '{link}' is assigned to more than one robot"
                    )));
                }
            }
        }

        let mut names = BTreeSet::new();
        for supervisor in &self.supervisors {
            if !names.insert(supervisor.name.as_str()) {
                return Err(SwarmError::InvalidConfig(format!(
                    "duplicate supervisor '{}'",
                    supervisor.name
                )));
            }
            if supervisor.bounds.iter().any(|half| *half <= 0.0) {
                return Err(SwarmError::InvalidConfig(format!(
                    "supervisor '{}' needs positive bounds",
                    supervisor.name
                )));
            }
            if let Some(missing) = supervisor.robots.iter().find(|id| !ids.contains(*id)) {
                return Err(SwarmError::InvalidConfig(format!(
                    "supervisor '{}' references unknown robot {missing}",
                    supervisor.name
                )));
            }
        }
        Ok(())
    }
}

/// Return the config path: `$SWARM_CONFIG`, else `~/.swarm/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SWARM_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".swarm").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SWARM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SWARM_TICK_INTERVAL_MS` | `tick_interval_ms` |
/// | `SWARM_TELEMETRY_TIMEOUT_MS` | `telemetry.timeout_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Unparseable values are ignored.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SWARM_TICK_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.tick_interval_ms = ms;
    }
    if let Some(v) = lookup("SWARM_TELEMETRY_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.telemetry.timeout_ms = ms;
    }
}

/// The demo fleet with `SWARM_*` overrides applied, for when no usable
/// config file exists.
pub fn fallback() -> Config {
    fallback_with(|key| std::env::var(key).ok())
}

fn fallback_with(lookup: impl Fn(&str) -> Option<String>) -> Config {
    let mut cfg = Config::demo();
    apply_overrides(&mut cfg, lookup);
    cfg
}

/// Save the config to disk, creating the parent directory if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
