//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub interest: InterestConfig,
    #[serde(default)]
    pub mirrors: MirrorConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.toml");
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml_str(&contents)
        } else {
            info!("No config.toml found, creating default config");
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Networking settings for the WebSocket listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    256
}

/// Tick loop and queue sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Simulation ticks per second.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Capacity of the shared input queue. Producers wait when it is full.
    #[serde(default = "default_input_queue_capacity")]
    pub input_queue_capacity: usize,
    /// Capacity of each client's snapshot queue. Snapshots are dropped when it is full.
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,
    /// Minimum spacing between overrun warnings, in milliseconds.
    #[serde(default = "default_overrun_log_interval")]
    pub overrun_log_interval_ms: u64,
    /// Emit tick statistics every this many ticks (0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ticks: u64,
}

impl SimulationConfig {
    /// Fixed simulation step. A zero tick rate is treated as 1 Hz.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn overrun_log_interval(&self) -> Duration {
        Duration::from_millis(self.overrun_log_interval_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
            input_queue_capacity: default_input_queue_capacity(),
            client_queue_capacity: default_client_queue_capacity(),
            overrun_log_interval_ms: default_overrun_log_interval(),
            stats_interval_ticks: default_stats_interval(),
        }
    }
}

fn default_tick_rate() -> u32 {
    50
}
fn default_input_queue_capacity() -> usize {
    1024
}
fn default_client_queue_capacity() -> usize {
    16
}
fn default_overrun_log_interval() -> u64 {
    5000
}
fn default_stats_interval() -> u64 {
    500
}

/// Interest management (per-client visibility).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterestConfig {
    /// Radius within which a client sees other entities.
    #[serde(default = "default_visibility_radius")]
    pub visibility_radius: f32,
    /// Spatial index cell size. Defaults to the visibility radius.
    #[serde(default)]
    pub cell_size: Option<f32>,
}

impl InterestConfig {
    pub fn effective_cell_size(&self) -> f32 {
        self.cell_size.unwrap_or(self.visibility_radius)
    }
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            visibility_radius: default_visibility_radius(),
            cell_size: None,
        }
    }
}

fn default_visibility_radius() -> f32 {
    50.0
}

/// Synchronized-body demo fixture.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    /// Whether mirror entities are spawned and linked to the primary entity.
    #[serde(default = "default_mirrors_enabled")]
    pub enabled: bool,
    /// One mirror entity is created per coefficient.
    #[serde(default = "default_mirror_coefficients")]
    pub coefficients: Vec<f32>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: default_mirrors_enabled(),
            coefficients: default_mirror_coefficients(),
        }
    }
}

fn default_mirrors_enabled() -> bool {
    true
}
fn default_mirror_coefficients() -> Vec<f32> {
    vec![0.5, 1.5, -1.0, 2.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.simulation.tick_rate, 50);
        assert_eq!(config.simulation.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.simulation.input_queue_capacity, 1024);
        assert_eq!(config.simulation.client_queue_capacity, 16);
        assert_eq!(config.mirrors.coefficients, vec![0.5, 1.5, -1.0, 2.0]);
    }

    #[test]
    fn test_cell_size_follows_radius_unless_set() {
        let config = Config::from_toml_str("[interest]\nvisibility_radius = 10.0\n").unwrap();
        assert_eq!(config.interest.effective_cell_size(), 10.0);

        let config =
            Config::from_toml_str("[interest]\nvisibility_radius = 10.0\ncell_size = 4.0\n").unwrap();
        assert_eq!(config.interest.effective_cell_size(), 4.0);
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.simulation.tick_rate, 50);
        assert!(parsed.mirrors.enabled);
    }

    #[test]
    fn test_zero_tick_rate_is_clamped() {
        let config = Config::from_toml_str("[simulation]\ntick_rate = 0\n").unwrap();
        assert_eq!(config.simulation.tick_interval(), Duration::from_secs(1));
    }
}
